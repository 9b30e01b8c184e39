//! poold: proximity relay daemon.
//!
//! Clients connect over TCP, prove they received their session identity,
//! report a location, and get back the location of one other client within
//! the proximity box (or the sentinel if there is none).

pub mod server;
pub mod session;

pub use server::{start, start_on, ServerError, ServerHandle, StopSignal};
