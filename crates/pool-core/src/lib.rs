//! pool-core: wire format, session identities, configuration, and the
//! client side of the protocol. All other Pool crates depend on this one.

pub mod client;
pub mod config;
pub mod identity;
pub mod wire;

pub use identity::{IdentityIssuer, SessionIdentity};
pub use wire::{LocationMessage, ReplyKind, WireError};
