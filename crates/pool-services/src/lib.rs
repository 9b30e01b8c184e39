//! pool-services: persistent state behind the daemon.

pub mod location_store;

pub use location_store::{within_box, LocationRecord, LocationStore, StoreError, PROXIMITY_DEGREES};
