//! CLI command modules.

pub mod probe;
