//! Schema module - Rule notation, configuration and persisted record types.

mod config;
mod records;
mod rule;

pub use config::*;
pub use records::*;
pub use rule::*;
