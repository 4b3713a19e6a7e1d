//! Shared types and configuration for the tiascan indexer
//!
//! Everything that crosses a crate boundary lives here: block and cursor
//! types, durable aggregate state, rollback row types, error types and the
//! config file format.

pub mod config;
pub mod errors;
pub mod types;

pub use config::Config;
pub use errors::{Error, Result};
