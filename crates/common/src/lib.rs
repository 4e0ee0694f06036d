//! Shared types, error definitions, and utilities used across all clawdis crates.

pub mod error;
pub mod fsio;
pub mod redact;
pub mod time;
pub mod types;

pub use error::{Error, Result};
