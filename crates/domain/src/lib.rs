//! Shared types for mcprelay: configuration, the crate-wide error type and
//! the contracts the gateway consumes from the API it exposes as tools.

pub mod config;
pub mod error;
pub mod tool;

pub use error::{Error, Result};
