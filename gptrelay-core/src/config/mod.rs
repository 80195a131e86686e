//! Configuration management
//!
//! Handles loading and validation of gptrelay configuration from files,
//! `.env` and environment variables.

pub mod loader;
pub mod schema;
pub mod validate;

pub use loader::ConfigLoader;
pub use schema::*;
pub use validate::{validate_config, validate_gateway};
