//! Core types and traits for gptrelay
//!
//! This crate provides the configuration layer, logging setup, message bus
//! and per-user session store shared by the other gptrelay crates.

pub mod bus;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod utils;

pub use commands::COMMAND_MENU;
pub use error::{Error, Result};
