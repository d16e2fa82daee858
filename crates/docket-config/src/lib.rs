//! # Docket Config
//!
//! Configuration management for Docket.
//! Supports layered configuration from files, environment variables,
//! and runtime refresh, plus process-wide logging setup.

mod app_config;
mod loader;
mod logging;

pub use app_config::*;
pub use loader::*;
pub use logging::*;
