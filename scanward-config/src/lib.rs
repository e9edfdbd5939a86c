//! Configuration library for Scanward.
//!
//! Loads the server configuration from files, inline JSON and the
//! environment, and enforces the guard rails the orchestrator relies on.
//! [`AppConfig::load`] reads the process environment; [`AppConfig::load_with`]
//! takes an explicit lookup, which the server uses to honour `--config`.

#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{CONFIG_JSON_VAR, CONFIG_PATH_VAR, ConfigLoad, ConfigSource, load_env_file};
pub use models::{AppConfig, DatabaseConfig, ServerConfig};
pub use validation::ConfigGuardRailError;
