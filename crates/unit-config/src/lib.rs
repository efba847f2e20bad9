//! Unit Runtime Configuration
//!
//! Key/value store consulted by the rest of the unit for:
//! - Armed state (persisted across restarts)
//! - Server URL and API key for uploads and heartbeats
//! - Operator-tunable detection and laser limits
//!
//! Values are loaded with the `config` crate (defaults, JSON file,
//! `HORNET__*` environment overrides) and written back atomically.

pub mod schema;
mod store;

pub use schema::{
    DetectionConfig, DeviceConfig, LaserConfig, ServerConfig, UnitConfig, MASKED_SECRET,
    SCHEMA_VERSION,
};
pub use store::{ConfigStore, CONFIG_PATH, CONFIG_PATH_DEV};

use thiserror::Error;

/// A rejected configuration value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field, `_json` for malformed bodies
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config source error: {0}")]
    Source(#[from] ::config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Lock(String),
}
