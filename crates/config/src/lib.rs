//! Configuration management for the quarry search engine.
//!
//! Supports loading configuration from:
//! - TOML files (`config/default.toml`, then `config/{env}.toml`)
//! - Environment variables (`QUARRY_` prefix, `__` section separator)
//!
//! Tuning defaults live in [`constants`]; everything deployment-specific is
//! a [`Settings`] field.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, load_settings_from, CacheConfig, ChunkerConfig, InferenceConfig, LexicalConfig,
    ProcessorRole, QueueConfig, RerankConfig, SearchConfig, Settings, StorageConfig,
    TelemetryConfig, VectorConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
