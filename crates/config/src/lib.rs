//! Configuration for the policy QA engine
//!
//! Typed settings loaded at startup from a TOML file plus environment
//! overrides. The engine snapshots an `Arc<Settings>` per request so a
//! mid-request settings change never mixes stages.

pub mod constants;
pub mod settings;

pub use settings::{
    CacheConfig, EmbeddingConfig, LlmConfig, PrefetchConfig, RerankConfig, RerankPreset,
    RetrievalConfig, ServerConfig, Settings, TransformConfig, VectorStoreConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}
