//! Configuration management for the gateway
//!
//! Two layers of configuration live here:
//! - `Settings`: process-wide settings loaded from files and
//!   environment variables (VAAS__ prefix)
//! - `DomainConfig`: per-domain behavior definitions (intents, prompts,
//!   templates, retrieval settings) loaded from a directory of YAML or
//!   JSON files and served by `ConfigStore`

pub mod domain;
pub mod settings;
pub mod store;

pub use domain::{DomainConfig, HttpMethod, IntentConfig, RetrievalConfig};
pub use settings::{
    load_settings, AdapterSettings, AnalyticsSettings, CapabilityEndpoints, LlmProvider,
    LlmSettings, PersistenceSettings, PolicySettings, RagSettings, RuntimeEnvironment,
    ServerSettings, SessionSettings, Settings,
};
pub use store::ConfigStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Domain not loaded: {0}")]
    DomainNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for vaas_core::Error {
    fn from(err: ConfigError) -> Self {
        vaas_core::Error::Config(err.to_string())
    }
}
