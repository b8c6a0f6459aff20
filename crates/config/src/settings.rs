//! Process-wide settings
//!
//! Layered: config/default.toml, config/{env}.toml, then VAAS__ prefixed
//! environment variables. Every section has serde defaults so partial
//! files work.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub policy: PolicySettings,

    #[serde(default)]
    pub adapter: AdapterSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub rag: RagSettings,

    #[serde(default)]
    pub capabilities: CapabilityEndpoints,

    #[serde(default)]
    pub persistence: PersistenceSettings,

    #[serde(default)]
    pub analytics: AnalyticsSettings,

    /// Directory of per-domain definition files
    #[serde(default = "default_domains_dir")]
    pub domains_dir: String,
}

fn default_domains_dir() -> String {
    "config/domains".to_string()
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    60
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Session store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Idle TTL, refreshed on every mutation
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    /// Turns fed into the generation prompt
    #[serde(default = "default_prompt_history")]
    pub prompt_history_limit: usize,
}

fn default_session_ttl() -> u64 {
    1800
}
fn default_prompt_history() -> usize {
    10
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            prompt_history_limit: default_prompt_history(),
        }
    }
}

/// Policy planner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Per-tenant request ceiling per fixed one-minute window
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u64,
}

fn default_rate_limit() -> u64 {
    60
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

/// Outbound HTTP adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
    #[serde(default = "default_call_timeout")]
    pub timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    2
}
fn default_backoff_cap() -> u64 {
    10
}
fn default_call_timeout() -> u64 {
    30
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
            timeout_secs: default_call_timeout(),
        }
    }
}

/// Language model provider, selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Ollama,
    OpenAi,
}

/// Language model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_llm_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_max_tokens() -> u32 {
    512
}
fn default_temperature() -> f32 {
    0.7
}
fn default_llm_timeout() -> u64 {
    60
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// Retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSettings {
    #[serde(default = "default_qdrant_endpoint")]
    pub qdrant_endpoint: String,
    #[serde(default)]
    pub qdrant_api_key: Option<String>,
    #[serde(default = "default_embedding_endpoint")]
    pub embedding_endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,
}

fn default_qdrant_endpoint() -> String {
    "http://localhost:6334".to_string()
}
fn default_embedding_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_vector_dim() -> usize {
    768
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            qdrant_endpoint: default_qdrant_endpoint(),
            qdrant_api_key: None,
            embedding_endpoint: default_embedding_endpoint(),
            embedding_model: default_embedding_model(),
            vector_dim: default_vector_dim(),
        }
    }
}

/// Endpoints of the external capability services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityEndpoints {
    #[serde(default = "default_asr_url")]
    pub asr_url: String,
    #[serde(default = "default_tts_url")]
    pub tts_url: String,
    #[serde(default = "default_nlu_url")]
    pub nlu_url: String,
    #[serde(default = "default_moderation_url")]
    pub moderation_url: String,
    /// Score above which a moderation category counts as flagged
    #[serde(default = "default_moderation_threshold")]
    pub moderation_threshold: f64,
}

fn default_asr_url() -> String {
    "http://localhost:8090".to_string()
}
fn default_tts_url() -> String {
    "http://localhost:8091".to_string()
}
fn default_nlu_url() -> String {
    "http://localhost:5005".to_string()
}
fn default_moderation_url() -> String {
    "http://localhost:8092".to_string()
}
fn default_moderation_threshold() -> f64 {
    0.7
}

impl Default for CapabilityEndpoints {
    fn default() -> Self {
        Self {
            asr_url: default_asr_url(),
            tts_url: default_tts_url(),
            nlu_url: default_nlu_url(),
            moderation_url: default_moderation_url(),
            moderation_threshold: default_moderation_threshold(),
        }
    }
}

/// ScyllaDB persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_scylla_hosts")]
    pub hosts: Vec<String>,
    #[serde(default = "default_keyspace")]
    pub keyspace: String,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,
}

fn default_scylla_hosts() -> Vec<String> {
    vec!["127.0.0.1:9042".to_string()]
}
fn default_keyspace() -> String {
    "vaas".to_string()
}
fn default_replication_factor() -> u8 {
    1
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            hosts: default_scylla_hosts(),
            keyspace: default_keyspace(),
            replication_factor: default_replication_factor(),
        }
    }
}

/// Analytics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Also write events to the durable event store
    #[serde(default = "default_true")]
    pub persist_events: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            persist_events: true,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy.rate_limit_per_minute == 0 {
            return Err(ConfigError::InvalidValue {
                field: "policy.rate_limit_per_minute".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.adapter.backoff_base_secs > self.adapter.backoff_cap_secs {
            return Err(ConfigError::InvalidValue {
                field: "adapter.backoff_base_secs".to_string(),
                message: format!(
                    "base {}s exceeds cap {}s",
                    self.adapter.backoff_base_secs, self.adapter.backoff_cap_secs
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.capabilities.moderation_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "capabilities.moderation_threshold".to_string(),
                message: format!(
                    "must be between 0.0 and 1.0, got {}",
                    self.capabilities.moderation_threshold
                ),
            });
        }
        if self.session.ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.ttl_secs".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from files and environment
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VAAS")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.session.ttl_secs, 1800);
        assert_eq!(settings.policy.rate_limit_per_minute, 60);
        assert_eq!(settings.adapter.max_retries, 3);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_rate_limit() {
        let mut settings = Settings::default();
        settings.policy.rate_limit_per_minute = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let mut settings = Settings::default();
        settings.adapter.backoff_base_secs = 20;
        settings.adapter.backoff_cap_secs = 10;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_moderation_threshold() {
        let mut settings = Settings::default();
        settings.capabilities.moderation_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_llm_provider_parses_lowercase() {
        let provider: LlmProvider = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(provider, LlmProvider::OpenAi);
    }
}
