//! Per-domain behavior definitions
//!
//! One `DomainConfig` per business vertical (real estate, healthcare, ...).
//! Loaded from YAML or JSON definition files, immutable once loaded
//! except via explicit reload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::ConfigError;

/// HTTP verb for a domain-declared external action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }
}

/// One intent a domain understands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentConfig {
    pub name: String,
    /// Slot names this intent expects
    #[serde(default)]
    pub entities: Vec<String>,
    /// External action to execute when this intent fires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
    #[serde(default)]
    pub api_method: HttpMethod,
    #[serde(default)]
    pub api_headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_template: Option<String>,
    #[serde(default)]
    pub requires_auth: bool,
}

/// Retrieval settings for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub collection_name: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

fn default_top_k() -> usize {
    5
}
fn default_score_threshold() -> f32 {
    0.5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            collection_name: String::new(),
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
        }
    }
}

fn default_fallback_response() -> String {
    "I'm sorry, I couldn't process your request. Please try again.".to_string()
}

fn default_max_turns() -> u32 {
    50
}

/// Full behavior definition for one business vertical
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub domain_name: String,
    #[serde(default)]
    pub description: String,
    pub intents: Vec<IntentConfig>,
    #[serde(default)]
    pub context_retrieval: RetrievalConfig,
    /// Intent name to response template
    #[serde(default)]
    pub response_templates: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default = "default_fallback_response")]
    pub fallback_response: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl DomainConfig {
    /// Validate required fields and retrieval parameters.
    ///
    /// Template keys naming unknown intents are logged, not fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain_name.trim().is_empty() {
            return Err(ConfigError::MissingField("domain_name".to_string()));
        }
        if self.intents.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "intents".to_string(),
                message: "at least one intent is required".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for intent in &self.intents {
            if intent.name.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "intents[].name in domain '{}'",
                    self.domain_name
                )));
            }
            if !seen.insert(intent.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "intents".to_string(),
                    message: format!(
                        "duplicate intent '{}' in domain '{}'",
                        intent.name, self.domain_name
                    ),
                });
            }
        }

        if self.context_retrieval.enabled {
            if self.context_retrieval.collection_name.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "context_retrieval.collection_name in domain '{}'",
                    self.domain_name
                )));
            }
            if self.context_retrieval.top_k == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "context_retrieval.top_k".to_string(),
                    message: "must be a positive integer".to_string(),
                });
            }
            if !(0.0..=1.0).contains(&self.context_retrieval.score_threshold) {
                return Err(ConfigError::InvalidValue {
                    field: "context_retrieval.score_threshold".to_string(),
                    message: format!(
                        "must be between 0.0 and 1.0, got {}",
                        self.context_retrieval.score_threshold
                    ),
                });
            }
        }

        for key in self.response_templates.keys() {
            if !seen.contains(key.as_str()) {
                tracing::warn!(
                    domain = %self.domain_name,
                    template = %key,
                    "response template references unknown intent"
                );
            }
        }

        Ok(())
    }

    pub fn get_intent(&self, name: &str) -> Option<&IntentConfig> {
        self.intents.iter().find(|i| i.name == name)
    }

    /// Load from a YAML or JSON definition file, then validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let config: DomainConfig = match ext {
            "json" => serde_json::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            other => {
                return Err(ConfigError::ParseError(format!(
                    "unsupported definition file extension '{}': {}",
                    other,
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Write this definition back out, format chosen by extension.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let content = match ext {
            "json" => serde_json::to_string_pretty(self)?,
            "yaml" | "yml" => serde_yaml::to_string(self)?,
            other => {
                return Err(ConfigError::ParseError(format!(
                    "unsupported definition file extension '{}': {}",
                    other,
                    path.display()
                )))
            }
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}
