//! Language model integration
//!
//! Two provider backends (Ollama, OpenAI-compatible) behind the
//! `LanguageModel` capability trait. The provider is chosen by
//! configuration at startup; nothing switches providers mid-request.

pub mod backend;

pub use backend::{OllamaBackend, OpenAiBackend};

use std::sync::Arc;
use thiserror::Error;

use vaas_config::{LlmProvider, LlmSettings};
use vaas_core::LanguageModel;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}

impl From<LlmError> for vaas_core::Error {
    fn from(err: LlmError) -> Self {
        vaas_core::Error::Llm(err.to_string())
    }
}

/// Build the configured backend.
pub fn create_backend(settings: &LlmSettings) -> Result<Arc<dyn LanguageModel>, LlmError> {
    match settings.provider {
        LlmProvider::Ollama => Ok(Arc::new(OllamaBackend::new(settings.clone())?)),
        LlmProvider::OpenAi => Ok(Arc::new(OpenAiBackend::new(settings.clone())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_builds_configured_provider() {
        let mut settings = LlmSettings::default();
        settings.provider = LlmProvider::Ollama;
        assert!(create_backend(&settings).is_ok());

        settings.provider = LlmProvider::OpenAi;
        settings.api_key = Some("sk-test".to_string());
        assert!(create_backend(&settings).is_ok());
    }
}
