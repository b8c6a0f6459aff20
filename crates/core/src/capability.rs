//! Capability traits for pluggable external collaborators
//!
//! ASR, TTS, NLU, moderation, retrieval, and generation are external
//! services behind these interfaces. The orchestrator only sees the
//! contract; model internals live elsewhere.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Result of speech recognition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Speech-to-text capability
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<Transcript>;

    async fn health_check(&self) -> bool;
}

/// Text-to-speech capability. Returns encoded audio bytes.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    async fn health_check(&self) -> bool;
}

/// Result of intent classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluResult {
    pub intent: String,
    pub confidence: f32,
    #[serde(default)]
    pub entities: HashMap<String, Value>,
}

impl NluResult {
    /// Degraded result used when the NLU capability is unreachable.
    pub fn fallback() -> Self {
        Self {
            intent: "nlu_fallback".to_string(),
            confidence: 0.0,
            entities: HashMap::new(),
        }
    }
}

/// Intent/entity parsing capability
#[async_trait]
pub trait IntentParser: Send + Sync {
    async fn parse(&self, text: &str) -> Result<NluResult>;

    async fn health_check(&self) -> bool;
}

/// Result of content moderation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationResult {
    pub is_safe: bool,
    #[serde(default)]
    pub flagged_categories: Vec<String>,
    #[serde(default)]
    pub scores: HashMap<String, f64>,
}

impl ModerationResult {
    /// Clean result, also used when moderation fails open.
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            flagged_categories: Vec::new(),
            scores: HashMap::new(),
        }
    }
}

/// Content moderation capability
#[async_trait]
pub trait ContentModerator: Send + Sync {
    async fn moderate(&self, text: &str) -> Result<ModerationResult>;

    async fn health_check(&self) -> bool;
}

/// A knowledge snippet returned by retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Semantic retrieval capability, scoped per tenant and collection
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        collection: &str,
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedChunk>>;

    async fn health_check(&self) -> bool;
}

/// Role of a prompt message sent to the language model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A composed generation request: system prompt, prior turns, and the
/// final user prompt with any embedded context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub history: Vec<PromptMessage>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_history(mut self, history: Vec<PromptMessage>) -> Self {
        self.history = history;
        self
    }
}

/// Language model capability. Providers are selected by configuration
/// at startup; no runtime switching mid-request.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<String>;

    async fn health_check(&self) -> bool;
}
