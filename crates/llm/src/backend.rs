//! Provider backends

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::LlmError;
use vaas_config::LlmSettings;
use vaas_core::{GenerateRequest, LanguageModel, PromptMessage, PromptRole, Result};

/// Flatten a `GenerateRequest` into the chat message list both
/// providers expect: system prompt first, then history, then the
/// composed user prompt.
fn chat_messages(request: &GenerateRequest) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(request.history.len() + 2);
    if let Some(system) = &request.system_prompt {
        messages.push(WireMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    for msg in &request.history {
        messages.push(WireMessage::from(msg));
    }
    messages.push(WireMessage {
        role: "user".to_string(),
        content: request.prompt.clone(),
    });
    messages
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<&PromptMessage> for WireMessage {
    fn from(msg: &PromptMessage) -> Self {
        let role = match msg.role {
            PromptRole::System => "system",
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: msg.content.clone(),
        }
    }
}

fn build_client(timeout_secs: u64) -> std::result::Result<Client, LlmError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

// ---------- Ollama ----------

#[derive(Clone)]
pub struct OllamaBackend {
    client: Client,
    settings: LlmSettings,
}

impl OllamaBackend {
    pub fn new(settings: LlmSettings) -> std::result::Result<Self, LlmError> {
        let client = build_client(settings.timeout_secs)?;
        Ok(Self { client, settings })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.settings.endpoint.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: WireMessage,
}

#[async_trait]
impl LanguageModel for OllamaBackend {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let body = OllamaChatRequest {
            model: self.settings.model.clone(),
            messages: chat_messages(&request),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature.unwrap_or(self.settings.temperature),
                num_predict: request.max_tokens.unwrap_or(self.settings.max_tokens) as i32,
            },
        };

        let response = self
            .client
            .post(self.api_url("/chat"))
            .json(&body)
            .send()
            .await
            .map_err(LlmError::from)?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("Ollama {}: {}", status, error)).into());
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(parsed.message.content)
    }

    async fn health_check(&self) -> bool {
        match self.client.get(self.api_url("/tags")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

// ---------- OpenAI-compatible ----------

#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client,
    settings: LlmSettings,
}

impl OpenAiBackend {
    pub fn new(settings: LlmSettings) -> std::result::Result<Self, LlmError> {
        if settings.api_key.is_none() {
            tracing::warn!("OpenAI backend configured without an api_key");
        }
        let client = build_client(settings.timeout_secs)?;
        Ok(Self { client, settings })
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.endpoint.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: WireMessage,
}

#[async_trait]
impl LanguageModel for OpenAiBackend {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let body = OpenAiChatRequest {
            model: self.settings.model.clone(),
            messages: chat_messages(&request),
            max_tokens: request.max_tokens.unwrap_or(self.settings.max_tokens),
            temperature: request.temperature.unwrap_or(self.settings.temperature),
        };

        let mut builder = self.client.post(self.chat_url()).json(&body);
        if let Some(key) = &self.settings.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(LlmError::from)?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("OpenAI {}: {}", status, error)).into());
        }

        let parsed: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("empty choices".to_string()).into())
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.settings.endpoint.trim_end_matches('/'));
        let mut builder = self.client.get(url);
        if let Some(key) = &self.settings.api_key {
            builder = builder.bearer_auth(key);
        }
        match builder.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_messages_order() {
        let request = GenerateRequest::new("what about 3 BHK?")
            .with_system_prompt("You are a real estate assistant.")
            .with_history(vec![
                PromptMessage::new(PromptRole::User, "hi"),
                PromptMessage::new(PromptRole::Assistant, "hello!"),
            ]);

        let messages = chat_messages(&request);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[3].role, "user");
        assert_eq!(messages[3].content, "what about 3 BHK?");
    }

    #[test]
    fn test_chat_messages_without_system() {
        let messages = chat_messages(&GenerateRequest::new("hello"));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn test_url_construction() {
        let mut settings = LlmSettings::default();
        settings.endpoint = "http://localhost:11434/".to_string();
        let backend = OllamaBackend::new(settings).unwrap();
        assert_eq!(backend.api_url("/chat"), "http://localhost:11434/api/chat");

        let mut settings = LlmSettings::default();
        settings.endpoint = "https://api.openai.com/v1".to_string();
        let backend = OpenAiBackend::new(settings).unwrap();
        assert_eq!(
            backend.chat_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
