//! HTTP embedding client
//!
//! Generates dense vectors through an Ollama-compatible embedding API.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::RagError;
use vaas_config::RagSettings;

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(settings: &RagSettings) -> Self {
        Self {
            client: Client::new(),
            endpoint: settings.embedding_endpoint.trim_end_matches('/').to_string(),
            model: settings.embedding_model.clone(),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let request = EmbedRequest {
            model: self.model.clone(),
            input: text.to_string(),
        };

        let url = format!("{}/api/embed", self.endpoint);
        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(RagError::Embedding(format!(
                "embedding service returned {}",
                response.status()
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::InvalidResponse(e.to_string()))?;

        parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RagError::InvalidResponse("no embedding returned".to_string()))
    }

    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
