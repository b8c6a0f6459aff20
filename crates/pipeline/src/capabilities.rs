//! HTTP clients for the external capability services
//!
//! Each client wraps one sidecar service behind the matching core
//! trait. Transport failures surface as errors; the orchestrator
//! decides per capability whether to degrade or abort.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use vaas_core::{
    ContentModerator, Error, IntentParser, ModerationResult, NluResult, Result, SpeechToText,
    TextToSpeech, Transcript,
};

const CAPABILITY_TIMEOUT: Duration = Duration::from_secs(30);

fn capability_client() -> Client {
    Client::builder()
        .timeout(CAPABILITY_TIMEOUT)
        .build()
        .unwrap_or_default()
}

async fn probe(client: &Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

// ---------- Speech to text ----------

#[derive(Debug, Deserialize)]
struct AsrResponse {
    text: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    language: Option<String>,
}

pub struct HttpSpeechToText {
    client: Client,
    url: String,
}

impl HttpSpeechToText {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: capability_client(),
            url: url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn transcribe(&self, audio: &[u8]) -> Result<Transcript> {
        let response = self
            .client
            .post(format!("{}/transcribe", self.url))
            .header("content-type", "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| Error::Capability(format!("ASR request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Capability(format!(
                "ASR service returned {}",
                response.status()
            )));
        }

        let parsed: AsrResponse = response
            .json()
            .await
            .map_err(|e| Error::Capability(format!("ASR response invalid: {}", e)))?;

        Ok(Transcript {
            text: parsed.text,
            confidence: parsed.confidence,
            language: parsed.language,
        })
    }

    async fn health_check(&self) -> bool {
        probe(&self.client, &format!("{}/health", self.url)).await
    }
}

// ---------- Text to speech ----------

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
}

pub struct HttpTextToSpeech {
    client: Client,
    url: String,
}

impl HttpTextToSpeech {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: capability_client(),
            url: url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TextToSpeech for HttpTextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(format!("{}/synthesize", self.url))
            .json(&TtsRequest { text })
            .send()
            .await
            .map_err(|e| Error::Capability(format!("TTS request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Capability(format!(
                "TTS service returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Capability(format!("TTS response invalid: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn health_check(&self) -> bool {
        probe(&self.client, &format!("{}/health", self.url)).await
    }
}

// ---------- Intent parsing ----------

#[derive(Debug, Serialize)]
struct NluRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct NluIntent {
    name: String,
    #[serde(default)]
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct NluEntity {
    entity: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct NluResponse {
    intent: NluIntent,
    #[serde(default)]
    entities: Vec<NluEntity>,
}

fn nlu_result_from(response: NluResponse) -> NluResult {
    let entities: HashMap<String, Value> = response
        .entities
        .into_iter()
        .map(|e| (e.entity, e.value))
        .collect();
    NluResult {
        intent: response.intent.name,
        confidence: response.intent.confidence,
        entities,
    }
}

pub struct HttpIntentParser {
    client: Client,
    url: String,
}

impl HttpIntentParser {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: capability_client(),
            url: url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl IntentParser for HttpIntentParser {
    async fn parse(&self, text: &str) -> Result<NluResult> {
        let response = self
            .client
            .post(format!("{}/model/parse", self.url))
            .json(&NluRequest { text })
            .send()
            .await
            .map_err(|e| Error::Capability(format!("NLU request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Capability(format!(
                "NLU service returned {}",
                response.status()
            )));
        }

        let parsed: NluResponse = response
            .json()
            .await
            .map_err(|e| Error::Capability(format!("NLU response invalid: {}", e)))?;

        Ok(nlu_result_from(parsed))
    }

    async fn health_check(&self) -> bool {
        probe(&self.client, &format!("{}/status", self.url)).await
    }
}

// ---------- Moderation ----------

#[derive(Debug, Serialize)]
struct ModerationRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    #[serde(default)]
    scores: HashMap<String, f64>,
}

fn moderation_result_from(scores: HashMap<String, f64>, threshold: f64) -> ModerationResult {
    let mut flagged: Vec<String> = scores
        .iter()
        .filter(|(_, score)| **score >= threshold)
        .map(|(category, _)| category.clone())
        .collect();
    flagged.sort();
    ModerationResult {
        is_safe: flagged.is_empty(),
        flagged_categories: flagged,
        scores,
    }
}

pub struct HttpContentModerator {
    client: Client,
    url: String,
    threshold: f64,
}

impl HttpContentModerator {
    pub fn new(url: impl Into<String>, threshold: f64) -> Self {
        Self {
            client: capability_client(),
            url: url.into().trim_end_matches('/').to_string(),
            threshold,
        }
    }
}

#[async_trait]
impl ContentModerator for HttpContentModerator {
    async fn moderate(&self, text: &str) -> Result<ModerationResult> {
        let response = self
            .client
            .post(format!("{}/moderate", self.url))
            .json(&ModerationRequest { text })
            .send()
            .await
            .map_err(|e| Error::Capability(format!("moderation request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Capability(format!(
                "moderation service returned {}",
                response.status()
            )));
        }

        let parsed: ModerationResponse = response
            .json()
            .await
            .map_err(|e| Error::Capability(format!("moderation response invalid: {}", e)))?;

        Ok(moderation_result_from(parsed.scores, self.threshold))
    }

    async fn health_check(&self) -> bool {
        probe(&self.client, &format!("{}/health", self.url)).await
    }
}
