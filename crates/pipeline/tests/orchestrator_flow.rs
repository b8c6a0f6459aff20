//! End-to-end orchestrator flows with mocked capabilities

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use vaas_adapter::{AdapterConfig, DataAdapter};
use vaas_analytics::AnalyticsSink;
use vaas_config::{ConfigStore, DomainConfig, HttpMethod, IntentConfig, RetrievalConfig};
use vaas_core::{
    ContentModerator, ContextRetriever, GenerateRequest, IntentParser, LanguageModel,
    ModerationResult, NluResult, Result, RetrievedChunk,
};
use vaas_pipeline::{Orchestrator, PipelineDeps, ProcessRequest, VoiceRequest};
use vaas_policy::PolicyPlanner;
use vaas_session::SessionManager;
use vaas_storage::{InMemoryStore, InMemoryTtlStore, MessageStore};

// ---------- mocks ----------

struct MockLlm {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl LanguageModel for MockLlm {
    async fn generate(&self, _request: GenerateRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("Here is what I found for you.".to_string())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

struct MockModerator {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ContentModerator for MockModerator {
    async fn moderate(&self, text: &str) -> Result<ModerationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("badword") {
            Ok(ModerationResult {
                is_safe: false,
                flagged_categories: vec!["toxicity".to_string()],
                scores: HashMap::from([("toxicity".to_string(), 0.95)]),
            })
        } else {
            Ok(ModerationResult::safe())
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}

struct MockNlu {
    calls: Arc<AtomicUsize>,
    intent: String,
}

#[async_trait]
impl IntentParser for MockNlu {
    async fn parse(&self, _text: &str) -> Result<NluResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(NluResult {
            intent: self.intent.clone(),
            confidence: 0.9,
            entities: HashMap::from([("city".to_string(), json!("Pune"))]),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }
}

struct MockRetriever {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ContextRetriever for MockRetriever {
    async fn search(
        &self,
        _query: &str,
        _tenant_id: &str,
        _collection: &str,
        _top_k: usize,
        _score_threshold: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![RetrievedChunk {
            content: "Parking is available at all listings.".to_string(),
            score: 0.82,
            metadata: HashMap::new(),
        }])
    }

    async fn health_check(&self) -> bool {
        true
    }
}

// ---------- fixture ----------

struct Fixture {
    orchestrator: Orchestrator,
    store: Arc<InMemoryStore>,
    sessions: Arc<SessionManager>,
    llm_calls: Arc<AtomicUsize>,
    moderator_calls: Arc<AtomicUsize>,
    nlu_calls: Arc<AtomicUsize>,
    retriever_calls: Arc<AtomicUsize>,
    _dir: tempfile::TempDir,
}

struct FixtureOptions {
    intent: String,
    retrieval_enabled: bool,
    rate_limit: u64,
    api_endpoint: Option<String>,
    requires_auth: bool,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            intent: "greeting".to_string(),
            retrieval_enabled: false,
            rate_limit: 100,
            api_endpoint: None,
            requires_auth: false,
        }
    }
}

fn write_domain(dir: &std::path::Path, opts: &FixtureOptions) {
    let config = DomainConfig {
        domain_name: "real_estate".to_string(),
        description: "Property search assistant".to_string(),
        intents: vec![IntentConfig {
            name: opts.intent.clone(),
            entities: vec!["city".to_string()],
            api_endpoint: opts.api_endpoint.clone(),
            api_method: HttpMethod::Get,
            api_headers: HashMap::new(),
            response_template: None,
            requires_auth: opts.requires_auth,
        }],
        context_retrieval: RetrievalConfig {
            enabled: opts.retrieval_enabled,
            collection_name: "re_docs".to_string(),
            top_k: 3,
            score_threshold: 0.5,
        },
        response_templates: HashMap::new(),
        system_prompt: Some("You are a helpful property assistant.".to_string()),
        fallback_response: "Sorry, something went wrong on our side.".to_string(),
        max_turns: 50,
        metadata: HashMap::new(),
    };
    config
        .save_to_file(&dir.join("real_estate.yaml"))
        .unwrap();
}

fn fixture(opts: FixtureOptions) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    write_domain(dir.path(), &opts);

    let kv: Arc<InMemoryTtlStore> = Arc::new(InMemoryTtlStore::new());
    let store = Arc::new(InMemoryStore::new());
    let sessions = Arc::new(SessionManager::new(kv.clone(), Duration::from_secs(1800)));

    let llm_calls = Arc::new(AtomicUsize::new(0));
    let moderator_calls = Arc::new(AtomicUsize::new(0));
    let nlu_calls = Arc::new(AtomicUsize::new(0));
    let retriever_calls = Arc::new(AtomicUsize::new(0));

    let adapter = DataAdapter::new(AdapterConfig {
        max_retries: 1,
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(1),
        timeout: Duration::from_secs(2),
    })
    .unwrap();

    let deps = PipelineDeps {
        config_store: Arc::new(ConfigStore::new(dir.path())),
        sessions: sessions.clone(),
        policy: Arc::new(PolicyPlanner::new(kv.clone(), opts.rate_limit)),
        adapter,
        analytics: AnalyticsSink::new(store.clone(), true, true),
        messages: store.clone(),
        kv: kv.clone(),
        llm: Arc::new(MockLlm {
            calls: llm_calls.clone(),
        }),
        moderator: Arc::new(MockModerator {
            calls: moderator_calls.clone(),
        }),
        nlu: Arc::new(MockNlu {
            calls: nlu_calls.clone(),
            intent: opts.intent.clone(),
        }),
        retriever: Some(Arc::new(MockRetriever {
            calls: retriever_calls.clone(),
        })),
        asr: None,
        tts: None,
        prompt_history_limit: 10,
    };

    Fixture {
        orchestrator: Orchestrator::new(deps),
        store,
        sessions,
        llm_calls,
        moderator_calls,
        nlu_calls,
        retriever_calls,
        _dir: dir,
    }
}

fn request(text: &str) -> ProcessRequest {
    ProcessRequest {
        text: text.to_string(),
        user_id: "user-1".to_string(),
        tenant_id: "tenant-1".to_string(),
        domain: "real_estate".to_string(),
        session_id: None,
        auth_token: None,
        return_audio: false,
    }
}

// ---------- tests ----------

#[tokio::test]
async fn test_clean_turn_persists_both_messages() {
    let fx = fixture(FixtureOptions::default());

    let outcome = fx.orchestrator.process_text(request("hello there")).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.text_response, "Here is what I found for you.");
    assert_eq!(outcome.intent.as_deref(), Some("greeting"));
    assert_eq!(outcome.entities["city"], json!("Pune"));

    // Both turns live in the session, most recent last
    let session = fx.sessions.get(&outcome.session_id).await.unwrap().unwrap();
    assert_eq!(session.history.len(), 2);
    assert_eq!(session.history[0].content, "hello there");
    assert_eq!(session.message_count, 1);

    // Durable record for the user turn plus request/response events
    assert_eq!(fx.store.message_count(), 1);
    let records = fx
        .store
        .messages_for_session(&outcome.session_id, 10)
        .await
        .unwrap();
    assert_eq!(records[0].intent.as_deref(), Some("greeting"));
    let events = fx.store.events();
    let types: Vec<String> = events.iter().map(|e| e.event_type.clone()).collect();
    assert!(types.contains(&"request".to_string()));
    assert!(types.contains(&"response".to_string()));

    // Safe turns still leave a moderation event
    let moderation = events
        .iter()
        .find(|e| e.event_type == "moderation")
        .unwrap();
    assert_eq!(moderation.payload["flagged"], json!(false));
}

#[tokio::test]
async fn test_moderation_block_short_circuits() {
    let fx = fixture(FixtureOptions::default());

    let outcome = fx
        .orchestrator
        .process_text(request("some badword content"))
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(
        outcome.text_response,
        "I'm sorry, but I cannot process that request."
    );
    assert_eq!(outcome.intent.as_deref(), Some("moderation_failed"));
    assert_eq!(outcome.metadata["flagged_categories"], json!(["toxicity"]));

    // Downstream stages never run and nothing is persisted
    assert_eq!(fx.moderator_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.nlu_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.llm_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.store.message_count(), 0);

    let events = fx.store.events();
    let moderation = events
        .iter()
        .find(|e| e.event_type == "moderation")
        .unwrap();
    assert_eq!(moderation.payload["flagged"], json!(true));
    assert_eq!(moderation.payload["categories"], json!(["toxicity"]));
}

#[tokio::test]
async fn test_retrieval_skipped_when_domain_disables_it() {
    let fx = fixture(FixtureOptions::default());

    let outcome = fx.orchestrator.process_text(request("any parking?")).await.unwrap();

    assert!(outcome.success);
    assert_eq!(fx.retriever_calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.metadata["retrieved_context_count"], json!(0));
}

#[tokio::test]
async fn test_retrieval_runs_when_enabled() {
    let fx = fixture(FixtureOptions {
        retrieval_enabled: true,
        ..Default::default()
    });

    let outcome = fx.orchestrator.process_text(request("any parking?")).await.unwrap();

    assert!(outcome.success);
    assert_eq!(fx.retriever_calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.metadata["retrieved_context_count"], json!(1));
}

#[tokio::test]
async fn test_rate_limited_turn_is_rejected() {
    let fx = fixture(FixtureOptions {
        rate_limit: 1,
        ..Default::default()
    });

    let first = fx.orchestrator.process_text(request("hello")).await.unwrap();
    assert!(first.success);

    let second = fx.orchestrator.process_text(request("hello again")).await.unwrap();
    assert!(!second.success);
    assert_eq!(
        second.text_response,
        "I'm unable to complete that request at this time."
    );
    let violations = second.metadata["violations"].as_array().unwrap();
    assert!(violations
        .iter()
        .any(|v| v.as_str().unwrap().contains("requests per minute")));

    // Generation only ran for the first turn
    assert_eq!(fx.llm_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_auth_required_action_rejected_without_token() {
    let fx = fixture(FixtureOptions {
        intent: "book_visit".to_string(),
        api_endpoint: Some("http://127.0.0.1:9/visits".to_string()),
        requires_auth: true,
        ..Default::default()
    });

    let outcome = fx.orchestrator.process_text(request("book a visit")).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.api_response.is_none());
    let violations = outcome.metadata["violations"].as_array().unwrap();
    assert!(violations
        .iter()
        .any(|v| v.as_str().unwrap().contains("auth token")));
}

// Minimal one-shot HTTP server, just enough for one adapter call
async fn spawn_json_endpoint(body: &'static str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });
    format!("http://{}/listings", addr)
}

#[tokio::test]
async fn test_successful_action_feeds_generation_and_persists_intent() {
    let endpoint = spawn_json_endpoint(r#"{"listings": 4}"#).await;
    let fx = fixture(FixtureOptions {
        intent: "search_property".to_string(),
        api_endpoint: Some(endpoint),
        ..Default::default()
    });

    let outcome = fx
        .orchestrator
        .process_text(request("find flats in Pune"))
        .await
        .unwrap();

    assert!(outcome.success);
    let api = outcome.api_response.as_ref().unwrap();
    assert!(api.success);
    assert_eq!(api.data.as_ref().unwrap()["listings"], json!(4));

    let records = fx
        .store
        .messages_for_session(&outcome.session_id, 10)
        .await
        .unwrap();
    assert_eq!(records[0].intent.as_deref(), Some("search_property"));
}

#[tokio::test]
async fn test_failed_action_still_generates_reply() {
    // Endpoint refuses connections, so the external call always fails
    let fx = fixture(FixtureOptions {
        intent: "search_property".to_string(),
        api_endpoint: Some("http://127.0.0.1:9/listings".to_string()),
        ..Default::default()
    });

    let outcome = fx
        .orchestrator
        .process_text(request("find flats in Pune"))
        .await
        .unwrap();

    // The turn still succeeds with a generated apology-style reply
    assert!(outcome.success);
    assert_eq!(fx.llm_calls.load(Ordering::SeqCst), 1);

    let api = outcome.api_response.unwrap();
    assert!(!api.success);
    assert!(api.error.is_some());

    let types: Vec<String> = fx.store.events().iter().map(|e| e.event_type.clone()).collect();
    assert!(types.contains(&"api_call".to_string()));
    assert!(types.contains(&"error".to_string()));
}

#[tokio::test]
async fn test_unknown_domain_returns_fallback() {
    let fx = fixture(FixtureOptions::default());

    let mut req = request("hello");
    req.domain = "no_such_domain".to_string();
    let outcome = fx.orchestrator.process_text(req).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(
        outcome.text_response,
        "I'm sorry, I couldn't process your request. Please try again."
    );

    let types: Vec<String> = fx.store.events().iter().map(|e| e.event_type.clone()).collect();
    assert!(types.contains(&"error".to_string()));
}

#[tokio::test]
async fn test_existing_session_accumulates_history() {
    let fx = fixture(FixtureOptions::default());

    let first = fx.orchestrator.process_text(request("hello")).await.unwrap();

    let mut req = request("tell me more");
    req.session_id = Some(first.session_id.clone());
    let second = fx.orchestrator.process_text(req).await.unwrap();

    assert_eq!(second.session_id, first.session_id);
    let session = fx.sessions.get(&first.session_id).await.unwrap().unwrap();
    assert_eq!(session.history.len(), 4);
    assert_eq!(session.message_count, 2);
}

#[tokio::test]
async fn test_stale_session_id_gets_fresh_session() {
    let fx = fixture(FixtureOptions::default());

    let mut req = request("hello");
    req.session_id = Some("expired-or-bogus".to_string());
    let outcome = fx.orchestrator.process_text(req).await.unwrap();

    assert!(outcome.success);
    assert_ne!(outcome.session_id, "expired-or-bogus");
}

#[tokio::test]
async fn test_health_check_is_idempotent() {
    let fx = fixture(FixtureOptions::default());

    let first = fx.orchestrator.health_check().await;
    let second = fx.orchestrator.health_check().await;

    assert!(first.healthy);
    assert_eq!(first.components, second.components);
    assert!(first.components["llm"]);
    assert!(first.components["cache_store"]);
    assert!(first.components["message_store"]);
}

#[tokio::test]
async fn test_voice_without_asr_is_an_error() {
    let fx = fixture(FixtureOptions::default());

    let result = fx
        .orchestrator
        .process_voice(VoiceRequest {
            audio: vec![0u8; 16],
            user_id: "user-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            domain: "real_estate".to_string(),
            session_id: None,
            auth_token: None,
            return_audio: true,
        })
        .await;

    assert!(result.is_err());
}
