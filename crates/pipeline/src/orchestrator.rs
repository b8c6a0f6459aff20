//! The request state machine
//!
//! One linear pass per request with conditional skips:
//! session resolve, moderate, parse intent, retrieve context, load
//! history, build plan, validate, execute action, generate, persist,
//! emit analytics, respond. Two terminal short-circuits exist
//! (moderation block, policy rejection); every other failure either
//! degrades in place or is caught once at the top and converted into
//! the domain's fallback response.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use vaas_adapter::{ApiCallResult, DataAdapter};
use vaas_analytics::AnalyticsSink;
use vaas_config::ConfigStore;
use vaas_core::{
    ContentModerator, ContextRetriever, Error, GenerateRequest, IntentParser, LanguageModel,
    Message, MessageRole, ModerationResult, NluResult, PlannedAction, PromptMessage, PromptRole,
    RetrievedChunk, Session, SpeechToText, TextToSpeech,
};
use vaas_core::{ActionKind, ActionPlan};
use vaas_policy::{redact_sensitive, PolicyContext, PolicyPlanner};
use vaas_session::SessionManager;
use vaas_storage::{MessageRecord, MessageStore, TtlStore};

use crate::PipelineError;

const BLOCKED_RESPONSE: &str = "I'm sorry, but I cannot process that request.";
const REJECTED_RESPONSE: &str = "I'm unable to complete that request at this time.";
const GENERIC_FALLBACK: &str = "I'm sorry, I couldn't process your request. Please try again.";
const MODERATION_FAILED_INTENT: &str = "moderation_failed";

/// One text-path request
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub text: String,
    pub user_id: String,
    pub tenant_id: String,
    pub domain: String,
    pub session_id: Option<String>,
    pub auth_token: Option<String>,
    pub return_audio: bool,
}

/// One voice-path request
#[derive(Debug, Clone)]
pub struct VoiceRequest {
    pub audio: Vec<u8>,
    pub user_id: String,
    pub tenant_id: String,
    pub domain: String,
    pub session_id: Option<String>,
    pub auth_token: Option<String>,
    pub return_audio: bool,
}

/// Terminal result of one turn. Always well-formed: `text_response` is
/// populated in every branch, including degraded ones.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub success: bool,
    pub text_response: String,
    pub intent: Option<String>,
    pub entities: HashMap<String, Value>,
    pub session_id: String,
    pub api_response: Option<ApiCallResult>,
    pub audio: Option<Vec<u8>>,
    pub metadata: HashMap<String, Value>,
}

impl ProcessOutcome {
    fn base(session_id: &str, elapsed_ms: u64, retrieved: usize) -> HashMap<String, Value> {
        HashMap::from([
            ("session_id".to_string(), json!(session_id)),
            ("response_time_ms".to_string(), json!(elapsed_ms)),
            ("retrieved_context_count".to_string(), json!(retrieved)),
        ])
    }
}

/// Aggregate health over every owned capability
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub healthy: bool,
    pub components: BTreeMap<String, bool>,
}

/// Everything the orchestrator composes. The server wires concrete
/// implementations in; tests inject mocks.
pub struct PipelineDeps {
    pub config_store: Arc<ConfigStore>,
    pub sessions: Arc<SessionManager>,
    pub policy: Arc<PolicyPlanner>,
    pub adapter: DataAdapter,
    pub analytics: AnalyticsSink,
    pub messages: Arc<dyn MessageStore>,
    pub kv: Arc<dyn TtlStore>,
    pub llm: Arc<dyn LanguageModel>,
    pub moderator: Arc<dyn ContentModerator>,
    pub nlu: Arc<dyn IntentParser>,
    pub retriever: Option<Arc<dyn ContextRetriever>>,
    pub asr: Option<Arc<dyn SpeechToText>>,
    pub tts: Option<Arc<dyn TextToSpeech>>,
    pub prompt_history_limit: usize,
}

pub struct Orchestrator {
    deps: PipelineDeps,
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Process one text turn.
    ///
    /// Errors escape only from session resolution; everything after is
    /// caught here and converted into the domain's fallback response.
    pub async fn process_text(
        &self,
        request: ProcessRequest,
    ) -> Result<ProcessOutcome, PipelineError> {
        let started = Instant::now();
        let session = self.resolve_session(&request).await?;

        self.deps
            .analytics
            .record_request(&request.tenant_id, &request.domain, &session.session_id)
            .await;

        match self.run_pipeline(&request, &session, started).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let error_type = classify_error(&err);
                tracing::error!(
                    tenant_id = %request.tenant_id,
                    session_id = %session.session_id,
                    error_type,
                    error = %err,
                    "pipeline failed, returning fallback response"
                );
                self.deps
                    .analytics
                    .record_error(&request.tenant_id, error_type, &err.to_string())
                    .await;

                let fallback = self
                    .deps
                    .config_store
                    .get(&request.domain)
                    .map(|d| d.fallback_response.clone())
                    .unwrap_or_else(|| GENERIC_FALLBACK.to_string());

                Ok(ProcessOutcome {
                    success: false,
                    text_response: fallback,
                    intent: None,
                    entities: HashMap::new(),
                    session_id: session.session_id.clone(),
                    api_response: None,
                    audio: None,
                    metadata: ProcessOutcome::base(
                        &session.session_id,
                        started.elapsed().as_millis() as u64,
                        0,
                    ),
                })
            }
        }
    }

    /// Process one voice turn: transcribe, run the text path, then
    /// synthesize the reply when asked to.
    pub async fn process_voice(
        &self,
        request: VoiceRequest,
    ) -> Result<ProcessOutcome, PipelineError> {
        let asr = self
            .deps
            .asr
            .as_ref()
            .ok_or_else(|| PipelineError::Capability("no speech-to-text configured".into()))?;

        let transcript = asr
            .transcribe(&request.audio)
            .await
            .map_err(|e| PipelineError::Transcription(e.to_string()))?;

        tracing::info!(
            tenant_id = %request.tenant_id,
            confidence = transcript.confidence,
            "audio transcribed"
        );

        let text_request = ProcessRequest {
            text: transcript.text.clone(),
            user_id: request.user_id,
            tenant_id: request.tenant_id,
            domain: request.domain,
            session_id: request.session_id,
            auth_token: request.auth_token,
            return_audio: request.return_audio,
        };

        let mut outcome = self.process_text(text_request).await?;
        outcome
            .metadata
            .insert("transcript".to_string(), json!(transcript.text));

        if outcome.audio.is_none() {
            if let Some(tts) = &self.deps.tts {
                if request.return_audio {
                    match tts.synthesize(&outcome.text_response).await {
                        Ok(audio) => outcome.audio = Some(audio),
                        Err(e) => {
                            tracing::warn!(error = %e, "synthesis failed, returning text only");
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn resolve_session(&self, request: &ProcessRequest) -> Result<Session, PipelineError> {
        if let Some(session_id) = &request.session_id {
            if let Some(session) = self.deps.sessions.get(session_id).await? {
                return Ok(session);
            }
            tracing::warn!(session_id = %session_id, "unknown session id supplied, creating fresh session");
        }
        Ok(self
            .deps
            .sessions
            .create(&request.user_id, &request.tenant_id, &request.domain)
            .await?)
    }

    async fn run_pipeline(
        &self,
        request: &ProcessRequest,
        session: &Session,
        started: Instant,
    ) -> Result<ProcessOutcome, Error> {
        let domain = self
            .deps
            .config_store
            .get(&request.domain)
            .ok_or_else(|| Error::DomainNotFound(request.domain.clone()))?;

        // MODERATE. A failing moderation capability fails open:
        // availability beats recall here, by explicit policy.
        let moderation = match self.deps.moderator.moderate(&request.text).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "moderation unavailable, treating content as safe"
                );
                ModerationResult::safe()
            }
        };

        // Every screened turn leaves a moderation event, safe or not
        self.deps
            .analytics
            .record_moderation(
                &request.tenant_id,
                &session.session_id,
                !moderation.is_safe,
                &moderation.flagged_categories,
            )
            .await;

        if !moderation.is_safe {
            return Ok(self.respond_blocked(request, session, &moderation, started));
        }

        // PARSE_INTENT. Transport failure degrades to the fallback
        // intent rather than aborting.
        let nlu = match self.deps.nlu.parse(&request.text).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "NLU unavailable, using fallback intent"
                );
                NluResult::fallback()
            }
        };

        // RETRIEVE_CONTEXT, only when the domain enables it. Failure
        // yields an empty context, never an abort.
        let mut retrieved: Vec<RetrievedChunk> = Vec::new();
        if domain.context_retrieval.enabled {
            if let Some(retriever) = &self.deps.retriever {
                match retriever
                    .search(
                        &request.text,
                        &request.tenant_id,
                        &domain.context_retrieval.collection_name,
                        domain.context_retrieval.top_k,
                        domain.context_retrieval.score_threshold,
                    )
                    .await
                {
                    Ok(chunks) => retrieved = chunks,
                    Err(e) => {
                        tracing::warn!(
                            session_id = %session.session_id,
                            error = %e,
                            "retrieval failed, continuing without context"
                        );
                    }
                }
            }
        }

        // LOAD_HISTORY
        let history = self
            .deps
            .sessions
            .history(&session.session_id, self.deps.prompt_history_limit)
            .await?;

        // BUILD_PLAN
        let intent_config = domain.get_intent(&nlu.intent);
        let plan = build_plan(&nlu, intent_config);

        // VALIDATE_PLAN
        let ctx = PolicyContext {
            auth_token: request.auth_token.clone(),
            moderation: Some(moderation.clone()),
            session_id: Some(session.session_id.clone()),
        };
        let (valid, violations) = self
            .deps
            .policy
            .validate(&request.tenant_id, &plan, &ctx)
            .await;

        if !valid {
            let messages: Vec<String> = violations.iter().map(|v| v.message.clone()).collect();
            let mut metadata = ProcessOutcome::base(
                &session.session_id,
                started.elapsed().as_millis() as u64,
                retrieved.len(),
            );
            metadata.insert("violations".to_string(), json!(messages));
            return Ok(ProcessOutcome {
                success: false,
                text_response: REJECTED_RESPONSE.to_string(),
                intent: plan.intent.clone(),
                entities: HashMap::new(),
                session_id: session.session_id.clone(),
                api_response: None,
                audio: None,
                metadata,
            });
        }

        // EXECUTE_ACTION. Any outcome is captured and described to the
        // generation step; a failed call does not abort the turn.
        let mut api_response: Option<ApiCallResult> = None;
        if plan.requires_api_call {
            if let Some(intent_config) = intent_config {
                let result = self
                    .deps
                    .adapter
                    .call_for_intent(intent_config, &plan.entities, request.auth_token.as_deref())
                    .await;
                self.deps
                    .analytics
                    .record_api_call(
                        &request.tenant_id,
                        intent_config.api_endpoint.as_deref().unwrap_or_default(),
                        result.success,
                        result.elapsed_ms,
                    )
                    .await;
                if !result.success {
                    self.deps
                        .analytics
                        .record_error(
                            &request.tenant_id,
                            "api_call_failed",
                            result.error.as_deref().unwrap_or("unknown"),
                        )
                        .await;
                }
                api_response = Some(result);
            }
        }

        // GENERATE_REPLY, always reached outside the two rejection
        // branches so the user-visible language stays natural. A
        // rendered intent template, when one exists, only suggests
        // phrasing to the model.
        let template_hint = intent_config
            .and_then(|c| c.response_template.as_deref())
            .map(|t| render_template_hint(t, &nlu.entities, api_response.as_ref()));
        let prompt = build_generation_prompt(
            &request.text,
            &nlu,
            &retrieved,
            api_response.as_ref(),
            template_hint.as_deref(),
        );
        let generate = GenerateRequest {
            system_prompt: domain.system_prompt.clone(),
            history: history_to_prompt(&history),
            prompt,
            max_tokens: None,
            temperature: None,
        };
        let reply = self.deps.llm.generate(generate).await?;

        // PERSIST both turns plus the durable user-turn record.
        let user_message = Message::user(&request.text)
            .with_intent(&nlu.intent)
            .with_entities(nlu.entities.clone());
        self.deps
            .sessions
            .append_message(&session.session_id, user_message)
            .await?;
        self.deps
            .sessions
            .append_message(
                &session.session_id,
                Message::assistant(&reply).with_intent(&nlu.intent),
            )
            .await?;
        if !nlu.entities.is_empty() {
            self.deps
                .sessions
                .update_context(&session.session_id, nlu.entities.clone())
                .await?;
        }

        let record = MessageRecord {
            id: Uuid::new_v4(),
            session_id: session.session_id.clone(),
            tenant_id: request.tenant_id.clone(),
            user_id: request.user_id.clone(),
            domain: request.domain.clone(),
            role: MessageRole::User.as_str().to_string(),
            content: request.text.clone(),
            intent: Some(nlu.intent.clone()),
            entities: Some(json!(redact_sensitive(&nlu.entities))),
            moderation_flagged: false,
            created_at: Utc::now(),
        };
        self.deps.messages.save_message(&record).await?;

        // EMIT_ANALYTICS
        self.deps
            .analytics
            .record_response(
                &request.tenant_id,
                &request.domain,
                &session.session_id,
                Some(&nlu.intent),
                started.elapsed(),
            )
            .await;

        // RESPOND
        Ok(ProcessOutcome {
            success: true,
            text_response: reply,
            intent: Some(nlu.intent.clone()),
            entities: nlu.entities,
            session_id: session.session_id.clone(),
            api_response,
            audio: None,
            metadata: ProcessOutcome::base(
                &session.session_id,
                started.elapsed().as_millis() as u64,
                retrieved.len(),
            ),
        })
    }

    /// Terminal moderation block. Skips NLU, retrieval, planning,
    /// action execution, and generation entirely.
    fn respond_blocked(
        &self,
        request: &ProcessRequest,
        session: &Session,
        moderation: &ModerationResult,
        started: Instant,
    ) -> ProcessOutcome {
        tracing::warn!(
            tenant_id = %request.tenant_id,
            session_id = %session.session_id,
            categories = ?moderation.flagged_categories,
            "input blocked by moderation"
        );

        let mut metadata =
            ProcessOutcome::base(&session.session_id, started.elapsed().as_millis() as u64, 0);
        metadata.insert(
            "flagged_categories".to_string(),
            json!(moderation.flagged_categories),
        );

        ProcessOutcome {
            success: false,
            text_response: BLOCKED_RESPONSE.to_string(),
            intent: Some(MODERATION_FAILED_INTENT.to_string()),
            entities: HashMap::new(),
            session_id: session.session_id.clone(),
            api_response: None,
            audio: None,
            metadata,
        }
    }

    /// Poll every owned capability. Overall health is the AND of all
    /// checks; repeated calls with unchanged collaborators are
    /// idempotent.
    pub async fn health_check(&self) -> HealthReport {
        let mut components = BTreeMap::new();
        components.insert("llm".to_string(), self.deps.llm.health_check().await);
        components.insert(
            "moderation".to_string(),
            self.deps.moderator.health_check().await,
        );
        components.insert("nlu".to_string(), self.deps.nlu.health_check().await);
        components.insert("cache_store".to_string(), self.deps.kv.health_check().await);
        components.insert(
            "message_store".to_string(),
            self.deps.messages.health_check().await,
        );
        if let Some(retriever) = &self.deps.retriever {
            components.insert("vector_store".to_string(), retriever.health_check().await);
        }
        if let Some(asr) = &self.deps.asr {
            components.insert("speech_to_text".to_string(), asr.health_check().await);
        }
        if let Some(tts) = &self.deps.tts {
            components.insert("text_to_speech".to_string(), tts.health_check().await);
        }

        let healthy = components.values().all(|ok| *ok);
        HealthReport {
            healthy,
            components,
        }
    }
}

fn classify_error(err: &Error) -> &'static str {
    match err {
        Error::DomainNotFound(_) => "domain_not_found",
        Error::Session(_) | Error::SessionNotFound(_) => "session_error",
        Error::Llm(_) => "llm_error",
        Error::Storage(_) => "storage_error",
        Error::Retrieval(_) => "retrieval_error",
        Error::Capability(_) => "capability_error",
        _ => "internal_error",
    }
}

/// Deterministic plan construction from the NLU result and the
/// domain's declaration for that intent.
fn build_plan(
    nlu: &NluResult,
    intent_config: Option<&vaas_config::IntentConfig>,
) -> ActionPlan {
    let mut plan = ActionPlan {
        intent: Some(nlu.intent.clone()),
        entities: nlu.entities.clone(),
        requires_api_call: false,
        actions: Vec::new(),
    };

    if let Some(config) = intent_config {
        if let Some(endpoint) = &config.api_endpoint {
            plan.requires_api_call = true;
            plan.actions.push(PlannedAction {
                kind: ActionKind::ApiCall,
                name: config.name.clone(),
                config: HashMap::from([
                    ("endpoint".to_string(), json!(endpoint)),
                    ("method".to_string(), json!(config.api_method.as_str())),
                ]),
                requires_auth: config.requires_auth,
            });
        }
    }

    plan
}

fn history_to_prompt(history: &[Message]) -> Vec<PromptMessage> {
    history
        .iter()
        .map(|m| {
            let role = match m.role {
                MessageRole::User => PromptRole::User,
                MessageRole::Assistant => PromptRole::Assistant,
            };
            PromptMessage::new(role, m.content.clone())
        })
        .collect()
}

/// Fill an intent's response template with entity values plus any
/// top-level fields of the action result. Unrendered placeholders stay
/// in place so the model can see what was missing.
fn render_template_hint(
    template: &str,
    entities: &HashMap<String, Value>,
    api_response: Option<&ApiCallResult>,
) -> String {
    let mut values = entities.clone();
    if let Some(result) = api_response {
        if let Some(Value::Object(fields)) = &result.data {
            for (key, value) in fields {
                values.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
    vaas_adapter::render_template(template, &values)
}

/// Compose the final user prompt: retrieved knowledge first, then the
/// raw message, then either the external action's outcome or the
/// detected intent.
fn build_generation_prompt(
    text: &str,
    nlu: &NluResult,
    retrieved: &[RetrievedChunk],
    api_response: Option<&ApiCallResult>,
    template_hint: Option<&str>,
) -> String {
    let mut parts = Vec::new();

    if !retrieved.is_empty() {
        let snippets: Vec<String> = retrieved
            .iter()
            .map(|chunk| format!("- {}", chunk.content))
            .collect();
        parts.push(format!("Relevant information:\n{}", snippets.join("\n")));
    }

    parts.push(format!("User message: {}", text));

    match api_response {
        Some(result) if result.success => {
            let data = result
                .data
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "{}".to_string());
            parts.push(format!(
                "The '{}' action completed successfully with this result: {}",
                nlu.intent, data
            ));
        }
        Some(result) => {
            parts.push(format!(
                "The '{}' action could not be completed ({}). Apologize briefly and suggest trying again later.",
                nlu.intent,
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
        None => {
            parts.push(format!(
                "Detected intent: {} (confidence {:.2})",
                nlu.intent, nlu.confidence
            ));
            if !nlu.entities.is_empty() {
                parts.push(format!(
                    "Extracted details: {}",
                    json!(nlu.entities)
                ));
            }
        }
    }

    if let Some(hint) = template_hint {
        parts.push(format!("Suggested phrasing: {}", hint));
    }

    parts.push("Respond naturally and helpfully to the user.".to_string());
    parts.join("\n\n")
}
