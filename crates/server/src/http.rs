//! REST endpoints
//!
//! Two route groups: a public group (`/health`, `/metrics`) and the
//! authenticated `/api/v1` group that fronts the orchestrator.

use std::time::Duration;

use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderValue, Method, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use vaas_pipeline::{ProcessOutcome, ProcessRequest, VoiceRequest};

use crate::auth::{authenticate, AuthedTenant};
use crate::state::AppState;
use crate::ServerError;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(&state.settings.server.cors_origins);
    let timeout = Duration::from_secs(state.settings.server.request_timeout_secs);

    let api = Router::new()
        .route("/api/v1/process/text", post(process_text))
        .route("/api/v1/process/voice", post(process_voice))
        .route("/api/v1/domains", get(list_domains))
        .route("/api/v1/domains/:name", get(get_domain))
        .route("/api/v1/domains/:name/reload", post(reload_domain))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .merge(api)
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        tracing::warn!("no CORS origins configured, allowing all origins");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %origin, "skipping invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

#[derive(Debug, Deserialize)]
struct TextRequest {
    text: String,
    user_id: String,
    domain: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default)]
    return_audio: bool,
}

#[derive(Debug, Serialize)]
struct ProcessResponse {
    success: bool,
    text_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    intent: Option<String>,
    entities: HashMap<String, Value>,
    session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<String>,
    metadata: HashMap<String, Value>,
}

impl From<ProcessOutcome> for ProcessResponse {
    fn from(outcome: ProcessOutcome) -> Self {
        Self {
            success: outcome.success,
            text_response: outcome.text_response,
            intent: outcome.intent,
            entities: outcome.entities,
            session_id: outcome.session_id,
            audio: outcome
                .audio
                .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes)),
            metadata: outcome.metadata,
        }
    }
}

async fn process_text(
    State(state): State<AppState>,
    Extension(AuthedTenant(tenant)): Extension<AuthedTenant>,
    Json(body): Json<TextRequest>,
) -> Result<Json<ProcessResponse>, ServerError> {
    if body.text.trim().is_empty() {
        return Err(ServerError::InvalidRequest("text must not be empty".to_string()));
    }
    if body.user_id.trim().is_empty() {
        return Err(ServerError::InvalidRequest("user_id must not be empty".to_string()));
    }

    let outcome = state
        .orchestrator
        .process_text(ProcessRequest {
            text: body.text,
            user_id: body.user_id,
            tenant_id: tenant.tenant_id,
            domain: body.domain,
            session_id: body.session_id,
            auth_token: body.auth_token,
            return_audio: body.return_audio,
        })
        .await?;

    Ok(Json(outcome.into()))
}

async fn process_voice(
    State(state): State<AppState>,
    Extension(AuthedTenant(tenant)): Extension<AuthedTenant>,
    mut multipart: Multipart,
) -> Result<Json<ProcessResponse>, ServerError> {
    let mut audio: Option<Vec<u8>> = None;
    let mut user_id = String::new();
    let mut domain = String::new();
    let mut session_id: Option<String> = None;
    let mut auth_token: Option<String> = None;
    let mut return_audio = true;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::InvalidRequest(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::InvalidRequest(format!("unreadable audio part: {}", e)))?;
                audio = Some(bytes.to_vec());
            }
            "user_id" => user_id = field.text().await.unwrap_or_default(),
            "domain" => domain = field.text().await.unwrap_or_default(),
            "session_id" => session_id = Some(field.text().await.unwrap_or_default()),
            "auth_token" => auth_token = Some(field.text().await.unwrap_or_default()),
            "return_audio" => {
                let value = field.text().await.unwrap_or_default();
                return_audio = matches!(value.as_str(), "true" | "1" | "yes");
            }
            _ => {}
        }
    }

    let audio = audio
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ServerError::InvalidRequest("missing audio part".to_string()))?;
    if user_id.trim().is_empty() || domain.trim().is_empty() {
        return Err(ServerError::InvalidRequest(
            "user_id and domain fields are required".to_string(),
        ));
    }

    let outcome = state
        .orchestrator
        .process_voice(VoiceRequest {
            audio,
            user_id,
            tenant_id: tenant.tenant_id,
            domain,
            session_id: session_id.filter(|s| !s.is_empty()),
            auth_token,
            return_audio,
        })
        .await?;

    Ok(Json(outcome.into()))
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let report = state.orchestrator.health_check().await;
    let status_code = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if report.healthy { "healthy" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "components": report.components,
        })),
    )
}

async fn list_domains(State(state): State<AppState>) -> Json<Value> {
    let domains = state.config_store.list_domains();
    Json(serde_json::json!({
        "count": domains.len(),
        "domains": domains,
    }))
}

async fn get_domain(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let config = state
        .config_store
        .get(&name)
        .ok_or_else(|| ServerError::NotFound(format!("domain '{}'", name)))?;
    let value = serde_json::to_value(&*config)
        .map_err(|e| ServerError::Internal(format!("domain serialization failed: {}", e)))?;
    Ok(Json(value))
}

async fn reload_domain(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ServerError> {
    match state.config_store.reload(&name) {
        Ok(config) => Ok(Json(serde_json::json!({
            "status": "reloaded",
            "domain": config.domain_name,
            "intents": config.intents.len(),
        }))),
        Err(vaas_config::ConfigError::FileNotFound(_)) => {
            Err(ServerError::NotFound(format!("domain '{}'", name)))
        }
        Err(e) => Err(ServerError::Internal(format!("domain reload failed: {}", e))),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}
