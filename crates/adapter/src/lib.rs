//! Data adapter: resilient outbound HTTP
//!
//! Executes domain-declared external actions. Transient failures are
//! retried with exponential backoff; every outcome comes back as a
//! structured `ApiCallResult` so the orchestrator can degrade
//! gracefully. Nothing recoverable ever raises past this boundary.
//!
//! Retries re-send the whole request, so they are only safe for
//! idempotent or tolerant endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use vaas_config::{HttpMethod, IntentConfig};

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Classification of a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    HttpError,
    Timeout,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpError => "http_error",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

/// Structured outcome of one external call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub elapsed_ms: u64,
}

impl ApiCallResult {
    fn ok(status_code: u16, data: Value, elapsed: Duration) -> Self {
        Self {
            success: true,
            status_code: Some(status_code),
            data: Some(data),
            error: None,
            error_kind: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    fn failed(
        status_code: Option<u16>,
        error: impl Into<String>,
        kind: ErrorKind,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: false,
            status_code,
            data: None,
            error: Some(error.into()),
            error_kind: Some(kind),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// One outbound request
#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    pub endpoint: String,
    pub method: HttpMethod,
    pub body: Option<Value>,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub auth_token: Option<String>,
}

impl ApiRequest {
    pub fn new(endpoint: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            ..Default::default()
        }
    }
}

/// Adapter configuration
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff for the given zero-based attempt, capped.
fn backoff_delay(config: &AdapterConfig, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    config
        .backoff_base
        .saturating_mul(factor as u32)
        .min(config.backoff_cap)
}

#[derive(Clone)]
pub struct DataAdapter {
    client: reqwest::Client,
    config: Arc<AdapterConfig>,
}

impl DataAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AdapterError::Client(e.to_string()))?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Execute one call with retry. Always returns a result, never an
    /// error.
    pub async fn call(&self, request: &ApiRequest) -> ApiCallResult {
        let started = Instant::now();
        let mut last_error: Option<(Option<u16>, String, ErrorKind)> = None;

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(&self.config, attempt - 1);
                tracing::debug!(
                    endpoint = %request.endpoint,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying external call"
                );
                tokio::time::sleep(delay).await;
            }

            match self.send_once(request).await {
                Ok((status, data)) => {
                    return ApiCallResult::ok(status, data, started.elapsed());
                }
                Err(err) => {
                    tracing::warn!(
                        endpoint = %request.endpoint,
                        attempt,
                        error = %err.1,
                        "external call failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        let (status, error, kind) =
            last_error.unwrap_or((None, "no attempts made".to_string(), ErrorKind::Unknown));
        ApiCallResult::failed(status, error, kind, started.elapsed())
    }

    async fn send_once(
        &self,
        request: &ApiRequest,
    ) -> Result<(u16, Value), (Option<u16>, String, ErrorKind)> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        };

        let mut builder = self.client.request(method, &request.endpoint);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(token) = &request.auth_token {
            builder = builder.bearer_auth(token);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                ErrorKind::Timeout
            } else {
                ErrorKind::Unknown
            };
            (None, e.to_string(), kind)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err((
                Some(status.as_u16()),
                format!("HTTP {} from {}", status.as_u16(), request.endpoint),
                ErrorKind::HttpError,
            ));
        }

        let text = response
            .text()
            .await
            .map_err(|e| (Some(status.as_u16()), e.to_string(), ErrorKind::Unknown))?;
        let data = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok((status.as_u16(), data))
    }

    /// Build and execute the call a domain intent declares. Entities go
    /// into the query string for GET/DELETE, the JSON body otherwise.
    pub async fn call_for_intent(
        &self,
        intent: &IntentConfig,
        entities: &HashMap<String, Value>,
        auth_token: Option<&str>,
    ) -> ApiCallResult {
        let endpoint = match &intent.api_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                return ApiCallResult::failed(
                    None,
                    format!("intent '{}' declares no api_endpoint", intent.name),
                    ErrorKind::Unknown,
                    Duration::ZERO,
                )
            }
        };

        let mut request = ApiRequest::new(endpoint, intent.api_method);
        request.headers = intent.api_headers.clone();
        request.auth_token = auth_token.map(str::to_string);

        match intent.api_method {
            HttpMethod::Get | HttpMethod::Delete => {
                request.query = entities
                    .iter()
                    .map(|(k, v)| {
                        let s = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), s)
                    })
                    .collect();
            }
            _ => {
                request.body = Some(Value::Object(
                    entities
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                ));
            }
        }

        self.call(&request).await
    }

    /// Fire all requests concurrently. One call's failure never
    /// affects the others.
    pub async fn batch_call(&self, requests: &[ApiRequest]) -> Vec<ApiCallResult> {
        join_all(requests.iter().map(|r| self.call(r))).await
    }
}

/// Substitute `{placeholder}` slots in a response template.
///
/// Unknown placeholders are left intact; no expression evaluation.
pub fn render_template(template: &str, values: &HashMap<String, Value>) -> String {
    let mut rendered = template.to_string();
    for (name, value) in values {
        let placeholder = format!("{{{}}}", name);
        if rendered.contains(&placeholder) {
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &replacement);
        }
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_template_basic() {
        let values = HashMap::from([
            ("city".to_string(), json!("Pune")),
            ("bedrooms".to_string(), json!(3)),
        ]);
        let rendered = render_template("Found {bedrooms} BHK options in {city}.", &values);
        assert_eq!(rendered, "Found 3 BHK options in Pune.");
    }

    #[test]
    fn test_render_template_unknown_placeholder_kept() {
        let values = HashMap::from([("city".to_string(), json!("Pune"))]);
        let rendered = render_template("Hi {user_name}, searching {city}.", &values);
        assert_eq!(rendered, "Hi {user_name}, searching Pune.");
    }

    #[test]
    fn test_render_template_no_placeholders() {
        let rendered = render_template("Hello there!", &HashMap::new());
        assert_eq!(rendered, "Hello there!");
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = AdapterConfig::default();
        assert_eq!(backoff_delay(&config, 0), Duration::from_secs(2));
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(4));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(8));
        // Capped at 10s from here on
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(10));
        assert_eq!(backoff_delay(&config, 8), Duration::from_secs(10));
    }

    #[test]
    fn test_error_kind_wire_names() {
        assert_eq!(ErrorKind::HttpError.as_str(), "http_error");
        assert_eq!(
            serde_json::to_string(&ErrorKind::Timeout).unwrap(),
            "\"timeout\""
        );
    }

    #[tokio::test]
    async fn test_batch_call_isolates_failures() {
        let adapter = DataAdapter::new(AdapterConfig {
            max_retries: 1,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        })
        .unwrap();

        // Port 9 (discard) refuses connections; both calls fail on
        // their own without poisoning each other
        let requests = vec![
            ApiRequest::new("http://127.0.0.1:9/a", HttpMethod::Get),
            ApiRequest::new("http://127.0.0.1:9/b", HttpMethod::Get),
        ];
        let results = adapter.batch_call(&requests).await;
        assert_eq!(results.len(), 2);
        for result in results {
            assert!(!result.success);
            assert!(result.error_kind.is_some());
        }
    }

    #[tokio::test]
    async fn test_call_for_intent_without_endpoint() {
        let adapter = DataAdapter::new(AdapterConfig::default()).unwrap();
        let intent = IntentConfig {
            name: "greeting".to_string(),
            entities: vec![],
            api_endpoint: None,
            api_method: HttpMethod::default(),
            api_headers: HashMap::new(),
            response_template: None,
            requires_auth: false,
        };
        let result = adapter.call_for_intent(&intent, &HashMap::new(), None).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Unknown));
    }
}
