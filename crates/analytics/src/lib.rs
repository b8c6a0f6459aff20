//! Analytics sink
//!
//! Records request/response/error/moderation/api-call events as
//! Prometheus metrics plus best-effort durable rows. Recording never
//! blocks the pipeline outcome and never raises: a failed write is
//! logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use vaas_storage::{EventRecord, EventStore};

#[derive(Clone)]
pub struct AnalyticsSink {
    events: Arc<dyn EventStore>,
    enabled: bool,
    persist_events: bool,
}

impl AnalyticsSink {
    pub fn new(events: Arc<dyn EventStore>, enabled: bool, persist_events: bool) -> Self {
        Self {
            events,
            enabled,
            persist_events,
        }
    }

    async fn persist(&self, event: EventRecord) {
        if !self.persist_events {
            return;
        }
        if let Err(e) = self.events.log_event(&event).await {
            tracing::warn!(
                event_type = %event.event_type,
                tenant_id = %event.tenant_id,
                error = %e,
                "analytics event dropped"
            );
        }
    }

    pub async fn record_request(&self, tenant_id: &str, domain: &str, session_id: &str) {
        if !self.enabled {
            return;
        }
        metrics::counter!(
            "vaas_requests_total",
            "tenant" => tenant_id.to_string(),
            "domain" => domain.to_string()
        )
        .increment(1);

        self.persist(
            EventRecord::new("request", tenant_id)
                .with_domain(domain)
                .with_session(session_id),
        )
        .await;
    }

    pub async fn record_response(
        &self,
        tenant_id: &str,
        domain: &str,
        session_id: &str,
        intent: Option<&str>,
        elapsed: Duration,
    ) {
        if !self.enabled {
            return;
        }
        metrics::counter!(
            "vaas_responses_total",
            "tenant" => tenant_id.to_string(),
            "domain" => domain.to_string()
        )
        .increment(1);
        metrics::histogram!(
            "vaas_response_seconds",
            "domain" => domain.to_string()
        )
        .record(elapsed.as_secs_f64());

        self.persist(
            EventRecord::new("response", tenant_id)
                .with_domain(domain)
                .with_session(session_id)
                .with_payload(json!({
                    "intent": intent,
                    "elapsed_ms": elapsed.as_millis() as u64,
                })),
        )
        .await;
    }

    pub async fn record_error(&self, tenant_id: &str, error_type: &str, detail: &str) {
        if !self.enabled {
            return;
        }
        metrics::counter!(
            "vaas_errors_total",
            "tenant" => tenant_id.to_string(),
            "error_type" => error_type.to_string()
        )
        .increment(1);

        self.persist(
            EventRecord::new("error", tenant_id).with_payload(json!({
                "error_type": error_type,
                "detail": detail,
            })),
        )
        .await;
    }

    /// One moderation event per screened turn; the flag counter moves
    /// only for flagged content.
    pub async fn record_moderation(
        &self,
        tenant_id: &str,
        session_id: &str,
        flagged: bool,
        categories: &[String],
    ) {
        if !self.enabled {
            return;
        }
        if flagged {
            metrics::counter!(
                "vaas_moderation_flags_total",
                "tenant" => tenant_id.to_string()
            )
            .increment(1);
        }

        self.persist(
            EventRecord::new("moderation", tenant_id)
                .with_session(session_id)
                .with_payload(json!({
                    "flagged": flagged,
                    "categories": categories,
                })),
        )
        .await;
    }

    pub async fn record_api_call(
        &self,
        tenant_id: &str,
        endpoint: &str,
        success: bool,
        elapsed_ms: u64,
    ) {
        if !self.enabled {
            return;
        }
        metrics::counter!(
            "vaas_api_calls_total",
            "tenant" => tenant_id.to_string(),
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);

        self.persist(
            EventRecord::new("api_call", tenant_id).with_payload(json!({
                "endpoint": endpoint,
                "success": success,
                "elapsed_ms": elapsed_ms,
            })),
        )
        .await;
    }

    /// Arbitrary payload escape hatch used by the orchestrator's
    /// top-level error handler.
    pub async fn record_event(&self, event_type: &str, tenant_id: &str, payload: Value) {
        if !self.enabled {
            return;
        }
        self.persist(EventRecord::new(event_type, tenant_id).with_payload(payload))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaas_storage::InMemoryStore;

    #[tokio::test]
    async fn test_events_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let sink = AnalyticsSink::new(store.clone(), true, true);

        sink.record_request("t1", "real_estate", "s1").await;
        sink.record_response("t1", "real_estate", "s1", Some("greeting"), Duration::from_millis(42))
            .await;
        sink.record_error("t1", "llm_error", "boom").await;

        let events = store.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, "request");
        assert_eq!(events[1].event_type, "response");
        assert_eq!(events[2].event_type, "error");
    }

    #[tokio::test]
    async fn test_disabled_sink_records_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let sink = AnalyticsSink::new(store.clone(), false, true);

        sink.record_request("t1", "real_estate", "s1").await;
        sink.record_moderation("t1", "s1", true, &["toxicity".to_string()])
            .await;

        assert!(store.events().is_empty());
    }

    #[tokio::test]
    async fn test_moderation_recorded_for_safe_and_flagged_turns() {
        let store = Arc::new(InMemoryStore::new());
        let sink = AnalyticsSink::new(store.clone(), true, true);

        sink.record_moderation("t1", "s1", false, &[]).await;
        sink.record_moderation("t1", "s1", true, &["toxicity".to_string()])
            .await;

        let events = store.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload["flagged"], serde_json::json!(false));
        assert_eq!(events[1].payload["flagged"], serde_json::json!(true));
        assert_eq!(
            events[1].payload["categories"],
            serde_json::json!(["toxicity"])
        );
    }

    #[tokio::test]
    async fn test_persistence_opt_out_keeps_metrics_only() {
        let store = Arc::new(InMemoryStore::new());
        let sink = AnalyticsSink::new(store.clone(), true, false);

        sink.record_api_call("t1", "https://api.example.com", true, 120)
            .await;

        assert!(store.events().is_empty());
    }
}
