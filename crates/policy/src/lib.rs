//! Policy planner
//!
//! Validates a proposed action plan with four independent,
//! order-insensitive checks: rate limiting, authorization, data
//! completeness, and safety. Violations are concatenated; a plan is
//! valid iff no error-severity violation exists. Warnings surface to
//! the caller but never block.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use vaas_core::{ActionPlan, ModerationResult, PolicyViolation, ViolationKind};
use vaas_storage::TtlStore;

const RATE_LIMIT_KEY_PREFIX: &str = "vaas:ratelimit:";
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Field names whose values must never reach logs or durable storage.
const SENSITIVE_FIELDS: &[&str] = &[
    "ssn",
    "password",
    "credit_card",
    "card_number",
    "cvv",
    "pin",
    "aadhaar",
    "pan",
];

/// Per-tenant fixed-window request counter.
///
/// Counters live in the shared TTL store, so every server instance sees
/// the same window.
pub struct RateLimiter {
    store: Arc<dyn TtlStore>,
    limit_per_minute: u64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn TtlStore>, limit_per_minute: u64) -> Self {
        Self {
            store,
            limit_per_minute,
        }
    }

    /// Count this request against the tenant's window. Returns true
    /// when the request is within the limit. A store failure fails
    /// open: availability wins over precise throttling.
    pub async fn check(&self, tenant_id: &str) -> bool {
        let key = format!("{}{}", RATE_LIMIT_KEY_PREFIX, tenant_id);
        match self.store.incr_with_window(&key, RATE_LIMIT_WINDOW).await {
            Ok(count) => count <= self.limit_per_minute,
            Err(e) => {
                tracing::warn!(tenant_id = %tenant_id, error = %e, "rate limit store unavailable, failing open");
                true
            }
        }
    }
}

/// Per-request validation context handed to the planner.
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    pub auth_token: Option<String>,
    pub moderation: Option<ModerationResult>,
    pub session_id: Option<String>,
}

pub struct PolicyPlanner {
    rate_limiter: RateLimiter,
}

impl PolicyPlanner {
    pub fn new(store: Arc<dyn TtlStore>, rate_limit_per_minute: u64) -> Self {
        Self {
            rate_limiter: RateLimiter::new(store, rate_limit_per_minute),
        }
    }

    /// Run all checks. Returns the validity verdict plus every
    /// violation found, warnings included.
    pub async fn validate(
        &self,
        tenant_id: &str,
        plan: &ActionPlan,
        ctx: &PolicyContext,
    ) -> (bool, Vec<PolicyViolation>) {
        let mut violations = Vec::new();

        self.check_rate_limit(tenant_id, &mut violations).await;
        self.check_authorization(plan, ctx, &mut violations);
        self.check_data(plan, &mut violations);
        self.check_safety(ctx, &mut violations);

        let is_valid = !violations.iter().any(|v| v.is_blocking());
        if !is_valid {
            tracing::warn!(
                tenant_id = %tenant_id,
                violations = violations.len(),
                "plan rejected by policy"
            );
        }
        (is_valid, violations)
    }

    async fn check_rate_limit(&self, tenant_id: &str, violations: &mut Vec<PolicyViolation>) {
        if !self.rate_limiter.check(tenant_id).await {
            violations.push(PolicyViolation::error(
                ViolationKind::RateLimit,
                format!(
                    "tenant '{}' exceeded {} requests per minute",
                    tenant_id, self.rate_limiter.limit_per_minute
                ),
            ));
        }
    }

    fn check_authorization(
        &self,
        plan: &ActionPlan,
        ctx: &PolicyContext,
        violations: &mut Vec<PolicyViolation>,
    ) {
        for action in &plan.actions {
            if action.requires_auth && ctx.auth_token.is_none() {
                violations.push(PolicyViolation::error(
                    ViolationKind::Unauthorized,
                    format!("action '{}' requires an auth token", action.name),
                ));
            }
        }
    }

    fn check_data(&self, plan: &ActionPlan, violations: &mut Vec<PolicyViolation>) {
        if plan.intent.is_none() {
            violations.push(PolicyViolation::error(
                ViolationKind::DataValidation,
                "plan has no detected intent",
            ));
        }
        for (name, value) in &plan.entities {
            let empty = match value {
                Value::Null => true,
                Value::String(s) => s.trim().is_empty(),
                _ => false,
            };
            if empty {
                violations.push(PolicyViolation::warning(
                    ViolationKind::DataValidation,
                    format!("entity '{}' has an empty value", name),
                ));
            }
        }
    }

    fn check_safety(&self, ctx: &PolicyContext, violations: &mut Vec<PolicyViolation>) {
        if let Some(moderation) = &ctx.moderation {
            if !moderation.is_safe {
                violations.push(PolicyViolation::error(
                    ViolationKind::Safety,
                    format!(
                        "content flagged by moderation: {}",
                        moderation.flagged_categories.join(", ")
                    ),
                ));
            }
        }
    }
}

/// Replace sensitive field values before logging or persisting.
pub fn redact_sensitive(data: &HashMap<String, Value>) -> HashMap<String, Value> {
    data.iter()
        .map(|(k, v)| {
            if SENSITIVE_FIELDS.contains(&k.to_lowercase().as_str()) {
                (k.clone(), Value::String("[REDACTED]".to_string()))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}
