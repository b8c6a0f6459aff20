//! Action plans and policy violations
//!
//! An `ActionPlan` is a per-request value object: built from the detected
//! intent, validated by the policy planner, then discarded. Only its
//! effects (messages, API calls) are persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Kind of a planned action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ApiCall,
    Respond,
}

/// One step the gateway intends to take for this turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    pub kind: ActionKind,
    pub name: String,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    #[serde(default)]
    pub requires_auth: bool,
}

/// Per-turn decision: detected intent, extracted slots, and whether an
/// external API call is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionPlan {
    pub intent: Option<String>,
    #[serde(default)]
    pub entities: HashMap<String, Value>,
    pub requires_api_call: bool,
    #[serde(default)]
    pub actions: Vec<PlannedAction>,
}

impl ActionPlan {
    pub fn for_intent(intent: impl Into<String>) -> Self {
        Self {
            intent: Some(intent.into()),
            ..Default::default()
        }
    }
}

/// Violation categories checked by the policy planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Unauthorized,
    RateLimit,
    DataValidation,
    Compliance,
    Safety,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::RateLimit => "rate_limit",
            Self::DataValidation => "data_validation",
            Self::Compliance => "compliance",
            Self::Safety => "safety",
        }
    }
}

/// Violation severity. Only `Error` blocks a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// A detected breach of a business rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub kind: ViolationKind,
    pub message: String,
    pub severity: Severity,
}

impl PolicyViolation {
    pub fn error(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_errors_block() {
        let err = PolicyViolation::error(ViolationKind::RateLimit, "limit exceeded");
        let warn = PolicyViolation::warning(ViolationKind::DataValidation, "empty slot");
        assert!(err.is_blocking());
        assert!(!warn.is_blocking());
    }

    #[test]
    fn test_violation_kind_strings() {
        assert_eq!(ViolationKind::RateLimit.as_str(), "rate_limit");
        assert_eq!(ViolationKind::Unauthorized.as_str(), "unauthorized");
    }

    #[test]
    fn test_plan_default_has_no_api_call() {
        let plan = ActionPlan::for_intent("greeting");
        assert!(!plan.requires_api_call);
        assert!(plan.actions.is_empty());
        assert_eq!(plan.intent.as_deref(), Some("greeting"));
    }
}
