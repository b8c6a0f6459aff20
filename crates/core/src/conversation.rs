//! Conversation state: sessions, messages, bounded history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Hard cap on per-session history length. Oldest entries are evicted first.
pub const MAX_HISTORY: usize = 50;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single conversation turn entry. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<HashMap<String, Value>>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            intent: None,
            entities: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            intent: None,
            entities: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_entities(mut self, entities: HashMap<String, Value>) -> Self {
        self.entities = Some(entities);
        self
    }
}

/// One active conversation, keyed by `session_id`.
///
/// Owned by the session store; callers mutate it only through manager
/// accessors, never through a cached copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub domain: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of user turns; assistant replies do not count
    pub message_count: u64,
    /// Partially-filled slots carried across turns
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Bounded history, most-recent-last
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            domain: domain.into(),
            created_at: now,
            updated_at: now,
            message_count: 0,
            context: HashMap::new(),
            history: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Append a message, evicting from the front once the cap is reached.
    pub fn push_message(&mut self, message: Message) {
        if message.role == MessageRole::User {
            self.message_count += 1;
        }
        self.history.push(message);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.updated_at = Utc::now();
    }

    /// Last `limit` messages in order, most-recent-last.
    pub fn recent_history(&self, limit: usize) -> &[Message] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }

    /// Merge slot values into the carried context.
    pub fn merge_context(&mut self, updates: HashMap<String, Value>) {
        self.context.extend(updates);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_history_capped_at_max() {
        let mut session = Session::new("u1", "t1", "real_estate");
        for i in 0..120 {
            session.push_message(Message::user(format!("msg {}", i)));
        }
        assert_eq!(session.history.len(), MAX_HISTORY);
        assert_eq!(session.message_count, 120);
        // Assistant replies never bump the turn count
        session.push_message(Message::assistant("reply"));
        assert_eq!(session.message_count, 120);
        // Oldest evicted first, newest last
        assert_eq!(session.history.last().unwrap().content, "msg 119");
        assert_eq!(session.history.first().unwrap().content, "msg 70");
    }

    #[test]
    fn test_recent_history_order() {
        let mut session = Session::new("u1", "t1", "real_estate");
        for i in 0..5 {
            session.push_message(Message::user(format!("msg {}", i)));
        }
        let recent = session.recent_history(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "msg 2");
        assert_eq!(recent[2].content, "msg 4");

        // Limit larger than history returns everything
        assert_eq!(session.recent_history(100).len(), 5);
    }

    #[test]
    fn test_merge_context_overwrites() {
        let mut session = Session::new("u1", "t1", "real_estate");
        session.merge_context(HashMap::from([("bedrooms".to_string(), json!("2"))]));
        session.merge_context(HashMap::from([
            ("bedrooms".to_string(), json!("3")),
            ("city".to_string(), json!("Mumbai")),
        ]));
        assert_eq!(session.context["bedrooms"], json!("3"));
        assert_eq!(session.context["city"], json!("Mumbai"));
    }

    #[test]
    fn test_message_roundtrip_serde() {
        let msg = Message::user("hello").with_intent("greeting");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "hello");
        assert_eq!(back.intent.as_deref(), Some("greeting"));
        assert_eq!(back.role, MessageRole::User);
    }
}
