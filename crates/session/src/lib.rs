//! Session manager
//!
//! Conversational state keyed by session id, backed by the TTL store.
//! Every mutation is a read-modify-write that refreshes the idle TTL.
//! At most one in-flight request per session is assumed; concurrent
//! writers to the same session resolve last-write-wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use vaas_core::{Message, Session};
use vaas_storage::{PersistenceError, TtlStore};

const SESSION_KEY_PREFIX: &str = "vaas:session:";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Store error: {0}")]
    Store(#[from] PersistenceError),

    #[error("Corrupt session record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl From<SessionError> for vaas_core::Error {
    fn from(err: SessionError) -> Self {
        vaas_core::Error::Session(err.to_string())
    }
}

pub struct SessionManager {
    store: Arc<dyn TtlStore>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn TtlStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(session_id: &str) -> String {
        format!("{}{}", SESSION_KEY_PREFIX, session_id)
    }

    async fn write(&self, session: &Session) -> Result<(), SessionError> {
        let json = serde_json::to_string(session)?;
        self.store
            .set(&Self::key(&session.session_id), &json, self.ttl)
            .await?;
        Ok(())
    }

    /// Create a new session and persist it.
    pub async fn create(
        &self,
        user_id: &str,
        tenant_id: &str,
        domain: &str,
    ) -> Result<Session, SessionError> {
        let session = Session::new(user_id, tenant_id, domain);
        self.write(&session).await?;
        tracing::info!(
            session_id = %session.session_id,
            tenant_id = %tenant_id,
            domain = %domain,
            "session created"
        );
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        match self.store.get(&Self::key(session_id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Append a message, enforcing the history cap. Returns false when
    /// the session is unknown or expired.
    pub async fn append_message(
        &self,
        session_id: &str,
        message: Message,
    ) -> Result<bool, SessionError> {
        let mut session = match self.get(session_id).await? {
            Some(session) => session,
            None => return Ok(false),
        };
        session.push_message(message);
        self.write(&session).await?;
        Ok(true)
    }

    /// Merge slot values into the carried context.
    pub async fn update_context(
        &self,
        session_id: &str,
        updates: HashMap<String, Value>,
    ) -> Result<bool, SessionError> {
        let mut session = match self.get(session_id).await? {
            Some(session) => session,
            None => return Ok(false),
        };
        session.merge_context(updates);
        self.write(&session).await?;
        Ok(true)
    }

    /// Last `limit` messages, most-recent-last. Unknown sessions yield
    /// an empty history.
    pub async fn history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, SessionError> {
        Ok(self
            .get(session_id)
            .await?
            .map(|s| s.recent_history(limit).to_vec())
            .unwrap_or_default())
    }

    pub async fn context(
        &self,
        session_id: &str,
    ) -> Result<HashMap<String, Value>, SessionError> {
        Ok(self
            .get(session_id)
            .await?
            .map(|s| s.context)
            .unwrap_or_default())
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        Ok(self.store.delete(&Self::key(session_id)).await?)
    }

    pub async fn extend_ttl(
        &self,
        session_id: &str,
        ttl: Duration,
    ) -> Result<bool, SessionError> {
        Ok(self.store.expire(&Self::key(session_id), ttl).await?)
    }

    pub async fn health_check(&self) -> bool {
        self.store.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vaas_core::MAX_HISTORY;
    use vaas_storage::InMemoryTtlStore;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(InMemoryTtlStore::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let manager = manager();
        let session = manager.create("u1", "t1", "real_estate").await.unwrap();

        let loaded = manager.get(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.user_id, "u1");
        assert_eq!(loaded.tenant_id, "t1");
        assert_eq!(loaded.message_count, 0);
        assert!(manager.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_updates_count_and_history() {
        let manager = manager();
        let session = manager.create("u1", "t1", "real_estate").await.unwrap();

        assert!(manager
            .append_message(&session.session_id, Message::user("hello"))
            .await
            .unwrap());
        assert!(manager
            .append_message(&session.session_id, Message::assistant("hi there"))
            .await
            .unwrap());

        let loaded = manager.get(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.message_count, 1);
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(loaded.history[1].content, "hi there");

        // Appends to unknown sessions are a no-op
        assert!(!manager
            .append_message("missing", Message::user("x"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_history_cap_survives_persistence() {
        let manager = manager();
        let session = manager.create("u1", "t1", "real_estate").await.unwrap();

        for i in 0..(MAX_HISTORY + 10) {
            manager
                .append_message(&session.session_id, Message::user(format!("msg {}", i)))
                .await
                .unwrap();
        }

        let loaded = manager.get(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.history.len(), MAX_HISTORY);
        assert_eq!(
            loaded.history.last().unwrap().content,
            format!("msg {}", MAX_HISTORY + 9)
        );
    }

    #[tokio::test]
    async fn test_history_limit_most_recent_last() {
        let manager = manager();
        let session = manager.create("u1", "t1", "real_estate").await.unwrap();
        for i in 0..8 {
            manager
                .append_message(&session.session_id, Message::user(format!("msg {}", i)))
                .await
                .unwrap();
        }

        let recent = manager.history(&session.session_id, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[2].content, "msg 7");
        assert!(manager.history("missing", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_context_merges() {
        let manager = manager();
        let session = manager.create("u1", "t1", "real_estate").await.unwrap();

        manager
            .update_context(
                &session.session_id,
                HashMap::from([("city".to_string(), json!("Pune"))]),
            )
            .await
            .unwrap();
        manager
            .update_context(
                &session.session_id,
                HashMap::from([("bedrooms".to_string(), json!("3"))]),
            )
            .await
            .unwrap();

        let context = manager.context(&session.session_id).await.unwrap();
        assert_eq!(context["city"], json!("Pune"));
        assert_eq!(context["bedrooms"], json!("3"));
    }

    #[tokio::test]
    async fn test_delete_and_extend_ttl() {
        let manager = manager();
        let session = manager.create("u1", "t1", "real_estate").await.unwrap();

        assert!(manager
            .extend_ttl(&session.session_id, Duration::from_secs(120))
            .await
            .unwrap());
        assert!(manager.delete(&session.session_id).await.unwrap());
        assert!(manager.get(&session.session_id).await.unwrap().is_none());
        assert!(!manager
            .extend_ttl(&session.session_id, Duration::from_secs(120))
            .await
            .unwrap());
    }
}
