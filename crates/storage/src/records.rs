//! Durable record types and store traits
//!
//! The relational stores hold the audit trail: every user turn, tenant
//! registrations, and analytics events. ScyllaDB backs production; the
//! in-memory implementation covers tests and single-node runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::PersistenceError;
use vaas_core::Tenant;

/// One persisted conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub session_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub domain: String,
    pub role: String,
    pub content: String,
    pub intent: Option<String>,
    pub entities: Option<Value>,
    pub moderation_flagged: bool,
    pub created_at: DateTime<Utc>,
}

/// One analytics event row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub event_type: String,
    pub tenant_id: String,
    pub domain: Option<String>,
    pub session_id: Option<String>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(event_type: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            tenant_id: tenant_id.into(),
            domain: None,
            session_id: None,
            payload: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Durable conversation turn storage
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save_message(&self, record: &MessageRecord) -> Result<(), PersistenceError>;

    async fn messages_for_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, PersistenceError>;

    async fn health_check(&self) -> bool;
}

/// Tenant registry
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), PersistenceError>;

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, PersistenceError>;

    /// Resolve an API key to its tenant. Inactive tenants resolve to None.
    async fn verify_api_key(&self, api_key: &str) -> Result<Option<Tenant>, PersistenceError>;

    /// Mark a tenant inactive. Its key stops verifying immediately.
    /// Returns false for unknown tenants.
    async fn deactivate_tenant(&self, tenant_id: &str) -> Result<bool, PersistenceError>;

    /// Issue a fresh API key, invalidating the old one. Returns the
    /// new key, or None for unknown tenants.
    async fn regenerate_api_key(&self, tenant_id: &str)
        -> Result<Option<String>, PersistenceError>;
}

/// Analytics event storage
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn log_event(&self, event: &EventRecord) -> Result<(), PersistenceError>;
}

/// In-memory implementation of all three stores
#[derive(Default)]
pub struct InMemoryStore {
    messages: Mutex<Vec<MessageRecord>>,
    tenants: Mutex<HashMap<String, Tenant>>,
    keys: Mutex<HashMap<String, String>>,
    events: Mutex<Vec<EventRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().clone()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn save_message(&self, record: &MessageRecord) -> Result<(), PersistenceError> {
        self.messages.lock().push(record.clone());
        Ok(())
    }

    async fn messages_for_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, PersistenceError> {
        let messages = self.messages.lock();
        let mut matching: Vec<MessageRecord> = messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        matching.sort_by_key(|m| m.created_at);
        let start = matching.len().saturating_sub(limit);
        Ok(matching.split_off(start))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[async_trait]
impl TenantStore for InMemoryStore {
    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), PersistenceError> {
        self.keys
            .lock()
            .insert(tenant.api_key.clone(), tenant.tenant_id.clone());
        self.tenants
            .lock()
            .insert(tenant.tenant_id.clone(), tenant.clone());
        Ok(())
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, PersistenceError> {
        Ok(self.tenants.lock().get(tenant_id).cloned())
    }

    async fn verify_api_key(&self, api_key: &str) -> Result<Option<Tenant>, PersistenceError> {
        // Scan every key with a constant-time compare so lookup timing
        // does not leak key prefixes
        let tenant_id = {
            let keys = self.keys.lock();
            keys.iter()
                .find(|(known, _)| constant_time_eq(known, api_key))
                .map(|(_, id)| id.clone())
        };
        let tenant_id = match tenant_id {
            Some(id) => id,
            None => return Ok(None),
        };
        let tenant = self.tenants.lock().get(&tenant_id).cloned();
        Ok(tenant.filter(|t| t.is_active))
    }

    async fn deactivate_tenant(&self, tenant_id: &str) -> Result<bool, PersistenceError> {
        match self.tenants.lock().get_mut(tenant_id) {
            Some(tenant) => {
                tenant.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn regenerate_api_key(
        &self,
        tenant_id: &str,
    ) -> Result<Option<String>, PersistenceError> {
        let mut tenants = self.tenants.lock();
        let tenant = match tenants.get_mut(tenant_id) {
            Some(tenant) => tenant,
            None => return Ok(None),
        };
        let new_key = vaas_core::generate_api_key(tenant_id);
        let mut keys = self.keys.lock();
        keys.remove(&tenant.api_key);
        keys.insert(new_key.clone(), tenant_id.to_string());
        tenant.api_key = new_key.clone();
        Ok(Some(new_key))
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn log_event(&self, event: &EventRecord) -> Result<(), PersistenceError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
