//! ScyllaDB-backed durable stores

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::{Session, SessionBuilder};
use std::sync::Arc;
use uuid::Uuid;

use crate::records::{EventRecord, EventStore, MessageRecord, MessageStore, TenantStore};
use crate::PersistenceError;
use vaas_core::Tenant;

/// ScyllaDB configuration
#[derive(Debug, Clone)]
pub struct ScyllaConfig {
    pub hosts: Vec<String>,
    pub keyspace: String,
    pub replication_factor: u8,
}

impl Default for ScyllaConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1:9042".to_string()],
            keyspace: "vaas".to_string(),
            replication_factor: 1,
        }
    }
}

/// ScyllaDB client wrapper
#[derive(Clone)]
pub struct ScyllaClient {
    session: Arc<Session>,
    config: ScyllaConfig,
}

impl ScyllaClient {
    /// Connect to the ScyllaDB cluster
    pub async fn connect(config: ScyllaConfig) -> Result<Self, PersistenceError> {
        tracing::info!(hosts = ?config.hosts, keyspace = %config.keyspace, "Connecting to ScyllaDB");

        let session = SessionBuilder::new()
            .known_nodes(&config.hosts)
            .build()
            .await?;

        Ok(Self {
            session: Arc::new(session),
            config,
        })
    }

    /// Ensure keyspace and tables exist
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        create_keyspace(
            &self.session,
            &self.config.keyspace,
            self.config.replication_factor,
        )
        .await?;
        create_tables(&self.session, &self.config.keyspace).await?;
        tracing::info!(keyspace = %self.config.keyspace, "Schema ensured");
        Ok(())
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn keyspace(&self) -> &str {
        &self.config.keyspace
    }
}

/// Create the keyspace if it doesn't exist
async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| PersistenceError::SchemaError(format!("Failed to create keyspace: {}", e)))?;

    Ok(())
}

/// Create all required tables
async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    // Conversation turns, newest first per session
    let messages_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.messages (
            session_id TEXT,
            created_at TIMESTAMP,
            id UUID,
            tenant_id TEXT,
            user_id TEXT,
            domain TEXT,
            role TEXT,
            content TEXT,
            intent TEXT,
            entities_json TEXT,
            moderation_flagged BOOLEAN,
            PRIMARY KEY ((session_id), created_at, id)
        ) WITH CLUSTERING ORDER BY (created_at DESC, id DESC)
    "#,
        keyspace
    );

    session.query_unpaged(messages_table, &[]).await.map_err(|e| {
        PersistenceError::SchemaError(format!("Failed to create messages table: {}", e))
    })?;

    // Tenant registry
    let tenants_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.tenants (
            tenant_id TEXT,
            name TEXT,
            api_key TEXT,
            is_active BOOLEAN,
            created_at TIMESTAMP,
            metadata_json TEXT,
            PRIMARY KEY (tenant_id)
        )
    "#,
        keyspace
    );

    session.query_unpaged(tenants_table, &[]).await.map_err(|e| {
        PersistenceError::SchemaError(format!("Failed to create tenants table: {}", e))
    })?;

    // API key lookup table
    let keys_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.tenants_by_api_key (
            api_key TEXT,
            tenant_id TEXT,
            PRIMARY KEY (api_key)
        )
    "#,
        keyspace
    );

    session.query_unpaged(keys_table, &[]).await.map_err(|e| {
        PersistenceError::SchemaError(format!("Failed to create tenants_by_api_key table: {}", e))
    })?;

    // Analytics events, 30 day retention
    let events_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.analytics_events (
            tenant_id TEXT,
            created_at TIMESTAMP,
            id UUID,
            event_type TEXT,
            domain TEXT,
            session_id TEXT,
            payload_json TEXT,
            PRIMARY KEY ((tenant_id), created_at, id)
        ) WITH CLUSTERING ORDER BY (created_at DESC, id DESC)
        AND default_time_to_live = 2592000
    "#,
        keyspace
    );

    session.query_unpaged(events_table, &[]).await.map_err(|e| {
        PersistenceError::SchemaError(format!("Failed to create analytics_events table: {}", e))
    })?;

    tracing::info!("All tables created successfully");
    Ok(())
}

/// ScyllaDB implementation of the durable stores
#[derive(Clone)]
pub struct ScyllaStore {
    client: ScyllaClient,
}

impl ScyllaStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MessageStore for ScyllaStore {
    async fn save_message(&self, record: &MessageRecord) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.messages (
                session_id, created_at, id, tenant_id, user_id, domain,
                role, content, intent, entities_json, moderation_flagged
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        let entities_json = record
            .entities
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    record.session_id.as_str(),
                    record.created_at.timestamp_millis(),
                    record.id,
                    record.tenant_id.as_str(),
                    record.user_id.as_str(),
                    record.domain.as_str(),
                    record.role.as_str(),
                    record.content.as_str(),
                    record.intent.as_deref(),
                    entities_json.as_deref(),
                    record.moderation_flagged,
                ),
            )
            .await?;

        Ok(())
    }

    async fn messages_for_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, PersistenceError> {
        let query = format!(
            "SELECT session_id, created_at, id, tenant_id, user_id, domain,
                    role, content, intent, entities_json, moderation_flagged
             FROM {}.messages WHERE session_id = ? LIMIT ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (session_id, limit as i32))
            .await?;

        let mut records = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (
                    session_id,
                    created_at,
                    id,
                    tenant_id,
                    user_id,
                    domain,
                    role,
                    content,
                    intent,
                    entities_json,
                    moderation_flagged,
                ): (
                    String,
                    i64,
                    Uuid,
                    String,
                    String,
                    String,
                    String,
                    String,
                    Option<String>,
                    Option<String>,
                    bool,
                ) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                records.push(MessageRecord {
                    id,
                    session_id,
                    tenant_id,
                    user_id,
                    domain,
                    role,
                    content,
                    intent,
                    entities: entities_json.and_then(|s| serde_json::from_str(&s).ok()),
                    moderation_flagged,
                    created_at: DateTime::from_timestamp_millis(created_at)
                        .unwrap_or_else(Utc::now),
                });
            }
        }

        // Clustering order is newest first; callers expect most-recent-last
        records.reverse();
        Ok(records)
    }

    async fn health_check(&self) -> bool {
        let query = format!(
            "SELECT tenant_id FROM {}.tenants LIMIT 1",
            self.client.keyspace()
        );
        self.client.session().query_unpaged(query, &[]).await.is_ok()
    }
}

#[async_trait]
impl TenantStore for ScyllaStore {
    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.tenants (tenant_id, name, api_key, is_active, created_at, metadata_json)
             VALUES (?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        let metadata_json = serde_json::to_string(&tenant.metadata)?;

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    tenant.tenant_id.as_str(),
                    tenant.name.as_str(),
                    tenant.api_key.as_str(),
                    tenant.is_active,
                    tenant.created_at.timestamp_millis(),
                    metadata_json.as_str(),
                ),
            )
            .await?;

        let key_query = format!(
            "INSERT INTO {}.tenants_by_api_key (api_key, tenant_id) VALUES (?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                key_query,
                (tenant.api_key.as_str(), tenant.tenant_id.as_str()),
            )
            .await?;

        tracing::info!(
            tenant_id = %tenant.tenant_id,
            api_key = %vaas_core::mask_api_key(&tenant.api_key),
            "Tenant created"
        );

        Ok(())
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, PersistenceError> {
        let query = format!(
            "SELECT tenant_id, name, api_key, is_active, created_at, metadata_json
             FROM {}.tenants WHERE tenant_id = ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (tenant_id,))
            .await?;

        let row = match result.rows.and_then(|mut rows| rows.pop()) {
            Some(row) => row,
            None => return Ok(None),
        };

        let (tenant_id, name, api_key, is_active, created_at, metadata_json): (
            String,
            String,
            String,
            bool,
            i64,
            Option<String>,
        ) = row
            .into_typed()
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

        Ok(Some(Tenant {
            tenant_id,
            name,
            api_key,
            is_active,
            created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_else(Utc::now),
            metadata: metadata_json
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
        }))
    }

    async fn verify_api_key(&self, api_key: &str) -> Result<Option<Tenant>, PersistenceError> {
        let query = format!(
            "SELECT tenant_id FROM {}.tenants_by_api_key WHERE api_key = ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (api_key,))
            .await?;

        let row = match result.rows.and_then(|mut rows| rows.pop()) {
            Some(row) => row,
            None => return Ok(None),
        };

        let (tenant_id,): (String,) = row
            .into_typed()
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

        let tenant = self.get_tenant(&tenant_id).await?;
        Ok(tenant.filter(|t| t.is_active))
    }

    async fn deactivate_tenant(&self, tenant_id: &str) -> Result<bool, PersistenceError> {
        if self.get_tenant(tenant_id).await?.is_none() {
            return Ok(false);
        }

        let query = format!(
            "UPDATE {}.tenants SET is_active = false WHERE tenant_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(query, (tenant_id,))
            .await?;

        tracing::info!(tenant_id = %tenant_id, "Tenant deactivated");
        Ok(true)
    }

    async fn regenerate_api_key(
        &self,
        tenant_id: &str,
    ) -> Result<Option<String>, PersistenceError> {
        let tenant = match self.get_tenant(tenant_id).await? {
            Some(tenant) => tenant,
            None => return Ok(None),
        };

        let new_key = vaas_core::generate_api_key(tenant_id);

        let update = format!(
            "UPDATE {}.tenants SET api_key = ? WHERE tenant_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(update, (new_key.as_str(), tenant_id))
            .await?;

        let insert = format!(
            "INSERT INTO {}.tenants_by_api_key (api_key, tenant_id) VALUES (?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(insert, (new_key.as_str(), tenant_id))
            .await?;

        // The old key must stop verifying the moment the new one lands
        let delete = format!(
            "DELETE FROM {}.tenants_by_api_key WHERE api_key = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(delete, (tenant.api_key.as_str(),))
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            api_key = %vaas_core::mask_api_key(&new_key),
            "API key regenerated"
        );
        Ok(Some(new_key))
    }
}

#[async_trait]
impl EventStore for ScyllaStore {
    async fn log_event(&self, event: &EventRecord) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.analytics_events (
                tenant_id, created_at, id, event_type, domain, session_id, payload_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        let payload_json = serde_json::to_string(&event.payload)?;

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    event.tenant_id.as_str(),
                    event.created_at.timestamp_millis(),
                    event.id,
                    event.event_type.as_str(),
                    event.domain.as_deref(),
                    event.session_id.as_deref(),
                    payload_json.as_str(),
                ),
            )
            .await?;

        Ok(())
    }
}
