//! Storage layer for the gateway
//!
//! Two families of stores live here:
//! - `TtlStore`: expiring key-value storage used for session state and
//!   rate-limit windows
//! - `MessageStore` / `TenantStore` / `EventStore`: durable rows backed
//!   by ScyllaDB, with in-memory implementations for tests and
//!   single-node deployments

pub mod kv;
pub mod records;
pub mod scylla_store;

pub use kv::{InMemoryTtlStore, TtlStore};
pub use records::{
    EventRecord, EventStore, InMemoryStore, MessageRecord, MessageStore, TenantStore,
};
pub use scylla_store::{ScyllaClient, ScyllaConfig, ScyllaStore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<scylla::transport::errors::NewSessionError> for PersistenceError {
    fn from(err: scylla::transport::errors::NewSessionError) -> Self {
        PersistenceError::Connection(err.to_string())
    }
}

impl From<scylla::transport::errors::QueryError> for PersistenceError {
    fn from(err: scylla::transport::errors::QueryError) -> Self {
        PersistenceError::Query(err.to_string())
    }
}

impl From<PersistenceError> for vaas_core::Error {
    fn from(err: PersistenceError) -> Self {
        vaas_core::Error::Storage(err.to_string())
    }
}
