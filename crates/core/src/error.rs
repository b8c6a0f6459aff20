//! Shared error type

use thiserror::Error;

/// Gateway-wide error type
///
/// Crate-local errors (config, persistence, llm, ...) convert into this
/// at the boundaries where crates compose.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Domain not found: {0}")]
    DomainNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Policy error: {0}")]
    Policy(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
