//! Tenant-scoped semantic retrieval
//!
//! Queries are embedded via an HTTP embedding service, then searched in
//! Qdrant with a mandatory tenant filter so one tenant's knowledge
//! never leaks into another's replies.

pub mod embeddings;
pub mod retriever;

pub use embeddings::HttpEmbedder;
pub use retriever::QdrantRetriever;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        RagError::Embedding(err.to_string())
    }
}

impl From<RagError> for vaas_core::Error {
    fn from(err: RagError) -> Self {
        vaas_core::Error::Retrieval(err.to_string())
    }
}
