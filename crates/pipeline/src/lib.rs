//! Pipeline orchestration
//!
//! The orchestrator is the control-flow core of the gateway: it
//! sequences moderation, intent parsing, retrieval, policy validation,
//! external actions, generation, persistence, and analytics for each
//! request, with the fallback semantics that keep a single failing
//! collaborator from taking down the turn.

pub mod capabilities;
pub mod orchestrator;

pub use capabilities::{
    HttpContentModerator, HttpIntentParser, HttpSpeechToText, HttpTextToSpeech,
};
pub use orchestrator::{
    HealthReport, Orchestrator, PipelineDeps, ProcessOutcome, ProcessRequest, VoiceRequest,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Capability unavailable: {0}")]
    Capability(String),

    #[error("Transcription error: {0}")]
    Transcription(String),
}

impl From<vaas_session::SessionError> for PipelineError {
    fn from(err: vaas_session::SessionError) -> Self {
        PipelineError::Session(err.to_string())
    }
}

impl From<PipelineError> for vaas_core::Error {
    fn from(err: PipelineError) -> Self {
        vaas_core::Error::Internal(err.to_string())
    }
}
