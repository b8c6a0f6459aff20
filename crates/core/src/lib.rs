//! Core traits and types for the conversational gateway
//!
//! This crate provides foundational types used across all other crates:
//! - Capability traits for pluggable backends (ASR, TTS, NLU, LLM, moderation, retrieval)
//! - Conversation types (sessions, messages, bounded history)
//! - Action plans and policy violations
//! - Tenant identity and API key handling
//! - Error types

pub mod capability;
pub mod conversation;
pub mod error;
pub mod plan;
pub mod tenant;

pub use capability::{
    ContentModerator, ContextRetriever, GenerateRequest, IntentParser, LanguageModel,
    ModerationResult, NluResult, PromptMessage, PromptRole, RetrievedChunk, SpeechToText,
    TextToSpeech, Transcript,
};
pub use conversation::{Message, MessageRole, Session, MAX_HISTORY};
pub use error::{Error, Result};
pub use plan::{ActionKind, ActionPlan, PlannedAction, PolicyViolation, Severity, ViolationKind};
pub use tenant::{generate_api_key, mask_api_key, Tenant};
