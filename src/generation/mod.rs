//! Text-generation capability consumed by the pipeline.
//!
//! The pipeline never talks to a model backend directly; it goes through
//! [`GenerationClient`], which makes model acquisition explicit. `load` returns a
//! [`ModelHandle`] that `generate` and `unload` require, so "is the model loaded" is a
//! property of the handle's existence rather than a flag checked ad hoc.

mod ollama;
pub(crate) mod tokens;

pub use ollama::OllamaGenerationClient;

use crate::pipeline::GenerationAttemptSpec;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by generation backends.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The backend could not be reached or refused the model.
    #[error("generation backend unavailable: {0}")]
    BackendUnavailable(String),
    /// A single generation request failed.
    #[error("generation request failed: {0}")]
    RequestFailed(String),
    /// The backend returned a response the client could not interpret.
    #[error("malformed backend response: {0}")]
    InvalidResponse(String),
}

/// Role of an outgoing chat message. Prompts are single-turn, so only the roles the
/// pipeline actually sends exist here.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction.
    System,
    /// User turn.
    User,
}

/// One message of a chat-style prompt.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Speaker role.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters for one generation request.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum number of tokens to generate.
    pub max_tokens: u32,
    /// Nucleus sampling threshold.
    pub top_p: f32,
    /// Top-k sampling cutoff.
    pub top_k: u32,
    /// Repetition penalty.
    pub repeat_penalty: f32,
    /// Stop sequences terminating generation.
    pub stop: Vec<String>,
}

impl From<&GenerationAttemptSpec> for GenerationParams {
    fn from(spec: &GenerationAttemptSpec) -> Self {
        Self {
            temperature: spec.temperature,
            max_tokens: spec.max_tokens,
            top_p: spec.top_p,
            top_k: spec.top_k,
            repeat_penalty: spec.repeat_penalty,
            stop: spec.stop.clone(),
        }
    }
}

/// Proof that a model has been acquired from the backend.
///
/// Obtained from [`GenerationClient::load`] and consumed by
/// [`GenerationClient::unload`]; `generate` borrows it for each request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    model: String,
}

impl ModelHandle {
    /// Create a handle for the named model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    /// Model identifier this handle refers to.
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Interface implemented by text-generation backends.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Acquire the named model. Idempotent: loading an already-resident model returns a
    /// fresh handle without reloading.
    async fn load(&self, model: &str) -> Result<ModelHandle, GenerationError>;

    /// Run one completion over the given messages with the given parameters.
    async fn generate(
        &self,
        handle: &ModelHandle,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<String, GenerationError>;

    /// Release the model behind the handle. Idempotent no-op when nothing is resident.
    async fn unload(&self, handle: ModelHandle) -> Result<(), GenerationError>;

    /// Count tokens in `text` with the backend's tokenizer (or a close approximation).
    fn count_tokens(&self, text: &str) -> usize;
}
