//! Ollama-backed generation client.
//!
//! Talks to the Ollama runtime over its `/api/chat` endpoint with streaming disabled.
//! Model residency maps onto Ollama's keep-alive semantics: `load` issues a warm-up
//! request with no messages (Ollama loads the model and returns immediately), and
//! `unload` issues the same request with `keep_alive: 0`, which evicts the model. Both
//! operations are idempotent on the Ollama side.

use super::tokens::{TokenCounter, build_token_counter};
use super::{ChatMessage, GenerationClient, GenerationError, GenerationParams, ModelHandle};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Generation client backed by a local Ollama runtime.
pub struct OllamaGenerationClient {
    http: Client,
    base_url: String,
    counter: TokenCounter,
}

impl OllamaGenerationClient {
    /// Create a client for the runtime at `base_url`, counting tokens with the tokenizer
    /// configured for `tokenizer_model`.
    pub fn new(base_url: String, tokenizer_model: &str) -> Self {
        let http = Client::builder()
            .user_agent("ragpipe/generation")
            .build()
            .expect("Failed to construct reqwest::Client for generation");
        Self {
            http,
            base_url,
            counter: build_token_counter(tokenizer_model),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    async fn post_chat(&self, payload: serde_json::Value) -> Result<ChatResponse, GenerationError> {
        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationError::BackendUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GenerationError::BackendUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::RequestFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        response.json().await.map_err(|error| {
            GenerationError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl GenerationClient for OllamaGenerationClient {
    async fn load(&self, model: &str) -> Result<ModelHandle, GenerationError> {
        tracing::debug!(model, "Loading model");
        // An empty message list asks Ollama to load the model without generating.
        self.post_chat(json!({
            "model": model,
            "messages": [],
            "stream": false,
        }))
        .await?;
        tracing::info!(model, "Model loaded");
        Ok(ModelHandle::new(model))
    }

    async fn generate(
        &self,
        handle: &ModelHandle,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        let body = self
            .post_chat(json!({
                "model": handle.model(),
                "messages": messages,
                "stream": false,
                "options": {
                    "temperature": params.temperature,
                    "num_predict": params.max_tokens,
                    "top_p": params.top_p,
                    "top_k": params.top_k,
                    "repeat_penalty": params.repeat_penalty,
                    "stop": params.stop,
                },
            }))
            .await?;

        if !body.done {
            return Err(GenerationError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        let text = body
            .message
            .map(|message| message.content)
            .unwrap_or_default();
        if text.is_empty() {
            tracing::warn!(model = handle.model(), "Ollama returned an empty completion");
        }
        Ok(text)
    }

    async fn unload(&self, handle: ModelHandle) -> Result<(), GenerationError> {
        tracing::debug!(model = handle.model(), "Unloading model");
        self.post_chat(json!({
            "model": handle.model(),
            "messages": [],
            "stream": false,
            "keep_alive": 0,
        }))
        .await?;
        Ok(())
    }

    fn count_tokens(&self, text: &str) -> usize {
        (self.counter)(text)
    }
}
