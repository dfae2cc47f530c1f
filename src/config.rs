//! Environment-driven configuration for the pipeline.
//!
//! Every knob has a default so the binary runs against a local Ollama instance out of the
//! box; set the corresponding environment variable (or a `.env` entry) to override. The
//! resolved configuration also builds the escalation ladder used by the relevance
//! classifier and the settings consumed by the synthesis stage.

use crate::pipeline::{ChunkingPolicy, GenerationAttemptSpec, SplitMode};
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Default prompt sent to the primary relevance model.
pub const DEFAULT_RETRIEVER_PROMPT: &str = "You are screening document fragments for relevance.\n\
Question: {question}\n\nFragment:\n{chunk}\n\n\
Does this fragment help answer the question? Reply with a single word: yes or no.";

/// Stricter prompt used by the fallback rungs of the escalation ladder.
pub const DEFAULT_RETRIEVER_FALLBACK_PROMPT: &str = "Question: {question}\nFragment:\n{chunk}\n\
Answer strictly \"yes\" or \"no\": does the fragment help answer the question?";

/// System prompt instructing the synthesis model to mark quotations.
pub const DEFAULT_SYNTHESIS_SYSTEM_PROMPT: &str = "You answer questions using only the \
provided context. Quote supporting passages verbatim, wrapping each one as [QUOTE: \"...\"].";

/// User prompt template for per-block answer generation.
pub const DEFAULT_SYNTHESIS_PROMPT: &str = "Context:\n{context}\n\nQuestion: {question}\n\n\
Answer using only the context above. Mark every supporting quotation as \
[QUOTE: \"exact text\"].";

/// Runtime configuration for the ragpipe binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Ollama runtime serving all generation requests.
    pub ollama_url: String,
    /// Model used by the primary relevance-screening rung.
    pub retriever_model: String,
    /// Model used by the fallback rungs when the primary verdict is ambiguous.
    pub retriever_fallback_model: String,
    /// Model used for answer synthesis.
    pub synthesis_model: String,
    /// Tokenizer identifier for token counting (tiktoken model or encoding name).
    pub tokenizer_model: String,
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,
    /// Minimum chunk size enforced by the post-processing merge pass.
    pub min_chunk_size: usize,
    /// Boundary detection mode used by the splitter.
    pub split_mode: SplitMode,
    /// Number of relevant chunks to collect before stopping classification.
    pub retrieval_top_k: usize,
    /// Context window of the synthesis model in tokens.
    pub model_context_window: usize,
    /// Tokens reserved out of the context window for prompt scaffolding and the answer.
    pub context_token_buffer: usize,
}

impl Config {
    /// Load configuration from environment variables, applying defaults and validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            ollama_url: load_env_or("OLLAMA_URL", "http://127.0.0.1:11434"),
            retriever_model: load_env_or("RETRIEVER_MODEL", "llama3.1:8b"),
            retriever_fallback_model: load_env_or("RETRIEVER_FALLBACK_MODEL", "qwen2.5:1.5b"),
            synthesis_model: load_env_or("SYNTHESIS_MODEL", "llama3.1:8b"),
            tokenizer_model: load_env_or("TOKENIZER_MODEL", "cl100k_base"),
            chunk_size: load_parsed_or("CHUNK_SIZE", 2000)?,
            chunk_overlap: load_parsed_or("CHUNK_OVERLAP", 200)?,
            min_chunk_size: load_parsed_or("MIN_CHUNK_SIZE", 100)?,
            split_mode: load_env_optional("SPLIT_MODE")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("SPLIT_MODE".to_string()))
                })
                .transpose()?
                .unwrap_or(SplitMode::Sentence),
            retrieval_top_k: load_parsed_or("RETRIEVAL_TOP_K", 5)?,
            model_context_window: load_parsed_or("MODEL_CONTEXT_WINDOW", 4096)?,
            context_token_buffer: load_parsed_or("CONTEXT_TOKEN_BUFFER", 512)?,
        };

        if config.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_SIZE".to_string()));
        }
        if config.context_token_buffer >= config.model_context_window {
            return Err(ConfigError::InvalidValue(
                "CONTEXT_TOKEN_BUFFER must be smaller than MODEL_CONTEXT_WINDOW".to_string(),
            ));
        }

        Ok(config)
    }

    /// Resolved chunking policy for the splitter.
    pub fn chunking_policy(&self) -> ChunkingPolicy {
        ChunkingPolicy {
            target_size: self.chunk_size,
            overlap: self.chunk_overlap,
            min_size: self.min_chunk_size,
            split_mode: self.split_mode,
        }
    }

    /// Escalation ladder for the relevance classifier: primary, fallback-default,
    /// fallback-strict. Later rungs are progressively more deterministic.
    pub fn retrieval_ladder(&self) -> Vec<GenerationAttemptSpec> {
        vec![
            GenerationAttemptSpec {
                model: self.retriever_model.clone(),
                temperature: 0.3,
                max_tokens: 16,
                top_p: 0.95,
                top_k: 40,
                repeat_penalty: 1.1,
                stop: Vec::new(),
                prompt_template: DEFAULT_RETRIEVER_PROMPT.to_string(),
            },
            GenerationAttemptSpec {
                model: self.retriever_fallback_model.clone(),
                temperature: 0.1,
                max_tokens: 4,
                top_p: 0.5,
                top_k: 10,
                repeat_penalty: 1.0,
                stop: vec!["\n".to_string()],
                prompt_template: DEFAULT_RETRIEVER_FALLBACK_PROMPT.to_string(),
            },
            GenerationAttemptSpec {
                model: self.retriever_fallback_model.clone(),
                temperature: 0.01,
                max_tokens: 2,
                top_p: 0.1,
                top_k: 1,
                repeat_penalty: 1.0,
                stop: vec!["\n".to_string(), ".".to_string(), ",".to_string()],
                prompt_template: DEFAULT_RETRIEVER_FALLBACK_PROMPT.to_string(),
            },
        ]
    }

    /// Generation spec for the synthesis stage.
    pub fn synthesis_spec(&self) -> GenerationAttemptSpec {
        GenerationAttemptSpec {
            model: self.synthesis_model.clone(),
            temperature: 0.7,
            max_tokens: 500,
            top_p: 0.95,
            top_k: 40,
            repeat_penalty: 1.1,
            stop: Vec::new(),
            prompt_template: DEFAULT_SYNTHESIS_PROMPT.to_string(),
        }
    }

    /// Token budget available for packed chunk content per context block.
    pub fn token_budget(&self) -> usize {
        self.model_context_window
            .saturating_sub(self.context_token_buffer)
    }
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_parsed_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        ollama_url = %config.ollama_url,
        retriever_model = %config.retriever_model,
        synthesis_model = %config.synthesis_model,
        split_mode = ?config.split_mode,
        chunk_size = config.chunk_size,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
