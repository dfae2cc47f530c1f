//! Token counting helpers.
//!
//! Prefers `tiktoken-rs` when the configured model maps to a known encoding; falls back
//! to whitespace counting for local models whose tokenizer is unavailable. The fallback
//! undercounts for most models, which only makes context packing more conservative once
//! the safety margin is applied.

use anyhow::Error as TokenizerError;
use std::sync::Arc;
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, r50k_base};

/// Shared closure mapping text to its token count.
pub(crate) type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Build a token counter for the given model or encoding name.
///
/// Never fails: unknown models log a warning and fall back to whitespace counting.
pub(crate) fn build_token_counter(model: &str) -> TokenCounter {
    match resolve_encoding(model) {
        Ok(encoding) => {
            let encoding = Arc::new(encoding);
            Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
        }
        Err(error) => {
            tracing::warn!(
                model,
                error = %error,
                "Tokenizer unavailable; falling back to whitespace counter"
            );
            whitespace_counter()
        }
    }
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    match get_bpe_from_model(target) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model = target,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            encoding_from_name(target).unwrap_or(Err(model_err))
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

/// Whitespace-token approximation used when no encoding is available.
pub(crate) fn whitespace_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}
