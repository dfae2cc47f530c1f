//! Per-chunk relevance classification with a cascading generation ladder.
//!
//! Each chunk is judged by asking a model whether the chunk helps answer the question
//! and scanning the reply for affirmative or negative tokens. When a rung's reply
//! contains neither, the classifier escalates to the next rung, which is expected to be
//! more deterministic. A chunk whose verdict stays undefined after the whole ladder is
//! treated as not relevant.

use crate::generation::{ChatMessage, GenerationClient, GenerationError, GenerationParams};
use crate::pipeline::progress::{PipelineStage, ProgressEvent, ProgressSink};
use crate::pipeline::types::{Chunk, GenerationAttemptSpec, PipelineError, RelevanceVerdict};
use regex::Regex;

/// Token sets that decide a verdict, compiled to word-boundary patterns.
///
/// Matching is case-insensitive and respects word boundaries, so "да" does not match
/// inside "данные". Affirmative tokens are checked before negative ones.
#[derive(Debug, Clone)]
pub struct VerdictLexicon {
    yes: Regex,
    no: Regex,
}

impl VerdictLexicon {
    /// Build a lexicon from explicit token sets.
    pub fn new(yes_tokens: &[&str], no_tokens: &[&str]) -> Result<Self, PipelineError> {
        Ok(Self {
            yes: compile_token_set(yes_tokens)?,
            no: compile_token_set(no_tokens)?,
        })
    }

    /// Scan a model reply for a verdict.
    pub fn detect(&self, reply: &str) -> RelevanceVerdict {
        if self.yes.is_match(reply) {
            RelevanceVerdict::Yes
        } else if self.no.is_match(reply) {
            RelevanceVerdict::No
        } else {
            RelevanceVerdict::Undefined
        }
    }
}

impl Default for VerdictLexicon {
    fn default() -> Self {
        Self::new(&["да", "yes"], &["нет", "no"]).expect("default lexicon compiles")
    }
}

fn compile_token_set(tokens: &[&str]) -> Result<Regex, PipelineError> {
    if tokens.iter().all(|token| token.trim().is_empty()) {
        return Err(PipelineError::Configuration(
            "verdict lexicon token set is empty".to_string(),
        ));
    }
    let escaped: Vec<String> = tokens
        .iter()
        .filter(|token| !token.trim().is_empty())
        .map(|token| regex::escape(token.trim()))
        .collect();
    let pattern = format!(r"(?i)\b(?:{})\b", escaped.join("|"));
    Regex::new(&pattern).map_err(|error| {
        PipelineError::Configuration(format!("verdict lexicon pattern invalid: {error}"))
    })
}

/// Relevance filter over a chunk stream.
pub struct RelevanceClassifier {
    ladder: Vec<GenerationAttemptSpec>,
    lexicon: VerdictLexicon,
    top_k: usize,
}

impl RelevanceClassifier {
    /// Create a classifier with a validated ladder.
    ///
    /// `top_k` caps how many relevant chunks are collected before classification stops.
    pub fn new(
        ladder: Vec<GenerationAttemptSpec>,
        lexicon: VerdictLexicon,
        top_k: usize,
    ) -> Result<Self, PipelineError> {
        crate::pipeline::types::validate_ladder(&ladder)?;
        if top_k == 0 {
            return Err(PipelineError::Configuration(
                "retrieval top_k must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            ladder,
            lexicon,
            top_k,
        })
    }

    /// Classify chunks in order and return the relevant ones, capped at `top_k`.
    ///
    /// The primary rung's model is loaded once for the whole pass and released before
    /// returning. Failing to acquire the primary model aborts the stage; every other
    /// generation failure downgrades to an undefined verdict for that rung.
    pub async fn select_relevant(
        &self,
        client: &dyn GenerationClient,
        sink: &dyn ProgressSink,
        question: &str,
        chunks: &[Chunk],
    ) -> Result<Vec<Chunk>, GenerationError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let primary = client.load(&self.ladder[0].model).await?;
        let total = chunks.len();
        let mut relevant = Vec::new();

        for (index, chunk) in chunks.iter().enumerate() {
            if relevant.len() >= self.top_k {
                tracing::info!(
                    top_k = self.top_k,
                    examined = index,
                    "Relevance cap reached; skipping remaining chunks"
                );
                break;
            }
            sink.emit(ProgressEvent::progress(
                PipelineStage::Classifying,
                index + 1,
                total,
                format!("classifying chunk {}", chunk.id),
            ));
            let verdict = self.classify_chunk(client, &primary, question, chunk).await;
            tracing::debug!(chunk_id = %chunk.id, ?verdict, "Chunk classified");
            if verdict == RelevanceVerdict::Yes {
                relevant.push(chunk.clone());
            }
        }

        if let Err(error) = client.unload(primary).await {
            tracing::warn!(error = %error, "Failed to release primary classifier model");
        }

        tracing::info!(
            relevant = relevant.len(),
            total,
            "Relevance classification finished"
        );
        Ok(relevant)
    }

    /// Run one chunk through the ladder until a rung yields a defined verdict.
    async fn classify_chunk(
        &self,
        client: &dyn GenerationClient,
        primary: &crate::generation::ModelHandle,
        question: &str,
        chunk: &Chunk,
    ) -> RelevanceVerdict {
        for (rung, spec) in self.ladder.iter().enumerate() {
            let prompt = spec.render_prompt(&[("question", question), ("chunk", &chunk.content)]);
            let messages = [ChatMessage::user(prompt)];
            let params = GenerationParams::from(spec);

            let reply = if rung == 0 {
                client.generate(primary, &messages, &params).await
            } else {
                self.generate_on_rung(client, spec, &messages, &params, rung)
                    .await
            };

            let verdict = match reply {
                Ok(text) => self.lexicon.detect(&text),
                Err(error) => {
                    tracing::warn!(
                        rung,
                        model = %spec.model,
                        chunk_id = %chunk.id,
                        error = %error,
                        "Generation attempt failed; treating verdict as undefined"
                    );
                    RelevanceVerdict::Undefined
                }
            };

            if verdict != RelevanceVerdict::Undefined {
                return verdict;
            }
            if rung + 1 < self.ladder.len() {
                tracing::debug!(
                    chunk_id = %chunk.id,
                    next_rung = rung + 1,
                    "Verdict undefined; escalating"
                );
            }
        }
        RelevanceVerdict::Undefined
    }

    /// Fallback rungs acquire their model per attempt and release it right after, so a
    /// rarely-used strict model never stays resident between chunks.
    async fn generate_on_rung(
        &self,
        client: &dyn GenerationClient,
        spec: &GenerationAttemptSpec,
        messages: &[ChatMessage],
        params: &GenerationParams,
        rung: usize,
    ) -> Result<String, GenerationError> {
        let handle = client.load(&spec.model).await.map_err(|error| {
            tracing::warn!(rung, model = %spec.model, error = %error, "Fallback model unavailable");
            error
        })?;
        let reply = client.generate(&handle, messages, params).await;
        if let Err(error) = client.unload(handle).await {
            tracing::warn!(rung, model = %spec.model, error = %error, "Failed to release fallback model");
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lexicon_detects_bilingual_verdicts() {
        let lexicon = VerdictLexicon::default();
        assert_eq!(lexicon.detect("Да, этот фрагмент подходит."), RelevanceVerdict::Yes);
        assert_eq!(lexicon.detect("YES."), RelevanceVerdict::Yes);
        assert_eq!(lexicon.detect("нет"), RelevanceVerdict::No);
        assert_eq!(lexicon.detect("No, unrelated."), RelevanceVerdict::No);
        assert_eq!(lexicon.detect("maybe?"), RelevanceVerdict::Undefined);
        assert_eq!(lexicon.detect(""), RelevanceVerdict::Undefined);
    }

    #[test]
    fn lexicon_respects_word_boundaries() {
        let lexicon = VerdictLexicon::default();
        assert_eq!(lexicon.detect("yesterday was fine"), RelevanceVerdict::Undefined);
        assert_eq!(lexicon.detect("данные отсутствуют"), RelevanceVerdict::Undefined);
        assert_eq!(lexicon.detect("нетипичный случай"), RelevanceVerdict::Undefined);
    }

    #[test]
    fn affirmative_tokens_win_over_negative_ones() {
        let lexicon = VerdictLexicon::default();
        assert_eq!(
            lexicon.detect("Yes, although no direct quote exists."),
            RelevanceVerdict::Yes
        );
    }

    #[test]
    fn custom_token_sets_are_honoured() {
        let lexicon = VerdictLexicon::new(&["relevant"], &["irrelevant"]).expect("compiles");
        assert_eq!(lexicon.detect("RELEVANT."), RelevanceVerdict::Yes);
        assert_eq!(lexicon.detect("irrelevant"), RelevanceVerdict::No);
        assert_eq!(lexicon.detect("yes"), RelevanceVerdict::Undefined);
    }

    #[test]
    fn empty_token_set_is_rejected() {
        assert!(VerdictLexicon::new(&[], &["no"]).is_err());
        assert!(VerdictLexicon::new(&["  "], &["no"]).is_err());
    }

    #[test]
    fn classifier_rejects_zero_top_k() {
        let spec = GenerationAttemptSpec {
            model: "m".into(),
            temperature: 0.1,
            max_tokens: 4,
            top_p: 0.9,
            top_k: 10,
            repeat_penalty: 1.0,
            stop: Vec::new(),
            prompt_template: "{question} {chunk}".into(),
        };
        let result = RelevanceClassifier::new(vec![spec], VerdictLexicon::default(), 0);
        assert!(result.is_err());
    }
}
