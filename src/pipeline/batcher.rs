//! Context packing, answer synthesis, and citation recovery.
//!
//! Relevant chunks are greedily packed into context blocks that fit the model's token
//! budget, each block is answered independently, and the per-block answers are joined.
//! Quote markers emitted by the model are cut out of the answer text and resolved back
//! to the chunk they were quoted from.

use crate::generation::{ChatMessage, GenerationClient, GenerationError, GenerationParams};
use crate::pipeline::progress::{PipelineStage, ProgressEvent, ProgressSink};
use crate::pipeline::splitter::split_sentences;
use crate::pipeline::types::{Chunk, Citation, GenerationAttemptSpec, SynthesisResult};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Tokens held back from the budget in every packing comparison, absorbing tokenizer
/// mismatch between the counting encoder and the model's real tokenizer.
pub const SAFETY_MARGIN_TOKENS: usize = 50;

/// One packed context block ready for a synthesis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBlock {
    /// Chunk contents joined with blank lines.
    pub content: String,
    /// Summed token count of the packed contents (the safety margin is not included).
    pub token_count: usize,
    /// Number of chunks packed into the block.
    pub chunk_count: usize,
}

/// Greedily pack chunks into blocks bounded by `token_budget`.
///
/// Chunk order is preserved. The running total accumulates raw token counts; the safety
/// margin is reserved once per comparison, not per chunk. A chunk that alone overruns
/// the budget still gets its own block rather than being dropped or split.
pub fn pack_blocks(
    chunks: &[Chunk],
    token_budget: usize,
    count_tokens: &dyn Fn(&str) -> usize,
) -> Vec<ContextBlock> {
    let mut blocks = Vec::new();
    let mut content = String::new();
    let mut tokens = 0usize;
    let mut packed = 0usize;

    for chunk in chunks {
        let chunk_tokens = count_tokens(&chunk.content);
        if packed > 0 && tokens + chunk_tokens + SAFETY_MARGIN_TOKENS > token_budget {
            blocks.push(ContextBlock {
                content: std::mem::take(&mut content),
                token_count: tokens,
                chunk_count: packed,
            });
            tokens = 0;
            packed = 0;
        }
        if packed == 0 && chunk_tokens + SAFETY_MARGIN_TOKENS > token_budget {
            tracing::warn!(
                chunk_tokens,
                token_budget,
                "Chunk alone exceeds the token budget; packing it into its own block"
            );
        }
        if packed > 0 {
            content.push_str("\n\n");
        }
        content.push_str(&chunk.content);
        tokens += chunk_tokens;
        packed += 1;
    }

    if packed > 0 {
        blocks.push(ContextBlock {
            content,
            token_count: tokens,
            chunk_count: packed,
        });
    }
    blocks
}

/// Configuration of the synthesis stage.
#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    /// Model and sampling parameters; the prompt template takes `{context}` and
    /// `{question}`.
    pub spec: GenerationAttemptSpec,
    /// System message sent with every block.
    pub system_prompt: String,
    /// Token budget per context block.
    pub token_budget: usize,
}

/// Answer synthesizer over packed context blocks.
pub struct SynthesisBatcher {
    settings: SynthesisSettings,
}

impl SynthesisBatcher {
    /// Create a batcher with the given settings.
    pub fn new(settings: SynthesisSettings) -> Self {
        Self { settings }
    }

    /// Generate the final answer from the relevant chunks.
    ///
    /// An empty chunk list returns an empty result without touching the backend. A
    /// failed generation for one block leaves a placeholder in the answer and keeps
    /// going; only failing to acquire the synthesis model aborts the stage.
    pub async fn synthesize(
        &self,
        client: &dyn GenerationClient,
        sink: &dyn ProgressSink,
        question: &str,
        chunks: &[Chunk],
    ) -> Result<SynthesisResult, GenerationError> {
        if chunks.is_empty() {
            return Ok(SynthesisResult::default());
        }

        let count = |text: &str| client.count_tokens(text);
        let blocks = pack_blocks(chunks, self.settings.token_budget, &count);
        tracing::info!(
            blocks = blocks.len(),
            chunks = chunks.len(),
            token_budget = self.settings.token_budget,
            "Packed context blocks for synthesis"
        );

        let handle = client.load(&self.settings.spec.model).await?;
        let params = GenerationParams::from(&self.settings.spec);
        let total = blocks.len();
        let mut fragments = Vec::with_capacity(total);

        for (index, block) in blocks.iter().enumerate() {
            sink.emit(ProgressEvent::progress(
                PipelineStage::Synthesizing,
                index + 1,
                total,
                format!("generating answer for context block {} of {total}", index + 1),
            ));
            let prompt = self
                .settings
                .spec
                .render_prompt(&[("context", &block.content), ("question", question)]);
            let messages = [
                ChatMessage::system(self.settings.system_prompt.clone()),
                ChatMessage::user(prompt),
            ];
            match client.generate(&handle, &messages, &params).await {
                Ok(text) => fragments.push(text),
                Err(error) => {
                    tracing::error!(
                        block = index + 1,
                        error = %error,
                        "Synthesis generation failed for context block"
                    );
                    fragments.push(format!(
                        "[generation failed for context block {}: {error}]",
                        index + 1
                    ));
                }
            }
        }

        if let Err(error) = client.unload(handle).await {
            tracing::warn!(error = %error, "Failed to release synthesis model");
        }

        let raw_answer = fragments.join("\n\n");
        let (answer, candidates) = extract_citation_candidates(&raw_answer);
        let citations = resolve_citations(&candidates, chunks);
        Ok(SynthesisResult { answer, citations })
    }
}

fn citation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\[(?:ЦИТАТА|QUOTE|CITATION):\s*"([^"]*)"\]"#)
            .expect("citation pattern compiles")
    })
}

/// Pull quote markers out of the generated answer.
///
/// Returns the answer with markers removed (whitespace runs collapsed) and the quoted
/// texts in order of appearance.
pub fn extract_citation_candidates(raw_answer: &str) -> (String, Vec<String>) {
    let pattern = citation_pattern();
    let candidates: Vec<String> = pattern
        .captures_iter(raw_answer)
        .map(|captures| captures[1].trim().to_string())
        .filter(|text| !text.is_empty())
        .collect();

    let stripped = pattern.replace_all(raw_answer, "");
    let collapsed = collapse_spaces(&stripped);
    (collapsed.trim().to_string(), candidates)
}

fn collapse_spaces(text: &str) -> String {
    static RUNS: OnceLock<Regex> = OnceLock::new();
    let runs = RUNS.get_or_init(|| Regex::new(r"[ \t]{2,}").expect("space-run pattern compiles"));
    runs.replace_all(text, " ").into_owned()
}

/// Bind quoted texts back to the chunks they came from.
///
/// Each candidate is searched as a case-insensitive substring across the chunks in
/// order; an unmatched candidate is retried sentence by sentence, binding each sentence
/// that does appear. Duplicates (by lowercased text) keep only the first occurrence, and
/// candidates that resolve nowhere are dropped with a warning.
pub fn resolve_citations(candidates: &[String], chunks: &[Chunk]) -> Vec<Citation> {
    let mut citations = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for candidate in candidates {
        if let Some(chunk) = find_containing_chunk(candidate, chunks) {
            push_citation(candidate, chunk, &mut citations, &mut seen);
            continue;
        }
        let mut resolved_any = false;
        for sentence in split_sentences(candidate) {
            if let Some(chunk) = find_containing_chunk(sentence, chunks) {
                push_citation(sentence, chunk, &mut citations, &mut seen);
                resolved_any = true;
            }
        }
        if !resolved_any {
            tracing::warn!(quote = %candidate, "Quoted text not found in any relevant chunk; dropping citation");
        }
    }
    citations
}

fn find_containing_chunk<'a>(text: &str, chunks: &'a [Chunk]) -> Option<&'a Chunk> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    chunks
        .iter()
        .find(|chunk| chunk.content.to_lowercase().contains(&needle))
}

fn push_citation(
    text: &str,
    chunk: &Chunk,
    citations: &mut Vec<Citation>,
    seen: &mut HashSet<String>,
) {
    let trimmed = text.trim();
    if seen.insert(trimmed.to_lowercase()) {
        citations.push(Citation {
            text: trimmed.to_string(),
            chunk_id: chunk.id.clone(),
            source: chunk.source.clone(),
            metadata: chunk.metadata.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::SourceRef;
    use std::collections::BTreeMap;

    fn chunk(id: &str, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: content.to_string(),
            source: SourceRef {
                file_name: "book.txt".into(),
                file_path: "book.txt".into(),
                start_offset: 0,
                end_offset: content.len(),
            },
            metadata: BTreeMap::new(),
        }
    }

    fn word_count(text: &str) -> usize {
        text.split_whitespace().count()
    }

    #[test]
    fn pack_blocks_respects_budget() {
        // Two 3-word chunks fit a budget of 58 (6 + 3 + 50 = 59 overruns on the third).
        let chunks = vec![
            chunk("c1", "one two three"),
            chunk("c2", "four five six"),
            chunk("c3", "seven eight nine"),
        ];
        let blocks = pack_blocks(&chunks, 58, &word_count);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].chunk_count, 2);
        assert_eq!(blocks[0].token_count, 6);
        assert!(blocks[0].content.contains("one two three\n\nfour five six"));
        assert_eq!(blocks[1].chunk_count, 1);
        assert_eq!(blocks[1].token_count, 3);
    }

    #[test]
    fn margin_is_reserved_once_per_block() {
        // Three 50-token chunks against a budget of 200: 150 + 50 = 200 fits exactly,
        // so all three share one block.
        let content = "w ".repeat(50);
        let chunks = vec![
            chunk("c1", content.trim()),
            chunk("c2", content.trim()),
            chunk("c3", content.trim()),
        ];
        let blocks = pack_blocks(&chunks, 200, &word_count);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].chunk_count, 3);
        assert_eq!(blocks[0].token_count, 150);
    }

    #[test]
    fn pack_blocks_keeps_oversized_chunk_alone() {
        let big = "w ".repeat(200);
        let chunks = vec![chunk("small", "tiny"), chunk("big", big.trim())];
        let blocks = pack_blocks(&chunks, 100, &word_count);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].chunk_count, 1);
        assert!(blocks[1].token_count > 100);
    }

    #[test]
    fn pack_blocks_preserves_chunk_order() {
        let chunks: Vec<Chunk> = (0..6)
            .map(|i| chunk(&format!("c{i}"), &format!("word{i}")))
            .collect();
        let blocks = pack_blocks(&chunks, 1000, &word_count);
        assert_eq!(blocks.len(), 1);
        for i in 0..6 {
            let a = blocks[0].content.find(&format!("word{i}")).unwrap();
            if i > 0 {
                let b = blocks[0].content.find(&format!("word{}", i - 1)).unwrap();
                assert!(a > b);
            }
        }
    }

    #[test]
    fn pack_blocks_handles_empty_input() {
        assert!(pack_blocks(&[], 100, &word_count).is_empty());
    }

    #[test]
    fn extract_candidates_strips_markers_bilingually() {
        let raw = r#"Ответ основан на тексте. [ЦИТАТА: "первый фрагмент"] Then more text [quote: "second fragment"] end."#;
        let (clean, candidates) = extract_citation_candidates(raw);
        assert_eq!(candidates, vec!["первый фрагмент", "second fragment"]);
        assert!(!clean.contains("ЦИТАТА"));
        assert!(!clean.contains("quote:"));
        assert!(!clean.contains("  "));
        assert!(clean.starts_with("Ответ основан на тексте."));
    }

    #[test]
    fn extract_candidates_ignores_empty_quotes() {
        let (_, candidates) = extract_citation_candidates(r#"[QUOTE: ""] [QUOTE: "real"]"#);
        assert_eq!(candidates, vec!["real"]);
    }

    #[test]
    fn resolve_binds_exact_substring_case_insensitively() {
        let chunks = vec![chunk("c1", "The Quick Brown Fox jumps over the lazy dog.")];
        let citations = resolve_citations(&["quick brown fox".to_string()], &chunks);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].chunk_id, "c1");
        assert_eq!(citations[0].text, "quick brown fox");
    }

    #[test]
    fn resolve_ties_break_to_first_chunk_in_order() {
        let chunks = vec![chunk("c1", "shared passage here"), chunk("c2", "shared passage here")];
        let citations = resolve_citations(&["shared passage".to_string()], &chunks);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].chunk_id, "c1");
    }

    #[test]
    fn resolve_falls_back_to_sentences() {
        let chunks = vec![
            chunk("c1", "First sentence lives here."),
            chunk("c2", "Second sentence lives elsewhere."),
        ];
        // The combined quote appears in no single chunk; its sentences do.
        let quote = "First sentence lives here. Second sentence lives elsewhere.".to_string();
        let citations = resolve_citations(&[quote], &chunks);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].chunk_id, "c1");
        assert_eq!(citations[1].chunk_id, "c2");
    }

    #[test]
    fn resolve_dedupes_by_lowercased_text() {
        let chunks = vec![chunk("c1", "repeatable text")];
        let citations = resolve_citations(
            &["Repeatable Text".to_string(), "repeatable text".to_string()],
            &chunks,
        );
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].text, "Repeatable Text");
    }

    #[test]
    fn resolve_drops_unmatched_candidates() {
        let chunks = vec![chunk("c1", "actual content")];
        let citations = resolve_citations(&["hallucinated quote".to_string()], &chunks);
        assert!(citations.is_empty());
    }
}
