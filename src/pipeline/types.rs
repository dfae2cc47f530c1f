//! Core data types and error definitions for the question-answering pipeline.

use crate::generation::GenerationError;
use crate::ingest::IngestError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// A bounded, offset-tracked text segment extracted from a source document.
///
/// Immutable once created: the splitter builds chunks, the classifier and batcher only
/// read them.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Stable identifier, unique within a run (`chunk_<file_index>_<counter>`).
    pub id: String,
    /// Extracted text content.
    pub content: String,
    /// Provenance of the content within its source document.
    pub source: SourceRef,
    /// Free-form string metadata attached at creation time.
    pub metadata: BTreeMap<String, String>,
}

/// Location of a chunk inside the extracted plain text of its source file.
///
/// Offsets are byte offsets into the extracted text, always on character boundaries;
/// they are not offsets into the original on-disk file when extraction rewrites markup.
#[derive(Debug, Clone)]
pub struct SourceRef {
    /// Base name of the source file.
    pub file_name: String,
    /// Full path of the source file as supplied by the caller.
    pub file_path: PathBuf,
    /// Start offset of the chunk content.
    pub start_offset: usize,
    /// End offset (exclusive) of the chunk content.
    pub end_offset: usize,
}

/// How the splitter detects chunk boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitMode {
    /// Fixed-size character windows with a sliding overlap.
    FixedWidth,
    /// Sentence boundaries packed greedily up to the target size.
    Sentence,
    /// Blank-line paragraph boundaries packed greedily up to the target size.
    Paragraph,
}

impl std::str::FromStr for SplitMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed_width" | "fixed" | "characters" => Ok(Self::FixedWidth),
            "sentence" | "sentences" => Ok(Self::Sentence),
            "paragraph" | "paragraphs" => Ok(Self::Paragraph),
            _ => Err(()),
        }
    }
}

/// Resolved splitting parameters.
///
/// Sizes count characters. `overlap` must be smaller than `target_size`; the splitter
/// corrects a violating overlap to `target_size / 2` and logs a warning instead of
/// failing.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingPolicy {
    /// Upper bound on chunk length, except for single oversized atomic units.
    pub target_size: usize,
    /// Characters shared between consecutive chunks.
    pub overlap: usize,
    /// Chunks shorter than this are merged with neighbours during post-processing.
    pub min_size: usize,
    /// Boundary detection mode.
    pub split_mode: SplitMode,
}

/// The classifier's judgment of whether a chunk helps answer the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelevanceVerdict {
    /// The chunk is relevant.
    Yes,
    /// The chunk is not relevant.
    No,
    /// The model output contained neither an affirmative nor a negative token.
    Undefined,
}

/// One rung of the generation escalation ladder: a capability plus its sampling
/// parameters and prompt template.
///
/// Ladders are configuration, not code; later rungs are expected to be more
/// deterministic (lower temperature, smaller `top_k`, tighter stops).
#[derive(Debug, Clone)]
pub struct GenerationAttemptSpec {
    /// Model identifier understood by the generation backend.
    pub model: String,
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
    /// Prompt template with `{placeholder}` substitution slots.
    pub prompt_template: String,
}

impl GenerationAttemptSpec {
    /// Render the prompt template, replacing each `{key}` with its value.
    pub fn render_prompt(&self, substitutions: &[(&str, &str)]) -> String {
        let mut rendered = self.prompt_template.clone();
        for (key, value) in substitutions {
            rendered = rendered.replace(&format!("{{{key}}}"), value);
        }
        rendered
    }
}

/// A quoted fragment from a generated answer, resolved back to its source chunk.
///
/// Derived, not authoritative: `text` is always a case-insensitive substring of the
/// bound chunk's content, but exact offsets inside the chunk are not computed.
#[derive(Debug, Clone)]
pub struct Citation {
    /// Quoted text as emitted by the model (or one sentence of it).
    pub text: String,
    /// Identifier of the chunk the quote was found in.
    pub chunk_id: String,
    /// Provenance of the bound chunk.
    pub source: SourceRef,
    /// Metadata of the bound chunk.
    pub metadata: BTreeMap<String, String>,
}

/// Final output of the synthesis stage: the concatenated answer plus its citations.
#[derive(Debug, Clone, Default)]
pub struct SynthesisResult {
    /// Per-block answer fragments concatenated in block order.
    pub answer: String,
    /// Deduplicated citations in first-seen order.
    pub citations: Vec<Citation>,
}

/// Fatal pipeline errors.
///
/// Everything recoverable (a failed generation attempt, an unresolved citation, an
/// empty intermediate result) is handled inside the stages and never surfaces here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid chunking policy or generation ladder; detected before processing starts.
    #[error("invalid pipeline configuration: {0}")]
    Configuration(String),
    /// Input path missing or the document set was empty.
    #[error(transparent)]
    Input(#[from] IngestError),
    /// A stage model could not be acquired from the generation backend.
    #[error("failed to acquire generation model: {0}")]
    ModelAcquisition(#[source] GenerationError),
}

/// Validate a generation ladder before the pipeline runs.
///
/// An empty ladder, a blank model name, or degenerate sampling parameters abort the run
/// with a [`PipelineError::Configuration`].
pub fn validate_ladder(ladder: &[GenerationAttemptSpec]) -> Result<(), PipelineError> {
    if ladder.is_empty() {
        return Err(PipelineError::Configuration(
            "generation ladder must contain at least one rung".to_string(),
        ));
    }
    for (index, spec) in ladder.iter().enumerate() {
        if spec.model.trim().is_empty() {
            return Err(PipelineError::Configuration(format!(
                "ladder rung {index} has an empty model identifier"
            )));
        }
        if spec.max_tokens == 0 {
            return Err(PipelineError::Configuration(format!(
                "ladder rung {index} requests zero output tokens"
            )));
        }
        if !spec.temperature.is_finite() || spec.temperature < 0.0 {
            return Err(PipelineError::Configuration(format!(
                "ladder rung {index} has an invalid temperature"
            )));
        }
    }
    Ok(())
}
