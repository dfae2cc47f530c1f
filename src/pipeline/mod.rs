//! The question-answering pipeline: splitting, relevance classification, synthesis, and
//! the orchestrator that ties the stages together.

pub mod batcher;
pub mod classifier;
pub mod orchestrator;
pub mod progress;
pub mod records;
pub mod splitter;
pub mod types;

pub use batcher::{ContextBlock, SAFETY_MARGIN_TOKENS, SynthesisBatcher, SynthesisSettings, pack_blocks};
pub use classifier::{RelevanceClassifier, VerdictLexicon};
pub use orchestrator::{OutcomeKind, Pipeline, PipelineOutcome, PipelineSettings, RagQuery};
pub use progress::{ChannelSink, EventKind, NullSink, PipelineStage, ProgressEvent, ProgressSink};
pub use records::{AnswerRecord, ChunkRecord, CitationRecord};
pub use splitter::{Segment, split};
pub use types::{
    Chunk, ChunkingPolicy, Citation, GenerationAttemptSpec, PipelineError, RelevanceVerdict,
    SourceRef, SplitMode, SynthesisResult, validate_ladder,
};
