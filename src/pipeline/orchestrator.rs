//! End-to-end pipeline orchestration.
//!
//! Drives a run through its stages in order: ingest, chunk, classify, synthesize. Stage
//! transitions and per-item progress are reported through the configured sink; empty
//! intermediate results finish the run early with an empty outcome rather than failing.

use crate::config::{Config, DEFAULT_SYNTHESIS_SYSTEM_PROMPT};
use crate::generation::GenerationClient;
use crate::ingest::{Document, load_documents};
use crate::pipeline::batcher::{SynthesisBatcher, SynthesisSettings};
use crate::pipeline::classifier::{RelevanceClassifier, VerdictLexicon};
use crate::pipeline::progress::{PipelineStage, ProgressEvent, ProgressSink};
use crate::pipeline::splitter::split;
use crate::pipeline::types::{
    Chunk, ChunkingPolicy, GenerationAttemptSpec, PipelineError, SourceRef, SynthesisResult,
};
use std::path::PathBuf;
use uuid::Uuid;

/// One question to answer over one input path.
#[derive(Debug, Clone)]
pub struct RagQuery {
    /// Natural-language question.
    pub question: String,
    /// File or directory to answer from.
    pub input_path: PathBuf,
}

/// How a completed run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// The pipeline produced an answer.
    Answered,
    /// Splitting yielded no chunks; nothing to classify.
    NoChunks,
    /// Classification found no relevant chunks; nothing to synthesize.
    NoRelevantChunks,
}

/// Result of a completed pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Identifier of this run.
    pub run_id: Uuid,
    /// How the run ended.
    pub kind: OutcomeKind,
    /// All chunks produced by the splitter.
    pub chunks: Vec<Chunk>,
    /// Chunks the classifier judged relevant.
    pub relevant_chunks: Vec<Chunk>,
    /// Answer and citations; empty unless `kind` is [`OutcomeKind::Answered`].
    pub result: SynthesisResult,
}

/// Everything a pipeline run needs besides the query itself.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Splitting parameters.
    pub policy: ChunkingPolicy,
    /// Relevance classification ladder.
    pub ladder: Vec<GenerationAttemptSpec>,
    /// Cap on collected relevant chunks.
    pub top_k: usize,
    /// Verdict token sets for the classifier.
    pub lexicon: VerdictLexicon,
    /// Synthesis stage configuration.
    pub synthesis: SynthesisSettings,
}

impl PipelineSettings {
    /// Build settings from the resolved configuration.
    pub fn from_config(config: &Config, top_k_override: Option<usize>) -> Self {
        Self {
            policy: config.chunking_policy(),
            ladder: config.retrieval_ladder(),
            top_k: top_k_override.unwrap_or(config.retrieval_top_k),
            lexicon: VerdictLexicon::default(),
            synthesis: SynthesisSettings {
                spec: config.synthesis_spec(),
                system_prompt: DEFAULT_SYNTHESIS_SYSTEM_PROMPT.to_string(),
                token_budget: config.token_budget(),
            },
        }
    }
}

/// The assembled question-answering pipeline.
pub struct Pipeline {
    classifier: RelevanceClassifier,
    batcher: SynthesisBatcher,
    policy: ChunkingPolicy,
    client: Box<dyn GenerationClient>,
    sink: Box<dyn ProgressSink>,
}

impl Pipeline {
    /// Assemble a pipeline, validating the settings up front.
    pub fn new(
        settings: PipelineSettings,
        client: Box<dyn GenerationClient>,
        sink: Box<dyn ProgressSink>,
    ) -> Result<Self, PipelineError> {
        let classifier =
            RelevanceClassifier::new(settings.ladder, settings.lexicon, settings.top_k)?;
        crate::pipeline::types::validate_ladder(std::slice::from_ref(&settings.synthesis.spec))?;
        if settings.synthesis.token_budget == 0 {
            return Err(PipelineError::Configuration(
                "synthesis token budget must be positive".to_string(),
            ));
        }
        Ok(Self {
            classifier,
            batcher: SynthesisBatcher::new(settings.synthesis),
            policy: settings.policy,
            client,
            sink,
        })
    }

    /// Run the pipeline for one query.
    ///
    /// On failure an error event is emitted before the error is returned, so sinks see
    /// the terminal state either way.
    pub async fn run(&self, query: &RagQuery) -> Result<PipelineOutcome, PipelineError> {
        let run_id = Uuid::new_v4();
        tracing::info!(
            %run_id,
            question = %query.question,
            input = %query.input_path.display(),
            "Pipeline run started"
        );
        match self.execute(run_id, query).await {
            Ok(outcome) => {
                self.sink.emit(ProgressEvent::complete(match outcome.kind {
                    OutcomeKind::Answered => "answer ready".to_string(),
                    OutcomeKind::NoChunks => "input produced no chunks".to_string(),
                    OutcomeKind::NoRelevantChunks => "no relevant chunks found".to_string(),
                }));
                Ok(outcome)
            }
            Err(error) => {
                tracing::error!(%run_id, error = %error, "Pipeline run failed");
                self.sink.emit(ProgressEvent::error(error.to_string()));
                Err(error)
            }
        }
    }

    async fn execute(
        &self,
        run_id: Uuid,
        query: &RagQuery,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.sink.emit(ProgressEvent::status(
            PipelineStage::Chunking,
            "loading and splitting input",
        ));
        let documents = load_documents(&query.input_path)?;
        let chunks = self.split_documents(&documents);
        tracing::info!(chunks = chunks.len(), documents = documents.len(), "Input split");

        if chunks.is_empty() {
            return Ok(PipelineOutcome {
                run_id,
                kind: OutcomeKind::NoChunks,
                chunks,
                relevant_chunks: Vec::new(),
                result: SynthesisResult::default(),
            });
        }

        self.sink.emit(ProgressEvent::status(
            PipelineStage::Classifying,
            format!("classifying {} chunks", chunks.len()),
        ));
        let relevant_chunks = self
            .classifier
            .select_relevant(self.client.as_ref(), self.sink.as_ref(), &query.question, &chunks)
            .await
            .map_err(PipelineError::ModelAcquisition)?;

        if relevant_chunks.is_empty() {
            return Ok(PipelineOutcome {
                run_id,
                kind: OutcomeKind::NoRelevantChunks,
                chunks,
                relevant_chunks,
                result: SynthesisResult::default(),
            });
        }

        self.sink.emit(ProgressEvent::status(
            PipelineStage::Synthesizing,
            format!("synthesizing from {} relevant chunks", relevant_chunks.len()),
        ));
        let result = self
            .batcher
            .synthesize(
                self.client.as_ref(),
                self.sink.as_ref(),
                &query.question,
                &relevant_chunks,
            )
            .await
            .map_err(PipelineError::ModelAcquisition)?;

        Ok(PipelineOutcome {
            run_id,
            kind: OutcomeKind::Answered,
            chunks,
            relevant_chunks,
            result,
        })
    }

    /// Split every document, assigning run-stable chunk identifiers
    /// (`chunk_<file_index>_<counter>`).
    fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for (file_index, document) in documents.iter().enumerate() {
            let file_name = document.file_name();
            for (counter, segment) in split(&document.text, &self.policy).into_iter().enumerate() {
                let mut metadata = std::collections::BTreeMap::new();
                metadata.insert("file_name".to_string(), file_name.clone());
                metadata.insert("split_mode".to_string(), format!("{:?}", self.policy.split_mode));
                chunks.push(Chunk {
                    id: format!("chunk_{file_index}_{:05}", counter + 1),
                    content: segment.content,
                    source: SourceRef {
                        file_name: file_name.clone(),
                        file_path: document.path.clone(),
                        start_offset: segment.start,
                        end_offset: segment.end,
                    },
                    metadata,
                });
            }
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::SplitMode;

    fn spec(model: &str) -> GenerationAttemptSpec {
        GenerationAttemptSpec {
            model: model.to_string(),
            temperature: 0.1,
            max_tokens: 8,
            top_p: 0.9,
            top_k: 20,
            repeat_penalty: 1.0,
            stop: Vec::new(),
            prompt_template: "{question} {chunk}".to_string(),
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            policy: ChunkingPolicy {
                target_size: 50,
                overlap: 0,
                min_size: 0,
                split_mode: SplitMode::Sentence,
            },
            ladder: vec![spec("primary")],
            top_k: 3,
            lexicon: VerdictLexicon::default(),
            synthesis: SynthesisSettings {
                spec: GenerationAttemptSpec {
                    prompt_template: "{context} {question}".to_string(),
                    ..spec("synth")
                },
                system_prompt: "answer".to_string(),
                token_budget: 100,
            },
        }
    }

    struct SilentClient;

    #[async_trait::async_trait]
    impl crate::generation::GenerationClient for SilentClient {
        async fn load(
            &self,
            model: &str,
        ) -> Result<crate::generation::ModelHandle, crate::generation::GenerationError> {
            Ok(crate::generation::ModelHandle::new(model))
        }

        async fn generate(
            &self,
            _handle: &crate::generation::ModelHandle,
            _messages: &[crate::generation::ChatMessage],
            _params: &crate::generation::GenerationParams,
        ) -> Result<String, crate::generation::GenerationError> {
            Ok("no".to_string())
        }

        async fn unload(
            &self,
            _handle: crate::generation::ModelHandle,
        ) -> Result<(), crate::generation::GenerationError> {
            Ok(())
        }

        fn count_tokens(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    #[test]
    fn pipeline_rejects_zero_token_budget() {
        let mut bad = settings();
        bad.synthesis.token_budget = 0;
        let result = Pipeline::new(
            bad,
            Box::new(SilentClient),
            Box::new(crate::pipeline::progress::NullSink),
        );
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn pipeline_rejects_empty_ladder() {
        let mut bad = settings();
        bad.ladder.clear();
        let result = Pipeline::new(
            bad,
            Box::new(SilentClient),
            Box::new(crate::pipeline::progress::NullSink),
        );
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[tokio::test]
    async fn missing_input_fails_with_input_error() {
        let pipeline = Pipeline::new(
            settings(),
            Box::new(SilentClient),
            Box::new(crate::pipeline::progress::NullSink),
        )
        .expect("valid settings");
        let query = RagQuery {
            question: "anything?".to_string(),
            input_path: PathBuf::from("/definitely/missing"),
        };
        let error = pipeline.run(&query).await.expect_err("missing input");
        assert!(matches!(error, PipelineError::Input(_)));
    }
}
