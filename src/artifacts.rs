//! Artifact persistence for pipeline runs.
//!
//! Each run writes its intermediate and final products under one output directory:
//!
//! ```text
//! <output>/chunks/<chunk_id>.json
//! <output>/relevant_chunks/relevant_chunk_<chunk_id>.json
//! <output>/answer/final_answer.json
//! <output>/metadata.json
//! ```

use crate::pipeline::records::{AnswerRecord, ChunkRecord};
use crate::pipeline::types::Chunk;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while persisting artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Filesystem operation failed.
    #[error("failed to write artifact {path}: {source}")]
    Io {
        /// Path being written when the failure occurred.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// A record could not be serialized to JSON.
    #[error("failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A relevant chunk persisted together with the query it was selected for.
#[derive(Debug, Serialize)]
struct RelevantChunkRecord<'a> {
    #[serde(flatten)]
    chunk: ChunkRecord,
    query: &'a str,
}

/// Summary of a completed run, written last.
#[derive(Debug, Serialize)]
pub struct RunMetadata {
    /// Run identifier.
    pub run_id: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Question the run answered.
    pub question: String,
    /// Input path the run ingested.
    pub input_path: String,
    /// Boundary detection mode used.
    pub split_mode: String,
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Chunk overlap in characters.
    pub chunk_overlap: usize,
    /// Minimum chunk size in characters.
    pub min_chunk_size: usize,
    /// Total chunks produced by the splitter.
    pub total_chunks: usize,
    /// Chunks judged relevant.
    pub relevant_chunks: usize,
    /// Citations bound in the final answer.
    pub citations: usize,
    /// How the run ended.
    pub outcome: String,
}

/// Writes run artifacts under a fixed output directory.
pub struct ArtifactWriter {
    output_dir: PathBuf,
}

impl ArtifactWriter {
    /// Create a writer rooted at `output_dir`. Directories are created lazily per write.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Persist every chunk produced by the splitter.
    pub fn write_chunks(&self, chunks: &[Chunk]) -> Result<(), ArtifactError> {
        let dir = self.output_dir.join("chunks");
        ensure_dir(&dir)?;
        for chunk in chunks {
            let record = ChunkRecord::from(chunk);
            write_json(&dir.join(format!("{}.json", chunk.id)), &record)?;
        }
        tracing::info!(count = chunks.len(), dir = %dir.display(), "Persisted chunks");
        Ok(())
    }

    /// Persist the chunks judged relevant, tagged with the query that selected them.
    pub fn write_relevant_chunks(&self, chunks: &[Chunk], query: &str) -> Result<(), ArtifactError> {
        let dir = self.output_dir.join("relevant_chunks");
        ensure_dir(&dir)?;
        for chunk in chunks {
            let record = RelevantChunkRecord {
                chunk: ChunkRecord::from(chunk),
                query,
            };
            write_json(&dir.join(format!("relevant_chunk_{}.json", chunk.id)), &record)?;
        }
        tracing::info!(count = chunks.len(), dir = %dir.display(), "Persisted relevant chunks");
        Ok(())
    }

    /// Persist the final answer with its citations.
    pub fn write_answer(&self, answer: &AnswerRecord) -> Result<(), ArtifactError> {
        let dir = self.output_dir.join("answer");
        ensure_dir(&dir)?;
        write_json(&dir.join("final_answer.json"), answer)
    }

    /// Persist the run summary.
    pub fn write_metadata(&self, metadata: &RunMetadata) -> Result<(), ArtifactError> {
        ensure_dir(&self.output_dir)?;
        write_json(&self.output_dir.join("metadata.json"), metadata)
    }
}

fn ensure_dir(dir: &Path) -> Result<(), ArtifactError> {
    fs::create_dir_all(dir).map_err(|source| ArtifactError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::SourceRef;
    use std::collections::BTreeMap;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ragpipe-artifacts-{}", uuid::Uuid::new_v4()))
    }

    fn chunk(id: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: "content".to_string(),
            source: SourceRef {
                file_name: "a.txt".into(),
                file_path: "a.txt".into(),
                start_offset: 0,
                end_offset: 7,
            },
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn chunks_land_under_chunks_directory() {
        let dir = scratch_dir();
        let writer = ArtifactWriter::new(&dir);
        writer
            .write_chunks(&[chunk("chunk_0_00001"), chunk("chunk_0_00002")])
            .expect("writes");
        assert!(dir.join("chunks/chunk_0_00001.json").is_file());
        assert!(dir.join("chunks/chunk_0_00002.json").is_file());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn relevant_chunks_carry_the_query() {
        let dir = scratch_dir();
        let writer = ArtifactWriter::new(&dir);
        writer
            .write_relevant_chunks(&[chunk("chunk_0_00001")], "why?")
            .expect("writes");
        let raw = fs::read_to_string(dir.join("relevant_chunks/relevant_chunk_chunk_0_00001.json"))
            .expect("readable");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(value["query"], "why?");
        assert_eq!(value["chunk_id"], "chunk_0_00001");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn answer_is_written_to_fixed_path() {
        let dir = scratch_dir();
        let writer = ArtifactWriter::new(&dir);
        let record = AnswerRecord {
            question: "q".into(),
            input_path: "a.txt".into(),
            answer: "the answer".into(),
            citations: Vec::new(),
            timestamp: "2026-01-01T00:00:00Z".into(),
        };
        writer.write_answer(&record).expect("writes");
        let raw = fs::read_to_string(dir.join("answer/final_answer.json")).expect("readable");
        assert!(raw.contains("the answer"));
        fs::remove_dir_all(&dir).ok();
    }
}
