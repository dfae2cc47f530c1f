//! Serializable records for persisted pipeline artifacts.
//!
//! The in-memory pipeline types carry paths and enums; these records flatten them into
//! the JSON shapes written to disk so the on-disk format stays stable even when the
//! internal types move.

use crate::pipeline::types::{Chunk, Citation};
use serde::Serialize;
use std::collections::BTreeMap;

/// JSON shape of one persisted chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkRecord {
    /// Chunk identifier.
    pub chunk_id: String,
    /// Base name of the source file.
    pub file_name: String,
    /// Full path of the source file as supplied by the caller.
    pub original_file_path: String,
    /// Chunk text.
    pub content: String,
    /// Start byte offset in the extracted text.
    pub start_offset: usize,
    /// End byte offset (exclusive) in the extracted text.
    pub end_offset: usize,
    /// Content length in characters.
    pub length: usize,
    /// Chunk metadata.
    pub metadata: BTreeMap<String, String>,
}

impl From<&Chunk> for ChunkRecord {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            file_name: chunk.source.file_name.clone(),
            original_file_path: chunk.source.file_path.display().to_string(),
            content: chunk.content.clone(),
            start_offset: chunk.source.start_offset,
            end_offset: chunk.source.end_offset,
            length: chunk.content.chars().count(),
            metadata: chunk.metadata.clone(),
        }
    }
}

/// JSON shape of one persisted citation.
#[derive(Debug, Clone, Serialize)]
pub struct CitationRecord {
    /// Quoted text.
    pub text: String,
    /// Base name of the file the bound chunk came from.
    pub source_file: String,
    /// Identifier of the bound chunk.
    pub chunk_id: String,
    /// Start offset of the bound chunk.
    pub start_offset: usize,
    /// End offset of the bound chunk.
    pub end_offset: usize,
    /// Metadata of the bound chunk.
    pub metadata: BTreeMap<String, String>,
}

impl From<&Citation> for CitationRecord {
    fn from(citation: &Citation) -> Self {
        Self {
            text: citation.text.clone(),
            source_file: citation.source.file_name.clone(),
            chunk_id: citation.chunk_id.clone(),
            start_offset: citation.source.start_offset,
            end_offset: citation.source.end_offset,
            metadata: citation.metadata.clone(),
        }
    }
}

/// JSON shape of the persisted final answer.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerRecord {
    /// Question the run answered.
    pub question: String,
    /// Input path the run ingested.
    pub input_path: String,
    /// Final answer text.
    pub answer: String,
    /// Citations bound to relevant chunks.
    pub citations: Vec<CitationRecord>,
    /// RFC 3339 timestamp of when the answer was produced.
    pub timestamp: String,
}
