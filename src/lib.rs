#![deny(missing_docs)]

//! Core library for the ragpipe question-answering tool.

/// Run artifact persistence.
pub mod artifacts;
/// Environment-driven configuration management.
pub mod config;
/// Generation client abstraction and the Ollama adapter.
pub mod generation;
/// Input document loading.
pub mod ingest;
/// Structured logging and tracing setup.
pub mod logging;
/// The chunking, classification, and synthesis pipeline.
pub mod pipeline;
