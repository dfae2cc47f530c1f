//! Pipeline progress reporting.
//!
//! Stages emit [`ProgressEvent`]s through a [`ProgressSink`]. Emission is send-and-forget:
//! a sink must never block or fail the pipeline, so the channel-backed implementation
//! drops events once the receiver is gone.

use std::fmt;
use tokio::sync::mpsc;

/// Lifecycle stage of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// No run in progress.
    Idle,
    /// Splitting input documents into chunks.
    Chunking,
    /// Classifying chunk relevance.
    Classifying,
    /// Generating the answer from relevant chunks.
    Synthesizing,
    /// Run finished, successfully or with an empty result.
    Done,
    /// Run aborted on a fatal error.
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Chunking => "chunking",
            Self::Classifying => "classifying",
            Self::Synthesizing => "synthesizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What kind of information an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A stage transition or informational message.
    Status,
    /// Incremental progress within a stage.
    Progress,
    /// The run finished.
    Complete,
    /// The run failed.
    Error,
}

/// One progress notification.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Stage the pipeline is in when the event is emitted.
    pub stage: PipelineStage,
    /// Current item index for [`EventKind::Progress`] events.
    pub current: Option<usize>,
    /// Total item count for [`EventKind::Progress`] events.
    pub total: Option<usize>,
    /// Human-readable description.
    pub message: String,
}

impl ProgressEvent {
    /// A stage transition or informational message.
    pub fn status(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Status,
            stage,
            current: None,
            total: None,
            message: message.into(),
        }
    }

    /// Incremental progress: `current` of `total` items handled.
    pub fn progress(
        stage: PipelineStage,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventKind::Progress,
            stage,
            current: Some(current),
            total: Some(total),
            message: message.into(),
        }
    }

    /// The run finished.
    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Complete,
            stage: PipelineStage::Done,
            current: None,
            total: None,
            message: message.into(),
        }
    }

    /// The run failed.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            stage: PipelineStage::Failed,
            current: None,
            total: None,
            message: message.into(),
        }
    }
}

/// Destination for progress events.
pub trait ProgressSink: Send + Sync {
    /// Deliver one event. Must not block; delivery failures are swallowed.
    fn emit(&self, event: ProgressEvent);
}

/// Sink that forwards events over an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    /// Create a sink together with the receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        // A closed receiver means nobody is listening anymore; that is fine.
        let _ = self.tx.send(event);
    }
}

/// Sink that discards every event.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}
