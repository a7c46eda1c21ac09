//! Batch progress events and the sink contract used to deliver them.
//!
//! Events are produced by the coordinator in a fixed order per batch:
//! `batch_started`, then `test_started`/`test_completed` pairs, then exactly one
//! terminal event (`batch_completed`, `batch_stopped` or `batch_failed`).
//! Sinks must preserve that order. They may buffer, but must not drop or
//! reorder events, and must never fail back into the coordinator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::types::{BatchError, RecordedResult, TestResult};

/// A notification emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchStarted {
        batch_id: Uuid,
        total: usize,
    },
    TestStarted {
        batch_id: Uuid,
        name: String,
        /// 1-based position within the batch.
        index: usize,
        total: usize,
    },
    TestCompleted {
        batch_id: Uuid,
        name: String,
        result: TestResult,
    },
    BatchStopped {
        batch_id: Uuid,
        partial_results: Vec<RecordedResult>,
    },
    BatchCompleted {
        batch_id: Uuid,
        results: Vec<RecordedResult>,
    },
    BatchFailed {
        batch_id: Uuid,
        partial_results: Vec<RecordedResult>,
        error: BatchError,
    },
}

impl BatchEvent {
    /// Stable snake_case name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            BatchEvent::BatchStarted { .. } => "batch_started",
            BatchEvent::TestStarted { .. } => "test_started",
            BatchEvent::TestCompleted { .. } => "test_completed",
            BatchEvent::BatchStopped { .. } => "batch_stopped",
            BatchEvent::BatchCompleted { .. } => "batch_completed",
            BatchEvent::BatchFailed { .. } => "batch_failed",
        }
    }

    pub fn batch_id(&self) -> Uuid {
        match self {
            BatchEvent::BatchStarted { batch_id, .. }
            | BatchEvent::TestStarted { batch_id, .. }
            | BatchEvent::TestCompleted { batch_id, .. }
            | BatchEvent::BatchStopped { batch_id, .. }
            | BatchEvent::BatchCompleted { batch_id, .. }
            | BatchEvent::BatchFailed { batch_id, .. } => *batch_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchEvent::BatchStopped { .. }
                | BatchEvent::BatchCompleted { .. }
                | BatchEvent::BatchFailed { .. }
        )
    }
}

/// Receiver of batch events.
///
/// `emit` is called from the batch's execution thread (and, for
/// `batch_started`, from the submitting thread) in production order. It must
/// return promptly; delivery problems are the sink's own concern.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &BatchEvent);
}

impl<F> EventSink for F
where
    F: Fn(&BatchEvent) + Send + Sync,
{
    fn emit(&self, event: &BatchEvent) {
        self(event);
    }
}

/// Forwards every event to each inner sink, in registration order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &BatchEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
