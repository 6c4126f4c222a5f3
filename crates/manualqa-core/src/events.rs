//! Structured pipeline events.
//!
//! Components report what they did through an injected `EventSink`; the sink
//! decides whether that becomes log output, a test recording, or nothing.
//! Emitting an event never changes a result.

use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::guard::RefuseReason;
use crate::types::{ChunkLevel, ManualId};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    ScopeResolved {
        state: &'static str,
        manual: Option<ManualId>,
        pinned: bool,
    },
    RetrievalCompleted {
        manual: ManualId,
        direct: usize,
        returned: usize,
        top: Option<(ChunkLevel, f32)>,
    },
    RetrievalFailed {
        manual: ManualId,
        reason: String,
    },
    GuardDecided {
        manual: Option<ManualId>,
        answered: bool,
        reason: Option<RefuseReason>,
        evidence: usize,
    },
    GenerationCompleted {
        manual: ManualId,
        chars: usize,
        model_refused: bool,
    },
    ManualIndexed {
        manual: ManualId,
        chunks: usize,
        skipped: bool,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Forwards events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::ScopeResolved { state, manual, pinned } => {
                debug!(state, manual = ?manual, pinned, "scope resolved");
            }
            PipelineEvent::RetrievalCompleted { manual, direct, returned, top } => {
                debug!(manual = %manual, direct, returned, top = ?top, "retrieval completed");
            }
            PipelineEvent::RetrievalFailed { manual, reason } => {
                debug!(manual = %manual, reason = %reason, "retrieval failed");
            }
            PipelineEvent::GuardDecided { manual, answered, reason, evidence } => {
                debug!(manual = ?manual, answered, reason = ?reason.as_ref().map(|r| r.code()), evidence, "guard decided");
            }
            PipelineEvent::GenerationCompleted { manual, chars, model_refused } => {
                debug!(manual = %manual, chars, model_refused, "generation completed");
            }
            PipelineEvent::ManualIndexed { manual, chunks, skipped } => {
                debug!(manual = %manual, chunks, skipped, "manual indexed");
            }
        }
    }
}

/// Keeps every event in memory; used by tests to assert on pipeline flow.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: PipelineEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}
