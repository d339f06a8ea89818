//! Engine event stream types.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DependencyWarning;
use crate::types::ExecutionMode;

/// Callback receiving every [`EngineEvent`] of a run.
pub type EngineEventSink = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Concrete event payloads emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEventPayload {
    RunStarted {
        mode: ExecutionMode,
        invocation_count: usize,
    },
    InvocationStarted {
        id: String,
        tool: String,
    },
    /// Skipped by a false condition, or never attempted after a halt.
    InvocationSkipped {
        id: String,
        reason: String,
    },
    InvocationRetrying {
        id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    FallbackEngaged {
        id: String,
        fallback_tool: String,
        error: String,
    },
    InvocationCompleted {
        id: String,
        success: bool,
        duration_ms: u64,
        retry_count: u32,
    },
    Warning {
        warning: DependencyWarning,
    },
    RunCompleted {
        overall_success: bool,
        results: usize,
        duration_ms: u64,
    },
}

/// Envelope for engine events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineEvent {
    pub run_id: Uuid,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EngineEventPayload,
}

pub(crate) struct EventEmitter {
    run_id: Uuid,
    seq: AtomicU64,
    sink: Option<EngineEventSink>,
}

impl EventEmitter {
    pub(crate) fn new(run_id: Uuid, sink: Option<EngineEventSink>) -> Self {
        Self {
            run_id,
            seq: AtomicU64::new(1),
            sink,
        }
    }

    pub(crate) fn emit(&self, payload: EngineEventPayload) {
        let Some(sink) = &self.sink else {
            return;
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        (sink)(EngineEvent {
            run_id: self.run_id,
            seq,
            timestamp: Utc::now(),
            payload,
        });
    }
}
