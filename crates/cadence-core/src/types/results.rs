//! Per-invocation and aggregated execution results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::invocation::ExecutionMode;
use crate::error::DependencyWarning;

const NOT_ATTEMPTED: &str = "not attempted";

/// Failure description carried by a [`ToolResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolError {
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

/// Timing and retry accounting for one invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetrics {
    pub duration_ms: u64,
    pub retry_count: u32,
}

/// Whether an invocation actually reached its runner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    #[default]
    Executed,
    /// A condition evaluated false.
    Skipped,
    /// The batch halted first.
    NotAttempted,
}

impl ResultStatus {
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed)
    }
}

/// Outcome of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    #[serde(default)]
    pub metrics: ResultMetrics,
    #[serde(default, skip_serializing_if = "ResultStatus::is_executed")]
    pub status: ResultStatus,
}

impl ToolResult {
    pub fn success(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            payload,
            error: None,
            metrics: ResultMetrics::default(),
            status: ResultStatus::Executed,
        }
    }

    pub fn failure(id: impl Into<String>, message: impl Into<String>, details: Value) -> Self {
        Self {
            id: id.into(),
            success: false,
            payload: Value::Null,
            error: Some(ToolError {
                message: message.into(),
                details,
            }),
            metrics: ResultMetrics::default(),
            status: ResultStatus::Executed,
        }
    }

    /// A condition evaluated false: successful, but the tool never ran.
    pub fn skipped(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Skipped,
            ..Self::success(id, json!({ "skipped": true, "reason": reason.into() }))
        }
    }

    /// The batch halted before this invocation was scheduled.
    pub fn not_attempted(id: impl Into<String>, halted_by: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::NotAttempted,
            ..Self::failure(
                id,
                NOT_ATTEMPTED,
                json!({ "reason": reason.into(), "haltedBy": halted_by }),
            )
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.metrics.duration_ms = duration_ms;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.metrics.retry_count = retry_count;
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.status == ResultStatus::Skipped
    }

    pub fn is_not_attempted(&self) -> bool {
        self.status == ResultStatus::NotAttempted
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|error| error.message.as_str())
    }
}

/// Reduced outcome of a whole batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultiToolResult {
    pub mode: ExecutionMode,
    pub results_by_id: HashMap<String, ToolResult>,
    /// Result ids in execution-report order.
    pub order: Vec<String>,
    pub overall_success: bool,
    /// Payloads in report order.
    pub aggregated_payload: Value,
    /// Human-readable grouped report.
    pub report: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DependencyWarning>,
}

impl MultiToolResult {
    pub fn get(&self, id: &str) -> Option<&ToolResult> {
        self.results_by_id.get(id)
    }

    /// Results in report order.
    pub fn ordered(&self) -> impl Iterator<Item = &ToolResult> {
        self.order.iter().filter_map(|id| self.results_by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.ordered()
            .filter(|result| !result.success)
            .map(|result| result.id.as_str())
            .collect()
    }
}
