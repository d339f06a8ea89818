//! Error classification, recovery hints and non-fatal dependency warnings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Parse,
    Validation,
    Dependency,
    Execution,
    Aborted,
    Configuration,
    Serialization,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    FixInvocation,
    CheckConfiguration,
    CheckToolImplementation,
    RestartRun,
    ReportBug,
}

/// A dependency or batch anomaly that was repaired instead of failing the run.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencyWarning {
    #[error("duplicate invocation id '{original}' renamed to '{replacement}'")]
    DuplicateId {
        original: String,
        replacement: String,
    },

    #[error("invocation '{id}' depends on unknown id '{depends_on}'; dependency dropped")]
    DanglingDependency { id: String, depends_on: String },

    #[error("invocation '{id}' depends on itself; dependency dropped")]
    SelfDependency { id: String },

    #[error("dependency cycle among [{}]; scheduling in declaration order", .ids.join(", "))]
    Cycle { ids: Vec<String> },

    #[error("partial invocation '{id}' ({name}) was not executed")]
    PartialSkipped { id: String, name: String },
}

impl DependencyWarning {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PartialSkipped { .. } => ErrorCategory::Parse,
            _ => ErrorCategory::Dependency,
        }
    }
}

/// A malformed or incomplete construct in an assistant message. Never fatal;
/// the construct degrades to plain text or a partial invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseAnomaly {
    #[error("malformed JSON execution block: {message}")]
    MalformedJsonBlock { message: String },

    #[error("unterminated JSON execution block withheld")]
    UnterminatedJsonBlock,

    #[error("unterminated <{wrapper}> batch; parsed to end of message")]
    UnterminatedBatch { wrapper: String },

    #[error("additional <{wrapper}> batch ignored")]
    ExtraBatchIgnored { wrapper: String },

    #[error("duplicate <{parameter}> in <{tool}> ignored")]
    DuplicateParameter { tool: String, parameter: String },

    #[error("<{tool}> block is not closed yet")]
    PartialInvocation { tool: String },
}

impl ParseAnomaly {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Parse
    }
}
