//! Error types for Cadence.

pub mod unified;

pub use unified::{DependencyWarning, ErrorCategory, ParseAnomaly, RecoverySuggestion};

use thiserror::Error;

use crate::types::ExecutionMode;

/// Primary error type for all Cadence operations.
///
/// Only [`CadenceError::Aborted`] and [`CadenceError::Timeout`] ever escape
/// [`crate::engine::ExecutionEngine::execute`]; every other failure is turned
/// into a failed [`crate::types::ToolResult`] or a warning.
#[derive(Error, Debug)]
pub enum CadenceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Run aborted")]
    Aborted,

    #[error("Run timed out after {0}ms")]
    Timeout(u64),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Contract violations detected before an invocation is handed to a runner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    #[error("missing required parameter '{parameter}' for tool '{tool}'")]
    MissingParameter { tool: String, parameter: String },

    #[error("{mode} mode accepts exactly one invocation, got {count}")]
    InvalidModeUsage { mode: ExecutionMode, count: usize },

    #[error("invalid condition expression '{expression}': {message}")]
    InvalidCondition { expression: String, message: String },
}

impl CadenceError {
    /// Create a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::ConfigFile(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Validation(_) | Self::InvalidArgument(_) => ErrorCategory::Validation,
            Self::ToolExecution { .. } | Self::Io(_) => ErrorCategory::Execution,
            Self::Aborted | Self::Timeout(_) => ErrorCategory::Aborted,
            Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error unwinds a whole run.
    pub fn is_abort(&self) -> bool {
        matches!(self.category(), ErrorCategory::Aborted)
    }

    /// Whether a retry policy may re-run the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Execution)
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Validation => RecoverySuggestion::FixInvocation,
            ErrorCategory::Execution => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Aborted => RecoverySuggestion::RestartRun,
            ErrorCategory::Serialization => RecoverySuggestion::CheckToolImplementation,
            _ => RecoverySuggestion::ReportBug,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, CadenceError>;
