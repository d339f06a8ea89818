//! Convenience re-exports for common use.

pub use crate::config::EngineConfig;
pub use crate::engine::{EngineEvent, EngineEventPayload, EngineEventSink, ExecutionEngine};
pub use crate::error::{CadenceError, DependencyWarning, ParseAnomaly, Result, ValidationError};
pub use crate::parser::{MessageParser, ParsedMessage};
pub use crate::tools::{
    Approver, FnRunner, FnTool, RunnerContext, Tool, ToolArguments, ToolCatalog, ToolRegistry,
    ToolRunner, ToolSpec, UsageRecorder,
};
pub use crate::types::{
    Condition, ConditionKind, ContentSegment, ExecutionContext, ExecutionMode, ExecutionOptions,
    MultiToolResult, RetryPolicy, ToolInvocation, ToolResult,
};
