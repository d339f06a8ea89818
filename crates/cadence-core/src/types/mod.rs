//! Shared data model: invocations, segments, results and run context.

pub mod context;
pub mod invocation;
pub mod results;

pub use context::{ExecutionContext, ExecutionOptions, ExecutionOverrides, DEFAULT_MAX_CONCURRENCY};
pub use invocation::{
    Condition, ConditionKind, ContentSegment, ExecutionMode, RetryPolicy, ToolInvocation,
};
pub use results::{MultiToolResult, ResultMetrics, ResultStatus, ToolError, ToolResult};
