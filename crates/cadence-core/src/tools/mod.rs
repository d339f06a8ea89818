//! Collaborator interfaces and the tool catalogue.

pub mod approvals;
pub mod arguments;
pub mod catalog;
pub mod runner;
pub mod tool;
pub mod usage;
pub mod validation;

pub use approvals::{ApprovalHandler, ApprovalKind, ApprovalPolicy, ApprovalRequest, Approver, PolicyApprover};
pub use arguments::ToolArguments;
pub use catalog::{ParamSpec, ToolCatalog, ToolSpec};
pub use runner::{FnRunner, RunnerContext, ToolRunner};
pub use tool::{FnTool, Tool, ToolRegistry};
pub use usage::{UsageCounter, UsageRecorder};
pub use validation::validate_invocation;
