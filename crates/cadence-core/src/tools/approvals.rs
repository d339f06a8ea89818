//! Approval gate used by tool runners for user-visible side effects.
//!
//! The engine never consults an [`Approver`] itself; it only hands one to
//! runners through [`super::RunnerContext`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Tool approval policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    Never,
    Ask,
    Always,
}

/// What kind of side effect is being gated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    CommandExecution,
    FileChange,
    Browser,
    Mcp,
    Other,
}

impl ApprovalKind {
    /// Default classification for the standard coding-agent tool names.
    pub fn for_tool(name: &str) -> Self {
        match name {
            "execute_command" => Self::CommandExecution,
            "write_to_file" | "replace_in_file" => Self::FileChange,
            "browser_action" | "web_fetch" => Self::Browser,
            "use_mcp_tool" | "access_mcp_resource" => Self::Mcp,
            _ => Self::Other,
        }
    }
}

/// An approval request raised by a runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub kind: ApprovalKind,
    pub message: String,
}

/// Async approval handler callback.
pub type ApprovalHandler = Arc<dyn Fn(ApprovalRequest) -> BoxFuture<'static, bool> + Send + Sync>;

/// Capability injected into runners that need user consent.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn request(&self, kind: ApprovalKind, message: &str) -> bool;
}

/// Approver driven by an [`ApprovalPolicy`]; `Ask` defers to a handler and
/// declines when none is configured.
#[derive(Clone)]
pub struct PolicyApprover {
    policy: ApprovalPolicy,
    handler: Option<ApprovalHandler>,
}

impl PolicyApprover {
    pub fn new(policy: ApprovalPolicy) -> Self {
        Self {
            policy,
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: ApprovalHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn policy(&self) -> ApprovalPolicy {
        self.policy
    }
}

impl std::fmt::Debug for PolicyApprover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyApprover")
            .field("policy", &self.policy)
            .field("handler", &self.handler.as_ref().map(|_| ".."))
            .finish()
    }
}

#[async_trait]
impl Approver for PolicyApprover {
    async fn request(&self, kind: ApprovalKind, message: &str) -> bool {
        match self.policy {
            ApprovalPolicy::Always => true,
            ApprovalPolicy::Never => false,
            ApprovalPolicy::Ask => {
                let Some(handler) = &self.handler else {
                    tracing::debug!(?kind, "approval requested without handler; declining");
                    return false;
                };
                handler(ApprovalRequest {
                    kind,
                    message: message.to_string(),
                })
                .await
            }
        }
    }
}
