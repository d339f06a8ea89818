//! The side-effect boundary: the engine delegates every tool call to a
//! [`ToolRunner`].

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::approvals::Approver;
use super::arguments::ToolArguments;
use crate::error::CadenceError;

/// Context available to a runner while it executes one invocation.
#[derive(Clone)]
pub struct RunnerContext {
    pub run_id: Uuid,
    pub invocation_id: String,
    /// Zero for the first attempt, incremented by each retry.
    pub attempt: u32,
    /// Read-only snapshot of the owning context's shared state.
    pub shared_state: Arc<Map<String, Value>>,
    /// Cancelled when the run is aborted. Honouring it is up to the runner.
    pub cancel: CancellationToken,
    pub approver: Option<Arc<dyn Approver>>,
}

impl RunnerContext {
    pub fn new(invocation_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            invocation_id: invocation_id.into(),
            attempt: 0,
            shared_state: Arc::new(Map::new()),
            cancel: CancellationToken::new(),
            approver: None,
        }
    }

    pub fn state(&self, key: &str) -> Option<&Value> {
        self.shared_state.get(key)
    }
}

impl std::fmt::Debug for RunnerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerContext")
            .field("run_id", &self.run_id)
            .field("invocation_id", &self.invocation_id)
            .field("attempt", &self.attempt)
            .field("shared_state_keys", &self.shared_state.len())
            .field("approver", &self.approver.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Performs the actual side effect of a named tool.
///
/// An `Err` is captured into the invocation's [`crate::types::ToolResult`];
/// it never crashes the batch.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(
        &self,
        name: &str,
        params: &BTreeMap<String, String>,
        ctx: &RunnerContext,
    ) -> Result<Value, CadenceError>;
}

type RunnerHandler = dyn Fn(
        String,
        ToolArguments,
        RunnerContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, CadenceError>> + Send>>
    + Send
    + Sync;

/// Closure-based runner for quick wiring and tests.
#[derive(Clone)]
pub struct FnRunner {
    handler: Arc<RunnerHandler>,
}

impl FnRunner {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(String, ToolArguments, RunnerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CadenceError>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |name, args, ctx| Box::pin(handler(name, args, ctx))),
        }
    }
}

impl std::fmt::Debug for FnRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRunner").finish_non_exhaustive()
    }
}

#[async_trait]
impl ToolRunner for FnRunner {
    async fn run(
        &self,
        name: &str,
        params: &BTreeMap<String, String>,
        ctx: &RunnerContext,
    ) -> Result<Value, CadenceError> {
        (self.handler)(name.to_string(), ToolArguments::new(params.clone()), ctx.clone()).await
    }
}
