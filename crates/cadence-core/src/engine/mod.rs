//! Execution engine: drives a batch of invocations through its mode's
//! strategy, delegating every side effect to the injected [`ToolRunner`].

pub mod events;
mod run;

pub use events::{EngineEvent, EngineEventPayload, EngineEventSink};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::aggregate::ResultAggregator;
use crate::config::EngineConfig;
use crate::error::{CadenceError, ValidationError};
use crate::parser::ParsedMessage;
use crate::tools::{Approver, ToolCatalog, ToolRunner, UsageRecorder};
use crate::types::{
    ExecutionContext, ExecutionMode, ExecutionOptions, MultiToolResult, ToolInvocation,
};

use run::RunState;

pub const DEFAULT_MAX_CONSECUTIVE_MISTAKES: usize = 3;

/// Runs parsed batches.
///
/// The engine is reusable across runs; per-run state lives in the
/// [`ExecutionContext`]. The consecutive-mistake counter is the only state
/// carried from one run to the next.
pub struct ExecutionEngine {
    catalog: Arc<ToolCatalog>,
    runner: Arc<dyn ToolRunner>,
    approver: Option<Arc<dyn Approver>>,
    usage: Option<Arc<dyn UsageRecorder>>,
    event_sink: Option<EngineEventSink>,
    aggregator: ResultAggregator,
    mistakes: AtomicUsize,
    max_consecutive_mistakes: usize,
}

impl ExecutionEngine {
    pub fn new(catalog: impl Into<Arc<ToolCatalog>>, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            catalog: catalog.into(),
            runner,
            approver: None,
            usage: None,
            event_sink: None,
            aggregator: ResultAggregator::default(),
            mistakes: AtomicUsize::new(0),
            max_consecutive_mistakes: DEFAULT_MAX_CONSECUTIVE_MISTAKES,
        }
    }

    pub fn from_config(
        catalog: impl Into<Arc<ToolCatalog>>,
        runner: Arc<dyn ToolRunner>,
        config: &EngineConfig,
    ) -> Self {
        Self::new(catalog, runner)
            .with_mistake_limit(config.max_consecutive_mistakes)
            .with_report_payload_chars(config.report_payload_chars)
    }

    /// Handed to runners through [`crate::tools::RunnerContext`]; never
    /// called by the engine.
    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn with_usage_recorder(mut self, usage: Arc<dyn UsageRecorder>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_event_sink(mut self, sink: EngineEventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn with_mistake_limit(mut self, limit: usize) -> Self {
        self.max_consecutive_mistakes = limit;
        self
    }

    pub fn with_report_payload_chars(mut self, chars: usize) -> Self {
        self.aggregator = ResultAggregator::new(chars);
        self
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Invalid invocations seen since the last successfully executed one.
    pub fn consecutive_mistakes(&self) -> usize {
        self.mistakes.load(Ordering::SeqCst)
    }

    pub fn reset_mistakes(&self) {
        self.mistakes.store(0, Ordering::SeqCst);
    }

    pub fn mistake_limit_reached(&self) -> bool {
        self.consecutive_mistakes() >= self.max_consecutive_mistakes
    }

    /// Execute a batch in a fresh context.
    ///
    /// Only [`CadenceError::Aborted`] and [`CadenceError::Timeout`] are
    /// returned as errors; every other failure is part of the result.
    pub async fn execute(
        &self,
        invocations: Vec<ToolInvocation>,
        mode: ExecutionMode,
        options: ExecutionOptions,
    ) -> Result<MultiToolResult, CadenceError> {
        self.execute_with_cancel(invocations, mode, options, CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), aborting at the next checkpoint once
    /// `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        invocations: Vec<ToolInvocation>,
        mode: ExecutionMode,
        options: ExecutionOptions,
        cancel: CancellationToken,
    ) -> Result<MultiToolResult, CadenceError> {
        let mut ctx = ExecutionContext::new(mode, options);
        self.execute_in(&mut ctx, invocations, cancel).await
    }

    /// Execute a batch in a caller-owned context, using its mode and options.
    ///
    /// Results and published payloads stay in `ctx` afterwards, so a caller
    /// can seed state before the run and inspect it after.
    pub async fn execute_in(
        &self,
        ctx: &mut ExecutionContext,
        invocations: Vec<ToolInvocation>,
        cancel: CancellationToken,
    ) -> Result<MultiToolResult, CadenceError> {
        let run = RunState::new(self, cancel, ctx.options.timeout_ms);
        run.execute(ctx, invocations).await
    }

    /// Execute what a parsed message asked for: its mode, with its embedded
    /// options layered over `options`.
    pub async fn execute_message(
        &self,
        message: ParsedMessage,
        options: ExecutionOptions,
    ) -> Result<MultiToolResult, CadenceError> {
        let options = match &message.options {
            Some(overrides) => options.merged(overrides),
            None => options,
        };
        let mode = message.mode;
        self.execute(message.into_invocations(), mode, options).await
    }

    fn note_mistake(&self, error: &ValidationError) -> usize {
        let count = self.mistakes.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(
            consecutive_mistakes = count,
            limit = self.max_consecutive_mistakes,
            error = %error,
            "invalid invocation"
        );
        count
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("tools", &self.catalog.len())
            .field("approver", &self.approver.as_ref().map(|_| ".."))
            .field("usage", &self.usage.as_ref().map(|_| ".."))
            .field("event_sink", &self.event_sink.as_ref().map(|_| ".."))
            .field("consecutive_mistakes", &self.consecutive_mistakes())
            .field("max_consecutive_mistakes", &self.max_consecutive_mistakes)
            .finish()
    }
}

#[cfg(test)]
mod tests;
