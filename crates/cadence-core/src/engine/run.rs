use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::{EngineEventPayload, EventEmitter};
use super::ExecutionEngine;
use crate::condition::evaluate_condition;
use crate::error::{CadenceError, DependencyWarning, ErrorCategory, ValidationError};
use crate::resilience::{with_fallback, with_retry};
use crate::resolver::{self, Resolution};
use crate::tools::{validate_invocation, RunnerContext};
use crate::types::{ConditionKind, ExecutionContext, ExecutionMode, MultiToolResult, ToolInvocation, ToolResult};

/// Result of one invocation plus the state a composite hands back.
struct Outcome {
    result: ToolResult,
    exports: Map<String, Value>,
}

impl From<ToolResult> for Outcome {
    fn from(result: ToolResult) -> Self {
        Self {
            result,
            exports: Map::new(),
        }
    }
}

/// Everything scoped to one top-level run, shared by nested composite runs.
pub(super) struct RunState<'e> {
    engine: &'e ExecutionEngine,
    emitter: EventEmitter,
    cancel: CancellationToken,
    run_id: Uuid,
    deadline: Option<(Instant, u64)>,
}

impl<'e> RunState<'e> {
    pub(super) fn new(engine: &'e ExecutionEngine, cancel: CancellationToken, timeout_ms: Option<u64>) -> Self {
        let run_id = Uuid::new_v4();
        Self {
            engine,
            emitter: EventEmitter::new(run_id, engine.event_sink.clone()),
            cancel,
            run_id,
            deadline: timeout_ms.map(|ms| (Instant::now() + Duration::from_millis(ms), ms)),
        }
    }

    pub(super) async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        invocations: Vec<ToolInvocation>,
    ) -> Result<MultiToolResult, CadenceError> {
        let started = Instant::now();
        self.emitter.emit(EngineEventPayload::RunStarted {
            mode: ctx.mode,
            invocation_count: invocations.len(),
        });

        let multi = match self.run_batch(ctx, invocations).await {
            Ok(multi) => multi,
            Err(err) => {
                tracing::warn!(run_id = %self.run_id, error = %err, "run stopped");
                return Err(err);
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %self.run_id,
            mode = %multi.mode,
            results = multi.len(),
            overall_success = multi.overall_success,
            duration_ms,
            "run completed"
        );
        self.emitter.emit(EngineEventPayload::RunCompleted {
            overall_success: multi.overall_success,
            results: multi.len(),
            duration_ms,
        });
        Ok(multi)
    }

    /// Abort and timeout checkpoint, consulted between scheduling steps.
    fn checkpoint(&self) -> Result<(), CadenceError> {
        if self.cancel.is_cancelled() {
            return Err(CadenceError::Aborted);
        }
        match self.deadline {
            Some((deadline, ms)) if Instant::now() >= deadline => Err(CadenceError::Timeout(ms)),
            _ => Ok(()),
        }
    }

    /// Resolve and run one batch in `ctx` under `ctx.mode`.
    fn run_batch<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
        invocations: Vec<ToolInvocation>,
    ) -> BoxFuture<'a, Result<MultiToolResult, CadenceError>> {
        async move {
            let mode = ctx.mode;
            let mut warnings = Vec::new();
            let (partial, invocations): (Vec<_>, Vec<_>) =
                invocations.into_iter().partition(|inv| inv.partial);
            for inv in partial {
                warnings.push(DependencyWarning::PartialSkipped {
                    id: inv.id,
                    name: inv.name,
                });
            }

            let Resolution {
                invocations,
                declared,
                warnings: resolver_warnings,
                ..
            } = resolver::resolve(invocations, mode);
            warnings.extend(resolver_warnings);
            for warning in &warnings {
                self.emitter.emit(EngineEventPayload::Warning {
                    warning: warning.clone(),
                });
            }

            let results = if mode == ExecutionMode::Single && invocations.len() > 1 {
                self.reject_single(ctx, &invocations)
            } else if mode == ExecutionMode::Parallel {
                self.run_waves(ctx, &invocations).await?
            } else {
                self.run_in_order(ctx, &invocations).await?
            };

            let mut by_id: HashMap<String, ToolResult> =
                results.into_iter().map(|r| (r.id.clone(), r)).collect();
            let ordered: Vec<ToolResult> = declared.iter().filter_map(|id| by_id.remove(id)).collect();

            let mut multi = self.engine.aggregator.aggregate(
                mode,
                ordered,
                &invocations,
                ctx.options.continue_on_error,
            );
            multi.warnings = warnings;
            Ok(multi)
        }
        .boxed()
    }

    fn reject_single(&self, ctx: &mut ExecutionContext, invocations: &[ToolInvocation]) -> Vec<ToolResult> {
        let error = ValidationError::InvalidModeUsage {
            mode: ExecutionMode::Single,
            count: invocations.len(),
        };
        self.engine.note_mistake(&error);
        invocations
            .iter()
            .map(|inv| {
                let result = ToolResult::failure(&inv.id, error.to_string(), error_details(ErrorCategory::Validation, inv));
                self.completed(&result);
                ctx.record(result.clone());
                result
            })
            .collect()
    }

    /// Sequential, conditional and composite batches: one at a time, in
    /// resolved order.
    async fn run_in_order(
        &self,
        ctx: &mut ExecutionContext,
        invocations: &[ToolInvocation],
    ) -> Result<Vec<ToolResult>, CadenceError> {
        let mut results = Vec::with_capacity(invocations.len());
        let mut halted_by: Option<&str> = None;

        for inv in invocations {
            let recovers = ctx.mode == ExecutionMode::Conditional && handles_failure(inv);
            if let Some(failed) = halted_by.filter(|_| !recovers) {
                results.push(self.not_attempted(ctx, inv, failed));
                continue;
            }
            self.checkpoint()?;

            let outcome = self.run_invocation(ctx, inv).await?;
            let result = commit(ctx, outcome);
            if !result.success && !ctx.options.continue_on_error && halted_by.is_none() {
                tracing::debug!(invocation_id = %inv.id, "halting batch after failure");
                halted_by = Some(inv.id.as_str());
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Parallel batches: readiness waves of at most `max_concurrency`
    /// invocations, each awaited as a whole.
    async fn run_waves(
        &self,
        ctx: &mut ExecutionContext,
        invocations: &[ToolInvocation],
    ) -> Result<Vec<ToolResult>, CadenceError> {
        let limit = ctx.options.concurrency();
        let known: HashSet<&str> = invocations.iter().map(|inv| inv.id.as_str()).collect();
        let mut done: HashSet<&str> = HashSet::new();
        let mut pending: Vec<&ToolInvocation> = invocations.iter().collect();
        let mut results = Vec::with_capacity(invocations.len());
        let mut halted_by: Option<&str> = None;

        while !pending.is_empty() {
            if let Some(failed) = halted_by {
                for inv in pending.drain(..) {
                    results.push(self.not_attempted(ctx, inv, failed));
                }
                break;
            }
            self.checkpoint()?;

            let mut wave: Vec<&ToolInvocation> = pending
                .iter()
                .copied()
                .filter(|inv| {
                    resolver::scheduling_dependency(inv)
                        .map_or(true, |dep| !known.contains(dep) || done.contains(dep))
                })
                .take(limit)
                .collect();
            if wave.is_empty() {
                tracing::debug!(blocked = pending.len(), "no invocation ready; releasing in declaration order");
                wave = pending.iter().copied().take(limit).collect();
            }
            pending.retain(|inv| !wave.iter().any(|launched| launched.id == inv.id));
            tracing::debug!(size = wave.len(), remaining = pending.len(), "launching wave");

            let outcomes = {
                let shared: &ExecutionContext = ctx;
                future::join_all(wave.iter().map(|inv| self.run_invocation(shared, *inv))).await
            };

            for (inv, outcome) in wave.into_iter().zip(outcomes) {
                let result = commit(ctx, outcome?);
                done.insert(inv.id.as_str());
                if !result.success && !ctx.options.continue_on_error && halted_by.is_none() {
                    halted_by = Some(inv.id.as_str());
                }
                results.push(result);
            }
        }
        Ok(results)
    }

    fn not_attempted(&self, ctx: &mut ExecutionContext, inv: &ToolInvocation, failed: &str) -> ToolResult {
        let reason = format!("batch halted after '{failed}' failed");
        self.emitter.emit(EngineEventPayload::InvocationSkipped {
            id: inv.id.clone(),
            reason: reason.clone(),
        });
        let result = ToolResult::not_attempted(&inv.id, Some(failed), reason);
        ctx.record(result.clone());
        result
    }

    /// Gate, execute and time one invocation.
    fn run_invocation<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        inv: &'a ToolInvocation,
    ) -> BoxFuture<'a, Result<Outcome, CadenceError>> {
        async move {
            let started = Instant::now();
            let verdict = match &inv.condition {
                Some(condition) => evaluate_condition(condition, ctx).map(Some),
                None => Ok(None),
            };
            if let Ok(Some(gate)) = &verdict {
                if !gate.met {
                    tracing::debug!(invocation_id = %inv.id, reason = %gate.reason, "condition not met; skipping");
                    self.emitter.emit(EngineEventPayload::InvocationSkipped {
                        id: inv.id.clone(),
                        reason: gate.reason.clone(),
                    });
                    return Ok(ToolResult::skipped(&inv.id, gate.reason.clone()).into());
                }
            }

            self.emitter.emit(EngineEventPayload::InvocationStarted {
                id: inv.id.clone(),
                tool: inv.name.clone(),
            });
            let mut outcome: Outcome = match verdict {
                Err(err) => self.reject(inv, err).into(),
                Ok(_) if inv.is_composite() => self.run_composite(ctx, inv).await?,
                Ok(_) => self.run_resilient(ctx, inv).await?.into(),
            };

            outcome.result.metrics.duration_ms = started.elapsed().as_millis() as u64;
            if outcome.result.success {
                self.engine.reset_mistakes();
            }
            self.completed(&outcome.result);
            Ok(outcome)
        }
        .boxed()
    }

    async fn run_composite(&self, ctx: &ExecutionContext, inv: &ToolInvocation) -> Result<Outcome, CadenceError> {
        let child_mode = inv.child_mode.unwrap_or(ExecutionMode::Sequential);
        let mut child = ctx.child(child_mode, &inv.input_mappings);
        tracing::debug!(
            invocation_id = %inv.id,
            children = inv.children.len(),
            mode = %child_mode,
            "running composite"
        );

        let multi = self.run_batch(&mut child, inv.children.clone()).await?;
        let exports = child.exports(&inv.output_mappings);
        let result = if multi.failed_ids().is_empty() {
            ToolResult::success(&inv.id, multi.aggregated_payload)
        } else {
            let failed: Vec<String> = multi.failed_ids().into_iter().map(str::to_string).collect();
            ToolResult::failure(
                &inv.id,
                format!("composite failed: {}", failed.join(", ")),
                json!({ "failed": failed, "report": multi.report }),
            )
        };
        Ok(Outcome { result, exports })
    }

    /// The runner call wrapped in the invocation's retry and fallback policies.
    async fn run_resilient(&self, ctx: &ExecutionContext, inv: &ToolInvocation) -> Result<ToolResult, CadenceError> {
        let primary = self.run_primary(ctx, inv);
        let Some(fallback) = inv.fallback.as_deref() else {
            return primary.await;
        };

        with_fallback(&inv.id, primary, |failed| async move {
            self.emitter.emit(EngineEventPayload::FallbackEngaged {
                id: inv.id.clone(),
                fallback_tool: fallback.name.clone(),
                error: failed.error_message().unwrap_or_default().to_string(),
            });
            Ok(self.run_invocation(ctx, fallback).await?.result)
        })
        .await
    }

    async fn run_primary(&self, ctx: &ExecutionContext, inv: &ToolInvocation) -> Result<ToolResult, CadenceError> {
        if let Err(err) = validate_invocation(&self.engine.catalog, inv) {
            return Ok(self.reject(inv, err));
        }
        let Some(policy) = inv.retry_policy else {
            return Ok(self.call_runner(ctx, inv, 0).await);
        };

        with_retry(
            &policy,
            &self.cancel,
            |attempt| self.call_runner(ctx, inv, attempt).map(Ok::<_, CadenceError>),
            |attempt, delay, failed| {
                self.emitter.emit(EngineEventPayload::InvocationRetrying {
                    id: inv.id.clone(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    error: failed.error_message().unwrap_or_default().to_string(),
                });
            },
        )
        .await
    }

    /// One attempt. Runner errors become a failed result.
    async fn call_runner(&self, ctx: &ExecutionContext, inv: &ToolInvocation, attempt: u32) -> ToolResult {
        if attempt == 0 {
            if let Some(usage) = &self.engine.usage {
                usage.record(&inv.name);
            }
        }

        let runner_ctx = RunnerContext {
            run_id: self.run_id,
            invocation_id: inv.id.clone(),
            attempt,
            shared_state: Arc::new(ctx.shared_state.clone()),
            cancel: self.cancel.child_token(),
            approver: self.engine.approver.clone(),
        };
        tracing::debug!(invocation_id = %inv.id, tool = %inv.name, attempt, "calling tool runner");

        match self.engine.runner.run(&inv.name, &inv.parameters, &runner_ctx).await {
            Ok(payload) => ToolResult::success(&inv.id, payload),
            Err(err) => {
                tracing::debug!(invocation_id = %inv.id, tool = %inv.name, error = %err, "tool runner failed");
                ToolResult::failure(&inv.id, err.to_string(), error_details(err.category(), inv))
            }
        }
    }

    fn reject(&self, inv: &ToolInvocation, error: ValidationError) -> ToolResult {
        self.engine.note_mistake(&error);
        ToolResult::failure(&inv.id, error.to_string(), error_details(ErrorCategory::Validation, inv))
    }

    fn completed(&self, result: &ToolResult) {
        self.emitter.emit(EngineEventPayload::InvocationCompleted {
            id: result.id.clone(),
            success: result.success,
            duration_ms: result.metrics.duration_ms,
            retry_count: result.metrics.retry_count,
        });
    }
}

fn commit(ctx: &mut ExecutionContext, outcome: Outcome) -> ToolResult {
    ctx.absorb(outcome.exports);
    ctx.record(outcome.result.clone());
    outcome.result
}

/// Conditional batches still run invocations gated on an `error` condition
/// after a halt.
fn handles_failure(inv: &ToolInvocation) -> bool {
    inv.condition
        .as_ref()
        .is_some_and(|condition| condition.kind == ConditionKind::Error)
}

fn error_details(category: ErrorCategory, inv: &ToolInvocation) -> Value {
    json!({ "category": category, "tool": inv.name })
}
