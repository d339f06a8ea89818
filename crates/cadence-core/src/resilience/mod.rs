//! Retry and fallback wrappers around a single invocation's execution.
//!
//! Both take the execution as a closure so they compose: the engine wraps the
//! runner call in [`with_retry`] and that in [`with_fallback`], whose fallback
//! is itself executed through the same path (and may carry its own retry).

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::CadenceError;
use crate::types::{RetryPolicy, ToolResult};

/// Run `attempt` until it succeeds or `policy.max_retries` extra attempts are
/// used up.
///
/// `attempt` receives the zero-based attempt number. Between attempts the
/// backoff delay is awaited; cancelling `cancel` during that wait aborts the
/// run. `on_retry` is told about each scheduled retry (1-based) and its delay.
/// The returned result carries `metrics.retry_count`.
pub async fn with_retry<F, Fut, R>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
    mut on_retry: R,
) -> Result<ToolResult, CadenceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ToolResult, CadenceError>>,
    R: FnMut(u32, Duration, &ToolResult),
{
    let mut retries = 0;
    loop {
        let result = attempt(retries).await?;
        if result.success || retries >= policy.max_retries {
            return Ok(result.with_retry_count(retries));
        }

        retries += 1;
        let delay = policy.delay_for_attempt(retries);
        tracing::warn!(
            invocation_id = %result.id,
            attempt = retries,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = result.error_message().unwrap_or_default(),
            "Retrying after failure"
        );
        on_retry(retries, delay, &result);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CadenceError::Aborted),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Run `primary`; if it fails (as a failed result or a non-abort error), run
/// `fallback` instead and return its result under the original id.
///
/// `fallback` receives the primary's failed result.
pub async fn with_fallback<P, F, FFut>(
    original_id: &str,
    primary: P,
    fallback: F,
) -> Result<ToolResult, CadenceError>
where
    P: Future<Output = Result<ToolResult, CadenceError>>,
    F: FnOnce(ToolResult) -> FFut,
    FFut: Future<Output = Result<ToolResult, CadenceError>>,
{
    let failed = match primary.await {
        Ok(result) if result.success => return Ok(result),
        Ok(result) => result,
        Err(err) if err.is_abort() => return Err(err),
        Err(err) => ToolResult::failure(original_id, err.to_string(), serde_json::Value::Null),
    };

    tracing::warn!(
        invocation_id = %original_id,
        error = failed.error_message().unwrap_or_default(),
        "Primary invocation failed; running fallback"
    );
    let mut substitute = fallback(failed).await?;
    substitute.id = original_id.to_string();
    Ok(substitute)
}
