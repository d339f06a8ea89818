//! Reduce per-invocation results into a [`MultiToolResult`] and a grouped,
//! human-readable report.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde_json::Value;

use crate::types::{ExecutionMode, MultiToolResult, ToolInvocation, ToolResult};

pub const DEFAULT_REPORT_PAYLOAD_CHARS: usize = 2000;

/// Builds [`MultiToolResult`]s; payloads in reports are cut to
/// `payload_chars` characters.
#[derive(Debug, Clone, Copy)]
pub struct ResultAggregator {
    pub payload_chars: usize,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self {
            payload_chars: DEFAULT_REPORT_PAYLOAD_CHARS,
        }
    }
}

impl ResultAggregator {
    pub fn new(payload_chars: usize) -> Self {
        Self { payload_chars }
    }

    /// Merge `results` (in report order) into one outcome.
    ///
    /// `overall_success` is `continue_on_error || every result succeeded`.
    pub fn aggregate(
        &self,
        mode: ExecutionMode,
        results: Vec<ToolResult>,
        invocations: &[ToolInvocation],
        continue_on_error: bool,
    ) -> MultiToolResult {
        let report = self.report(mode, &results, invocations);
        let overall_success = continue_on_error || results.iter().all(|result| result.success);
        let order: Vec<String> = results.iter().map(|result| result.id.clone()).collect();
        let aggregated_payload = Value::Array(results.iter().map(|result| result.payload.clone()).collect());
        let results_by_id = results
            .into_iter()
            .map(|result| (result.id.clone(), result))
            .collect();

        MultiToolResult {
            mode,
            results_by_id,
            order,
            overall_success,
            aggregated_payload,
            report,
            warnings: Vec::new(),
        }
    }

    /// Render a mode header followed by one numbered entry per result.
    pub fn report(&self, mode: ExecutionMode, results: &[ToolResult], invocations: &[ToolInvocation]) -> String {
        let by_id: HashMap<&str, &ToolInvocation> =
            invocations.iter().map(|inv| (inv.id.as_str(), inv)).collect();

        let skipped = results.iter().filter(|r| r.is_skipped()).count();
        let not_attempted = results.iter().filter(|r| r.is_not_attempted()).count();
        let succeeded = results.iter().filter(|r| r.success).count() - skipped;
        let failed = results.len() - succeeded - skipped - not_attempted;

        let mut out = format!(
            "[{} execution: {} {}, {succeeded} succeeded, {failed} failed",
            capitalize(&mode.to_string()),
            results.len(),
            if results.len() == 1 { "tool" } else { "tools" },
        );
        if skipped > 0 {
            let _ = write!(out, ", {skipped} skipped");
        }
        if not_attempted > 0 {
            let _ = write!(out, ", {not_attempted} not attempted");
        }
        out.push(']');

        for (idx, result) in results.iter().enumerate() {
            let description = by_id
                .get(result.id.as_str())
                .map(|inv| inv.describe())
                .unwrap_or_else(|| result.id.clone());
            let _ = write!(out, "\n{}. {} {description}", idx + 1, marker(result));

            let detail = if result.is_skipped() {
                result.payload["reason"].as_str().unwrap_or_default().to_string()
            } else if let Some(error) = &result.error {
                if result.is_not_attempted() {
                    match error.details.get("haltedBy").and_then(Value::as_str) {
                        Some(halted_by) => format!("halted after '{halted_by}' failed"),
                        None => error.message.clone(),
                    }
                } else {
                    format!("Error: {}", error.message)
                }
            } else {
                self.render_payload(&result.payload)
            };
            for line in detail.lines() {
                let _ = write!(out, "\n   {line}");
            }
        }
        out
    }

    fn render_payload(&self, payload: &Value) -> String {
        let text = match payload {
            Value::Null => return String::new(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let total = text.chars().count();
        if total <= self.payload_chars {
            return text;
        }
        let kept: String = text.chars().take(self.payload_chars).collect();
        format!("{kept}... ({} more chars)", total - self.payload_chars)
    }
}

/// [`ResultAggregator::aggregate`] with default settings and no invocation
/// descriptions.
pub fn aggregate(mode: ExecutionMode, results: Vec<ToolResult>, continue_on_error: bool) -> MultiToolResult {
    ResultAggregator::default().aggregate(mode, results, &[], continue_on_error)
}

/// [`ResultAggregator::report`] with default settings.
pub fn aggregate_report(mode: ExecutionMode, results: &[ToolResult], invocations: &[ToolInvocation]) -> String {
    ResultAggregator::default().report(mode, results, invocations)
}

fn marker(result: &ToolResult) -> &'static str {
    if result.is_skipped() {
        "[skipped]"
    } else if result.is_not_attempted() {
        "[not attempted]"
    } else if result.success {
        "[ok]"
    } else {
        "[error]"
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
