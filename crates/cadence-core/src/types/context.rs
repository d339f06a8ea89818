//! Per-run options and execution context.

use std::collections::{BTreeMap, HashMap};

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::invocation::ExecutionMode;
use super::results::ToolResult;

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Scheduling options for one run.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    #[builder(default = DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: usize,
    #[builder(default)]
    pub continue_on_error: bool,
    pub timeout_ms: Option<u64>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            continue_on_error: false,
            timeout_ms: None,
        }
    }
}

impl ExecutionOptions {
    /// Apply field-by-field overrides (e.g. from a JSON execution block).
    pub fn merged(&self, overrides: &ExecutionOverrides) -> Self {
        Self {
            max_concurrency: overrides
                .max_concurrency
                .filter(|value| *value > 0)
                .unwrap_or(self.max_concurrency),
            continue_on_error: overrides.continue_on_error.unwrap_or(self.continue_on_error),
            timeout_ms: overrides.timeout_ms.or(self.timeout_ms),
        }
    }

    /// Concurrency bound, never below one.
    pub fn concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

/// Optional option values supplied by a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOverrides {
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub continue_on_error: Option<bool>,
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,
}

/// State owned by one run, either top-level or a composite's child run.
///
/// A child context never sees its parent's state; values cross the boundary
/// only through the explicit copies in [`ExecutionContext::child`] and
/// [`ExecutionContext::exports`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub shared_state: Map<String, Value>,
    pub results_by_id: HashMap<String, ToolResult>,
    pub mode: ExecutionMode,
    pub options: ExecutionOptions,
}

impl ExecutionContext {
    pub fn new(mode: ExecutionMode, options: ExecutionOptions) -> Self {
        Self {
            shared_state: Map::new(),
            results_by_id: HashMap::new(),
            mode,
            options,
        }
    }

    pub fn with_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.shared_state.insert(key.into(), value);
        self
    }

    pub fn result(&self, id: &str) -> Option<&ToolResult> {
        self.results_by_id.get(id)
    }

    /// Store a result; successful, executed payloads are also published to
    /// the shared state under the invocation id.
    pub fn record(&mut self, result: ToolResult) {
        if result.success && !result.is_skipped() {
            self.shared_state
                .insert(result.id.clone(), result.payload.clone());
        }
        self.results_by_id.insert(result.id.clone(), result);
    }

    /// Build an independent child context seeded through `input_mappings`.
    pub fn child(
        &self,
        mode: ExecutionMode,
        input_mappings: &BTreeMap<String, String>,
    ) -> ExecutionContext {
        let mut child = ExecutionContext::new(mode, self.options.clone());
        for (parent_key, child_key) in input_mappings {
            if let Some(value) = self.shared_state.get(parent_key) {
                child.shared_state.insert(child_key.clone(), value.clone());
            } else {
                tracing::debug!(key = %parent_key, "input mapping source missing from parent state");
            }
        }
        child
    }

    /// Entries a finished child context hands back, keyed by parent key.
    pub fn exports(&self, output_mappings: &BTreeMap<String, String>) -> Map<String, Value> {
        let mut exports = Map::new();
        for (child_key, parent_key) in output_mappings {
            if let Some(value) = self.shared_state.get(child_key) {
                exports.insert(parent_key.clone(), value.clone());
            } else {
                tracing::debug!(key = %child_key, "output mapping source missing from child state");
            }
        }
        exports
    }

    /// Merge values exported by a child context into this one.
    pub fn absorb(&mut self, exports: Map<String, Value>) {
        self.shared_state.extend(exports);
    }

    /// View used by `custom` conditions.
    pub fn condition_scope(&self) -> Value {
        let results: Map<String, Value> = self
            .results_by_id
            .iter()
            .map(|(id, result)| {
                (
                    id.clone(),
                    json!({
                        "success": result.success,
                        "payload": result.payload,
                        "error": result.error_message(),
                    }),
                )
            })
            .collect();
        json!({
            "state": Value::Object(self.shared_state.clone()),
            "results": Value::Object(results),
        })
    }
}
