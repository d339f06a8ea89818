//! JSON-block grammar: a fenced code block holding `{"execution": {...}}`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::types::{Condition, ExecutionMode, ExecutionOverrides, RetryPolicy, ToolInvocation};

static FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_-]*[ \t]*\r?\n?").expect("fence regex must compile"));

const FENCE_CLOSE: &str = "```";
const COMPOSITE_NAME: &str = "composite";

#[derive(Debug, Deserialize)]
struct ExecutionEnvelope {
    execution: ExecutionBlock,
}

#[derive(Debug, Deserialize)]
struct ExecutionBlock {
    #[serde(default)]
    mode: ExecutionMode,
    #[serde(default)]
    tools: Vec<JsonToolSpec>,
    #[serde(default)]
    options: Option<ExecutionOverrides>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonToolSpec {
    #[serde(default)]
    name: String,
    #[serde(default, alias = "id")]
    tool_id: Option<String>,
    #[serde(default)]
    depends_on: Option<String>,
    #[serde(default, alias = "parameters")]
    params: Map<String, Value>,
    #[serde(default)]
    condition: Option<Condition>,
    #[serde(default, alias = "retryPolicy")]
    retry: Option<RetryPolicy>,
    #[serde(default)]
    fallback: Option<Box<JsonToolSpec>>,
    #[serde(default)]
    tools: Vec<JsonToolSpec>,
    /// Mode of the nested `tools`, when present.
    #[serde(default, alias = "childMode")]
    mode: Option<ExecutionMode>,
    #[serde(default)]
    input_mappings: BTreeMap<String, String>,
    #[serde(default)]
    output_mappings: BTreeMap<String, String>,
}

/// A parsed execution block and where it sat in the message.
#[derive(Debug)]
pub(crate) struct JsonBlock {
    pub before: std::ops::Range<usize>,
    pub after: std::ops::Range<usize>,
    pub mode: ExecutionMode,
    pub options: Option<ExecutionOverrides>,
    pub invocations: Vec<ToolInvocation>,
}

/// Result of looking for an execution block.
#[derive(Debug)]
pub(crate) enum JsonScan {
    Found(JsonBlock),
    /// An execution block was opened but its fence never closed; everything
    /// from `start` on is withheld.
    Unterminated { start: usize },
    NotFound { malformed: Vec<String> },
}

/// Find the first fenced block that parses as an execution envelope.
pub(crate) fn scan(text: &str) -> JsonScan {
    let mut malformed = Vec::new();
    let mut cursor = 0;

    while let Some(open) = FENCE_OPEN.find_at(text, cursor) {
        let content_start = open.end();
        let Some(rel) = text[content_start..].find(FENCE_CLOSE) else {
            let content = text[content_start..].trim_start();
            if content.starts_with('{') && content.contains("\"execution\"") {
                return JsonScan::Unterminated { start: open.start() };
            }
            break;
        };
        let content_end = content_start + rel;
        let block_end = content_end + FENCE_CLOSE.len();
        let content = text[content_start..content_end].trim();

        if content.starts_with('{') {
            match serde_json::from_str::<ExecutionEnvelope>(content) {
                Ok(envelope) => {
                    let mut position = 0;
                    let block = envelope.execution;
                    let invocations = block
                        .tools
                        .into_iter()
                        .map(|spec| {
                            position += 1;
                            spec.into_invocation(format!("tool-{position}"), block.mode)
                        })
                        .collect();
                    return JsonScan::Found(JsonBlock {
                        before: 0..open.start(),
                        after: block_end..text.len(),
                        mode: block.mode,
                        options: block.options,
                        invocations,
                    });
                }
                Err(err) if content.contains("\"execution\"") => {
                    tracing::debug!(error = %err, "ignoring malformed execution block");
                    malformed.push(err.to_string());
                }
                Err(_) => {}
            }
        }
        cursor = block_end;
    }

    JsonScan::NotFound { malformed }
}

impl JsonToolSpec {
    fn into_invocation(self, default_id: String, mode: ExecutionMode) -> ToolInvocation {
        let id = self
            .tool_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(default_id);
        let name = if self.name.is_empty() && !self.tools.is_empty() {
            COMPOSITE_NAME.to_string()
        } else {
            self.name
        };

        let mut invocation = ToolInvocation::new(id.clone(), name).with_mode(mode);
        invocation.parameters = self
            .params
            .into_iter()
            .filter_map(|(key, value)| stringify_param(value).map(|value| (key, value)))
            .collect();
        invocation.depends_on = self.depends_on.filter(|dep| !dep.trim().is_empty());
        invocation.condition = self.condition;
        invocation.retry_policy = self.retry;
        invocation.fallback = self
            .fallback
            .map(|fallback| Box::new(fallback.into_invocation(format!("{id}-fallback"), mode)));

        if !self.tools.is_empty() {
            let child_mode = self.mode.unwrap_or(ExecutionMode::Sequential);
            let children = self
                .tools
                .into_iter()
                .enumerate()
                .map(|(idx, child)| child.into_invocation(format!("{id}.{}", idx + 1), child_mode))
                .collect();
            invocation = invocation.with_children(child_mode, children);
        }
        invocation.input_mappings = self.input_mappings;
        invocation.output_mappings = self.output_mappings;
        invocation
    }
}

/// Parameters travel as strings; structured values keep their JSON text.
fn stringify_param(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
