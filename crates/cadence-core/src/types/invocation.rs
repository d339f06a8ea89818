//! Invocation model shared by the parser, resolver and engine.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Execution strategy applied to a batch or sub-batch.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ExecutionMode {
    #[default]
    Single,
    Sequential,
    Parallel,
    Conditional,
    Composite,
}

/// What a [`Condition`] is evaluated against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ConditionKind {
    /// Expression over the source invocation's payload.
    Result,
    /// True iff the source invocation failed.
    Error,
    /// Expression over the whole shared context.
    Custom,
}

/// Gate evaluated against a prior result before an invocation runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type", alias = "kind")]
    pub kind: ConditionKind,
    #[serde(alias = "toolId")]
    pub source_id: String,
    #[serde(default)]
    pub expression: String,
}

impl Condition {
    pub fn new(kind: ConditionKind, source_id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            expression: expression.into(),
        }
    }
}

/// Retry policy attached to a single invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    #[serde(alias = "retries")]
    pub max_retries: u32,
    #[serde(default, alias = "backoff")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub exponential: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_ms,
            exponential: false,
        }
    }

    pub fn exponential(mut self) -> Self {
        self.exponential = true;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = if self.exponential {
            1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX)
        } else {
            1
        };
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// A single requested tool call plus its scheduling metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// The closing delimiter was never observed; never executed.
    #[serde(default)]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Box<ToolInvocation>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ToolInvocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_mode: Option<ExecutionMode>,
    /// Parent shared-state key -> child shared-state key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_mappings: BTreeMap<String, String>,
    /// Child shared-state key -> parent shared-state key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_mappings: BTreeMap<String, String>,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on = Some(id.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_fallback(mut self, fallback: ToolInvocation) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    pub fn with_children(mut self, child_mode: ExecutionMode, children: Vec<ToolInvocation>) -> Self {
        self.mode = ExecutionMode::Composite;
        self.child_mode = Some(child_mode);
        self.children = children;
        self
    }

    pub fn map_input(mut self, parent_key: impl Into<String>, child_key: impl Into<String>) -> Self {
        self.input_mappings.insert(parent_key.into(), child_key.into());
        self
    }

    pub fn map_output(mut self, child_key: impl Into<String>, parent_key: impl Into<String>) -> Self {
        self.output_mappings.insert(child_key.into(), parent_key.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Whether this invocation is a nested batch rather than a tool call.
    pub fn is_composite(&self) -> bool {
        !self.children.is_empty()
    }

    /// Short one-line description used in reports and logs.
    pub fn describe(&self) -> String {
        let mut out = format!("{} ({})", self.name, self.id);
        if self.is_composite() {
            let _ = write!(
                out,
                " [{} children, {}]",
                self.children.len(),
                self.child_mode.unwrap_or(ExecutionMode::Sequential)
            );
            return out;
        }
        for (key, value) in &self.parameters {
            let preview: String = value.chars().take(60).collect();
            let ellipsis = if value.chars().count() > 60 { "..." } else { "" };
            let _ = write!(out, " {key}={}{ellipsis}", preview.replace('\n', " "));
        }
        out
    }

    /// Render this invocation in the inline-tag grammar.
    pub fn to_inline_xml(&self) -> String {
        let mut out = format!("<{}>\n", self.name);
        if !self.id.is_empty() {
            let _ = writeln!(out, "<toolId>{}</toolId>", self.id);
        }
        if let Some(dep) = &self.depends_on {
            let _ = writeln!(out, "<dependsOn>{dep}</dependsOn>");
        }
        for (key, value) in &self.parameters {
            let _ = writeln!(out, "<{key}>{value}</{key}>");
        }
        let _ = write!(out, "</{}>", self.name);
        out
    }
}

/// One element of a parsed assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSegment {
    Text { content: String },
    Tool(ToolInvocation),
}

impl ContentSegment {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn as_invocation(&self) -> Option<&ToolInvocation> {
        match self {
            Self::Tool(invocation) => Some(invocation),
            Self::Text { .. } => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { content } => Some(content),
            Self::Tool(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Parallel".parse::<ExecutionMode>().unwrap(), ExecutionMode::Parallel);
        assert_eq!("sequential".parse::<ExecutionMode>().unwrap(), ExecutionMode::Sequential);
        assert!("batch".parse::<ExecutionMode>().is_err());
        assert_eq!(ExecutionMode::Composite.to_string(), "composite");
    }

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(3, 100).exponential();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));

        let flat = RetryPolicy::new(3, 100);
        assert_eq!(flat.delay_for_attempt(3), Duration::from_millis(100));
    }

    #[test]
    fn inline_xml_contains_id_dependency_and_params() {
        let invocation = ToolInvocation::new("t2", "read_file")
            .with_param("path", "src/lib.rs")
            .with_depends_on("t1");

        let xml = invocation.to_inline_xml();

        assert!(xml.starts_with("<read_file>\n"));
        assert!(xml.contains("<toolId>t2</toolId>"));
        assert!(xml.contains("<dependsOn>t1</dependsOn>"));
        assert!(xml.contains("<path>src/lib.rs</path>"));
        assert!(xml.ends_with("</read_file>"));
    }

    #[test]
    fn describe_truncates_long_values() {
        let long = "x".repeat(100);
        let invocation = ToolInvocation::new("t1", "write_to_file").with_param("content", long);
        let described = invocation.describe();
        assert!(described.starts_with("write_to_file (t1) content="));
        assert!(described.ends_with("..."));
    }

    #[test]
    fn condition_accepts_type_and_tool_id_aliases() {
        let condition: Condition = serde_json::from_value(serde_json::json!({
            "type": "error",
            "toolId": "build",
        }))
        .unwrap();
        assert_eq!(condition.kind, ConditionKind::Error);
        assert_eq!(condition.source_id, "build");
        assert!(condition.expression.is_empty());
    }
}
