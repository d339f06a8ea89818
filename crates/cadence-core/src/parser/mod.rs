//! Message parser: recovers tool invocations from an assistant message.
//!
//! Two grammars are normalized into [`ContentSegment`]s:
//!
//! - inline tags, `<read_file><path>src/lib.rs</path></read_file>`, optionally
//!   grouped by a `<multi_tool_use mode="parallel">` (or legacy `<parallel>` /
//!   `<sequential>`) wrapper;
//! - a fenced JSON block holding `{"execution": {"mode": ..., "tools": [...]}}`.
//!
//! When a message carries a valid JSON execution block, it wins and the rest of
//! the message is kept as plain text. Parsing is total: malformed input
//! degrades to text, and a block cut off mid-stream becomes a trailing
//! `partial` invocation.

mod inline;
mod json_block;

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::ParseAnomaly;
use crate::resolver::chain_sequential;
use crate::tools::ToolCatalog;
use crate::types::{ContentSegment, ExecutionMode, ExecutionOverrides, ToolInvocation};

use inline::{is_tag_fragment, push_text, InlineScan};
use json_block::JsonScan;

pub const DEFAULT_WRITE_TOOL: &str = "write_to_file";
pub const DEFAULT_WRITE_CONTENT_PARAM: &str = "content";

const MULTI_TOOL_USE: &str = "multi_tool_use";
const WRAPPER_NAMES: [&str; 3] = [MULTI_TOOL_USE, "parallel", "sequential"];

static WRAPPER_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        <multi_tool_use\s+mode\s*=\s*["'](?i:(?P<mode>parallel|sequential))["']\s*>
        | <(?P<legacy>parallel|sequential)>"#,
    )
    .expect("batch wrapper regex must compile")
});

/// A `<multi_tool_use mode="...">` open tag cut off inside its attribute.
static WRAPPER_ATTR_FRAGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^multi_tool_use\s+(?:m(?:o(?:d(?:e(?:\s*(?:=\s*(?:["'][A-Za-z]*["']?)?)?)?)?)?)?)?\s*$"#)
        .expect("wrapper fragment regex must compile")
});

/// Everything recovered from one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub segments: Vec<ContentSegment>,
    /// Mode requested by the batch wrapper or JSON block; `Single` otherwise.
    pub mode: ExecutionMode,
    /// Options embedded in a JSON execution block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ExecutionOverrides>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anomalies: Vec<ParseAnomaly>,
}

impl ParsedMessage {
    pub fn invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.segments.iter().filter_map(ContentSegment::as_invocation)
    }

    pub fn into_invocations(self) -> Vec<ToolInvocation> {
        self.segments
            .into_iter()
            .filter_map(|segment| match segment {
                ContentSegment::Tool(invocation) => Some(invocation),
                ContentSegment::Text { .. } => None,
            })
            .collect()
    }

    /// Whether the message ended inside an unterminated tool block.
    pub fn has_partial(&self) -> bool {
        self.invocations().any(|invocation| invocation.partial)
    }

    /// Text segments joined by blank lines.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(ContentSegment::as_text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Located batch wrapper.
struct Wrapper {
    name: &'static str,
    mode: ExecutionMode,
    start: usize,
    inner_start: usize,
    /// Start and end of the closing tag, if present.
    close: Option<(usize, usize)>,
}

/// Grammar-normalizing parser over a [`ToolCatalog`].
#[derive(Debug, Clone)]
pub struct MessageParser {
    pub(crate) catalog: Arc<ToolCatalog>,
    pub(crate) write_tool_name: String,
    pub(crate) write_content_param: String,
}

impl MessageParser {
    pub fn new(catalog: impl Into<Arc<ToolCatalog>>) -> Self {
        Self {
            catalog: catalog.into(),
            write_tool_name: DEFAULT_WRITE_TOOL.to_string(),
            write_content_param: DEFAULT_WRITE_CONTENT_PARAM.to_string(),
        }
    }

    pub fn from_config(catalog: impl Into<Arc<ToolCatalog>>, config: &EngineConfig) -> Self {
        Self::new(catalog).with_write_tool(&config.write_tool_name, &config.write_content_param)
    }

    /// Designate the tool whose content parameter is matched up to its last
    /// closing tag.
    pub fn with_write_tool(mut self, tool: impl Into<String>, content_param: impl Into<String>) -> Self {
        self.write_tool_name = tool.into();
        self.write_content_param = content_param.into();
        self
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Parse `text` into ordered segments.
    pub fn parse(&self, text: &str) -> Vec<ContentSegment> {
        self.parse_message(text).segments
    }

    /// Parse `text`, keeping the requested mode, options and anomalies.
    pub fn parse_message(&self, text: &str) -> ParsedMessage {
        let mut parsed = ParsedMessage::default();

        match json_block::scan(text) {
            JsonScan::Found(block) => {
                push_text(&mut parsed.segments, &text[block.before]);
                let mut invocations = block.invocations;
                if block.mode == ExecutionMode::Sequential {
                    chain_sequential(invocations.iter_mut());
                }
                parsed
                    .segments
                    .extend(invocations.into_iter().map(ContentSegment::Tool));
                push_text(&mut parsed.segments, &text[block.after]);
                parsed.mode = block.mode;
                parsed.options = block.options;
                return parsed;
            }
            JsonScan::Unterminated { start } => {
                parsed.anomalies.push(ParseAnomaly::UnterminatedJsonBlock);
                self.parse_inline(&text[..start], &mut parsed);
            }
            JsonScan::NotFound { malformed } => {
                parsed.anomalies.extend(
                    malformed
                        .into_iter()
                        .map(|message| ParseAnomaly::MalformedJsonBlock { message }),
                );
                self.parse_inline(text, &mut parsed);
            }
        }

        self.strip_trailing_fragment(&mut parsed.segments);
        parsed
    }

    fn parse_inline(&self, text: &str, parsed: &mut ParsedMessage) {
        let mut position = 0;

        let Some(wrapper) = find_wrapper(text, 0) else {
            let scan = self.scan_inline(text, ExecutionMode::Single, &mut position);
            absorb(parsed, scan);
            return;
        };

        let before = self.scan_inline(&text[..wrapper.start], ExecutionMode::Single, &mut position);
        if absorb(parsed, before) {
            return;
        }

        parsed.mode = wrapper.mode;
        let inner_end = wrapper.close.map_or(text.len(), |(start, _)| start);
        let mut inner = self.scan_inline(&text[wrapper.inner_start..inner_end], wrapper.mode, &mut position);
        if wrapper.mode == ExecutionMode::Sequential {
            chain_sequential(inner.segments.iter_mut().filter_map(|segment| match segment {
                ContentSegment::Tool(invocation) => Some(invocation),
                ContentSegment::Text { .. } => None,
            }));
        }
        if absorb(parsed, inner) {
            return;
        }
        let Some((_, mut cursor)) = wrapper.close else {
            parsed.anomalies.push(ParseAnomaly::UnterminatedBatch {
                wrapper: wrapper.name.to_string(),
            });
            return;
        };

        // Only the first batch is honored; later ones stay plain text.
        while let Some(extra) = find_wrapper(text, cursor) {
            let scan = self.scan_inline(&text[cursor..extra.start], ExecutionMode::Single, &mut position);
            if absorb(parsed, scan) {
                return;
            }
            parsed.anomalies.push(ParseAnomaly::ExtraBatchIgnored {
                wrapper: extra.name.to_string(),
            });
            let extra_end = extra.close.map_or(text.len(), |(_, end)| end);
            push_text(&mut parsed.segments, &text[extra.start..extra_end]);
            cursor = extra_end;
        }
        let rest = self.scan_inline(&text[cursor..], ExecutionMode::Single, &mut position);
        absorb(parsed, rest);
    }

    /// Remove a tag that is still being streamed (e.g. `"<read_fi"`) from the
    /// end of the final text segment.
    fn strip_trailing_fragment(&self, segments: &mut Vec<ContentSegment>) {
        let Some(ContentSegment::Text { content }) = segments.last_mut() else {
            return;
        };
        let Some(idx) = content.rfind('<') else {
            return;
        };
        let fragment = &content[idx + 1..];
        let names = self.catalog.tool_names().chain(WRAPPER_NAMES);
        if fragment.contains('>')
            || !(is_tag_fragment(fragment, names) || WRAPPER_ATTR_FRAGMENT.is_match(fragment))
        {
            return;
        }
        let kept = content[..idx].trim_end().to_string();
        if kept.is_empty() {
            segments.pop();
        } else {
            *content = kept;
        }
    }
}

/// Move a scan into `parsed`; returns whether it ended on a partial block.
fn absorb(parsed: &mut ParsedMessage, scan: InlineScan) -> bool {
    parsed.segments.extend(scan.segments);
    parsed.anomalies.extend(scan.anomalies);
    scan.ended_partial
}

fn find_wrapper(text: &str, from: usize) -> Option<Wrapper> {
    let caps = WRAPPER_OPEN.captures_at(text, from)?;
    let open = caps.get(0)?;
    let (name, mode_text) = match (caps.name("mode"), caps.name("legacy")) {
        (Some(mode), _) => (MULTI_TOOL_USE, mode.as_str()),
        (None, Some(legacy)) => (
            if legacy.as_str() == "parallel" {
                "parallel"
            } else {
                "sequential"
            },
            legacy.as_str(),
        ),
        (None, None) => return None,
    };
    let mode = if mode_text.eq_ignore_ascii_case("parallel") {
        ExecutionMode::Parallel
    } else {
        ExecutionMode::Sequential
    };
    let close_tag = format!("</{name}>");
    let close = text[open.end()..].find(&close_tag).map(|rel| {
        let start = open.end() + rel;
        (start, start + close_tag.len())
    });

    Some(Wrapper {
        name,
        mode,
        start: open.start(),
        inner_start: open.end(),
        close,
    })
}
