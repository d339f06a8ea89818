//! Inline-tag grammar: `<tool_name><param>value</param></tool_name>`.

use crate::error::ParseAnomaly;
use crate::types::{ContentSegment, ExecutionMode, ToolInvocation};

use super::MessageParser;

pub(crate) const TOOL_ID_TAG: &str = "toolId";
pub(crate) const DEPENDS_ON_TAG: &str = "dependsOn";

/// Output of scanning one region of a message.
#[derive(Debug, Default)]
pub(crate) struct InlineScan {
    pub segments: Vec<ContentSegment>,
    pub anomalies: Vec<ParseAnomaly>,
    /// The region ended inside a tool block that was never closed.
    pub ended_partial: bool,
}

impl MessageParser {
    /// Scan `text` left to right for registered tool blocks.
    ///
    /// `position` counts tool blocks across the whole message and feeds the
    /// positional `tool-<n>` ids.
    pub(crate) fn scan_inline(&self, text: &str, mode: ExecutionMode, position: &mut usize) -> InlineScan {
        let mut scan = InlineScan::default();
        let mut text_start = 0;
        let mut cursor = 0;

        while let Some(rel) = text[cursor..].find('<') {
            let open = cursor + rel;
            let Some((name, body_start)) = read_tag(text, open) else {
                break;
            };
            if !self.catalog.contains(name) {
                cursor = open + 1;
                continue;
            }

            push_text(&mut scan.segments, &text[text_start..open]);
            *position += 1;
            let close_tag = format!("</{name}>");

            match text[body_start..].find(&close_tag) {
                Some(rel) => {
                    let body = &text[body_start..body_start + rel];
                    let invocation = self.build_invocation(name, body, false, mode, *position, &mut scan.anomalies);
                    scan.segments.push(ContentSegment::Tool(invocation));
                    cursor = body_start + rel + close_tag.len();
                    text_start = cursor;
                }
                None => {
                    let body = &text[body_start..];
                    let invocation = self.build_invocation(name, body, true, mode, *position, &mut scan.anomalies);
                    scan.anomalies.push(ParseAnomaly::PartialInvocation {
                        tool: name.to_string(),
                    });
                    scan.segments.push(ContentSegment::Tool(invocation));
                    scan.ended_partial = true;
                    return scan;
                }
            }
        }

        push_text(&mut scan.segments, &text[text_start..]);
        scan
    }

    fn build_invocation(
        &self,
        name: &str,
        body: &str,
        partial: bool,
        mode: ExecutionMode,
        position: usize,
        anomalies: &mut Vec<ParseAnomaly>,
    ) -> ToolInvocation {
        let mut invocation = ToolInvocation::new(format!("tool-{position}"), name).with_mode(mode);
        invocation.partial = partial;

        let spec = self.catalog.get(name);
        let is_write_tool = name == self.write_tool_name;
        let mut id_seen = false;
        let mut cursor = 0;

        while let Some(rel) = body[cursor..].find('<') {
            let open = cursor + rel;
            let Some((param, value_start)) = read_tag(body, open) else {
                break;
            };
            let known = param == TOOL_ID_TAG
                || param == DEPENDS_ON_TAG
                || spec.is_some_and(|spec| spec.has_param(param));
            if !known {
                cursor = open + 1;
                continue;
            }

            let close_tag = format!("</{param}>");
            let is_write_content = is_write_tool && param == self.write_content_param;
            // File content may itself contain the closing tag, so the last one wins.
            let close = if is_write_content {
                body.rfind(&close_tag).filter(|idx| *idx >= value_start)
            } else {
                body[value_start..].find(&close_tag).map(|rel| value_start + rel)
            };
            let seen = match param {
                TOOL_ID_TAG => id_seen,
                DEPENDS_ON_TAG => invocation.depends_on.is_some(),
                _ => invocation.parameters.contains_key(param),
            };

            let raw = match close {
                Some(close) => {
                    cursor = close + close_tag.len();
                    &body[value_start..close]
                }
                None if partial => strip_partial_suffix(&body[value_start..], &close_tag),
                None => {
                    // Unclosed parameter inside a closed block; not a parameter.
                    cursor = value_start;
                    continue;
                }
            };

            if seen {
                anomalies.push(ParseAnomaly::DuplicateParameter {
                    tool: name.to_string(),
                    parameter: param.to_string(),
                });
            } else {
                match param {
                    TOOL_ID_TAG => {
                        id_seen = true;
                        if !raw.trim().is_empty() {
                            invocation.id = raw.trim().to_string();
                        }
                    }
                    DEPENDS_ON_TAG => {
                        if !raw.trim().is_empty() {
                            invocation.depends_on = Some(raw.trim().to_string());
                        }
                    }
                    _ if is_write_content => {
                        invocation
                            .parameters
                            .insert(param.to_string(), strip_one_newline(raw).to_string());
                    }
                    _ => {
                        invocation.parameters.insert(param.to_string(), raw.trim().to_string());
                    }
                }
            }

            if close.is_none() {
                break;
            }
        }

        invocation
    }
}

/// Read the tag opened at `open`. Returns its name and the index just past `>`.
pub(crate) fn read_tag(text: &str, open: usize) -> Option<(&str, usize)> {
    let after = open + 1;
    let end = after + text[after..].find('>')?;
    Some((&text[after..end], end + 1))
}

pub(crate) fn push_text(segments: &mut Vec<ContentSegment>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        segments.push(ContentSegment::text(trimmed));
    }
}

/// Drop a trailing prefix of `token` (e.g. `"</pa"` for `"</path>"`).
pub(crate) fn strip_partial_suffix<'a>(value: &'a str, token: &str) -> &'a str {
    for len in (1..token.len()).rev() {
        if !token.is_char_boundary(len) {
            continue;
        }
        if let Some(stripped) = value.strip_suffix(&token[..len]) {
            return stripped;
        }
    }
    value
}

/// Whether `fragment` (text after a trailing `<`) could still grow into one
/// of `names` as an opening or closing tag.
pub(crate) fn is_tag_fragment<'a>(fragment: &str, mut names: impl Iterator<Item = &'a str>) -> bool {
    let fragment = fragment.strip_prefix('/').unwrap_or(fragment);
    if !fragment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return false;
    }
    names.any(|name| name.starts_with(fragment))
}

fn strip_one_newline(value: &str) -> &str {
    let value = value
        .strip_prefix("\r\n")
        .or_else(|| value.strip_prefix('\n'))
        .unwrap_or(value);
    value
        .strip_suffix("\r\n")
        .or_else(|| value.strip_suffix('\n'))
        .unwrap_or(value)
}
