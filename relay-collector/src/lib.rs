//! Turns a completed agent's message log into flat, per-tool-call
//! records suitable for upload to the memory service's learning
//! pipeline (`relay_memory::MemoryClient::memory_learn`).
//!
//! The core treats [`relay_types::AgentMessageLog`] as opaque; this is
//! the one place that walks it, matching the doc comment on
//! `relay_types::message`.

use regex::Regex;
use relay_types::{AgentMessageLog, MessageEntry};
use serde::Serialize;
use std::sync::LazyLock;

/// Tool names the Collector never reports — noisy page snapshots and
/// the Orchestrator's own meta-tools, neither of which are useful
/// learning signal.
const OPT_OUT_TOOLS: &[&str] =
    &["browser_page_snapshot", "inject_message", "replan_task", "cancel_task", "resume_task"];

/// Argument keys kept for tools whose full input would otherwise be
/// noisy or bulky. A tool not listed here keeps every argument, with
/// each string value truncated instead.
fn argument_whitelist(tool_name: &str) -> Option<&'static [&'static str]> {
    match tool_name {
        "browser_visit_page" => Some(&["url"]),
        "browser_click" => Some(&["selector"]),
        "browser_type" => Some(&["selector", "text"]),
        "shell_exec" => Some(&["command"]),
        "search" => Some(&["query"]),
        "attach_file" => Some(&["path"]),
        "decompose_task" => Some(&["description"]),
        _ => None,
    }
}

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"URL:\*?\*?\s*(https?://\S+)").expect("valid regex"));

const THINKING_LIMIT: usize = 500;
const INPUT_SUMMARY_LIMIT: usize = 300;
const RESULT_SUMMARY_LIMIT: usize = 300;
const FIELD_VALUE_LIMIT: usize = 100;
const JUDGMENT_LIMIT: usize = 500;

/// One tool call's learning record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    /// Text immediately preceding the tool call within the same
    /// assistant message, if any.
    pub thinking: Option<String>,
    /// The tool's name.
    pub tool_name: String,
    /// The tool's arguments, whitelisted or value-truncated, as a JSON string.
    pub input_summary: String,
    /// Whether the matching tool result reported success.
    pub success: bool,
    /// The matching tool result's content, truncated.
    pub result_summary: String,
    /// The first text block of the assistant message that followed the
    /// tool result, if the agent commented on it before the log ends.
    pub judgment: Option<String>,
    /// The first `https?://` URL following a `URL:` marker in the raw
    /// tool result text, if any.
    pub current_url: String,
}

/// Walk `log` and produce one [`ToolCallRecord`] per tool call not in
/// the opt-out set.
pub fn collect(log: &AgentMessageLog) -> Vec<ToolCallRecord> {
    let mut records = Vec::new();

    for (idx, entry) in log.iter().enumerate() {
        let MessageEntry::Assistant { .. } = entry else { continue };

        for (call_id, tool_name, input) in entry.tool_calls() {
            if OPT_OUT_TOOLS.contains(&tool_name) {
                continue;
            }

            let thinking = entry.text_preceding_tool_call(call_id).map(|t| truncate_chars(t, THINKING_LIMIT));

            let result_idx_and_entry = log.iter().enumerate().skip(idx + 1).find_map(|(i, e)| match e {
                MessageEntry::ToolResult { tool_call_id, .. } if tool_call_id == call_id => Some((i, e)),
                _ => None,
            });

            let (success, result_summary, current_url) = match result_idx_and_entry {
                Some((_, MessageEntry::ToolResult { content, is_error, .. })) => {
                    let url = URL_PATTERN.captures(content).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()).unwrap_or_default();
                    (!is_error, truncate_chars(content, RESULT_SUMMARY_LIMIT), url)
                }
                _ => (false, String::new(), String::new()),
            };

            let judgment = result_idx_and_entry.and_then(|(result_idx, _)| {
                log.iter().skip(result_idx + 1).find_map(MessageEntry::first_text).map(|t| truncate_chars(t, JUDGMENT_LIMIT))
            });

            records.push(ToolCallRecord {
                thinking,
                tool_name: tool_name.to_string(),
                input_summary: summarize_input(tool_name, input),
                success,
                result_summary,
                judgment,
                current_url,
            });
        }
    }

    records
}

fn summarize_input(tool_name: &str, input: &serde_json::Value) -> String {
    let summarized = match argument_whitelist(tool_name) {
        Some(keys) => {
            let mut obj = serde_json::Map::new();
            if let Some(map) = input.as_object() {
                for key in keys {
                    if let Some(value) = map.get(*key) {
                        obj.insert((*key).to_string(), value.clone());
                    }
                }
            }
            serde_json::Value::Object(obj)
        }
        None => truncate_string_values(input),
    };
    truncate_chars(&summarized.to_string(), INPUT_SUMMARY_LIMIT)
}

fn truncate_string_values(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(truncate_chars(s, FIELD_VALUE_LIMIT)),
        serde_json::Value::Object(map) => {
            serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), truncate_string_values(v))).collect())
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(truncate_string_values).collect()),
        other => other.clone(),
    }
}

fn truncate_chars(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        s.chars().take(limit).collect()
    }
}
