//! The agent conversation log model.
//!
//! The core treats this as an opaque log except in the Collector, which
//! walks it to extract learning records. Reuses [`layer0::content`]'s
//! universal content blocks rather than inventing a parallel shape.

use layer0::content::{Content, ContentBlock};
use serde::{Deserialize, Serialize};

/// One role-tagged entry in an agent's message log.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MessageEntry {
    /// Model output: a content array of text, thinking, and tool-call blocks.
    Assistant {
        /// The assistant's content blocks, in emission order.
        content: Vec<ContentBlock>,
    },
    /// The outcome of one tool invocation.
    ToolResult {
        /// The `ToolUse` block id this result answers.
        tool_call_id: String,
        /// The tool's textual output.
        content: String,
        /// Whether the tool call failed.
        is_error: bool,
    },
    /// A human- or system-originated message.
    User {
        /// The message content.
        content: Content,
    },
}

impl MessageEntry {
    /// For an `Assistant` entry, the text that immediately preceded the
    /// given tool-call id within the same message — the Collector's
    /// "thinking that preceded the toolCall" field. Returns the nearest
    /// prior `Text` block's content.
    pub fn text_preceding_tool_call(&self, tool_call_id: &str) -> Option<&str> {
        let MessageEntry::Assistant { content } = self else {
            return None;
        };
        let call_index = content.iter().position(|b| {
            matches!(b, ContentBlock::ToolUse { id, .. } if id == tool_call_id)
        })?;
        content[..call_index].iter().rev().find_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// All `ToolUse` blocks in an `Assistant` entry, in order.
    pub fn tool_calls(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        let MessageEntry::Assistant { content } = self else {
            return Vec::new();
        };
        content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }

    /// The first `Text` block's content, if any.
    pub fn first_text(&self) -> Option<&str> {
        let content = match self {
            MessageEntry::Assistant { content } => content.as_slice(),
            _ => return None,
        };
        content.iter().find_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// A full agent conversation log, consumed (not owned) by the core.
pub type AgentMessageLog = Vec<MessageEntry>;

/// The last `Assistant` entry's `Text` blocks, concatenated in order and
/// joined by newlines. Both the Planner and the Executor use this to
/// extract a turn's final visible response, ignoring thinking and tool
/// call blocks. `None` if the log has no assistant entry, or that entry
/// has no text content.
pub fn concat_final_assistant_text(log: &AgentMessageLog) -> Option<String> {
    let content = log.iter().rev().find_map(|entry| match entry {
        MessageEntry::Assistant { content } => Some(content),
        _ => None,
    })?;
    let parts: Vec<&str> = content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}
