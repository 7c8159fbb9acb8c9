#![deny(missing_docs)]
//! Translates one agent driver's event stream into bus events.
//!
//! Streaming text/thinking deltas are buffered per turn, not forwarded
//! per-token — this decouples UI event volume from the driver's
//! streaming cadence and preserves "thinking before tool call" framing.
//! Each turn flushes its buffer at most once.

use futures::StreamExt;
use relay_bus::EventBus;
use relay_driver::{AgentDriver, DriverEvent, DriverHandle, StopReason};
use relay_types::{AgentMessageLog, Event, EventKind};
use thiserror::Error;

const THINKING_REPORT_TYPE: &str = "thinking";
const OUTPUT_PREVIEW_LIMIT: usize = 200;

/// Errors bridging a driver's event stream onto a bus.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The bridge itself failed (not the driver or the bus).
    #[error("bridge failed: {0}")]
    Failed(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Derive a toolkit display name from a snake_case tool name: its first
/// underscore-delimited segment, capitalised (`browser_visit_page` ->
/// `"Browser"`).
pub fn toolkit_name(tool_name: &str) -> String {
    let first = tool_name.split('_').next().unwrap_or(tool_name);
    let mut chars = first.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn truncate_chars(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        s.chars().take(limit).collect()
    }
}

/// How a [`bridge`] call ended.
#[derive(Debug, Clone, Default)]
pub struct BridgeOutcome {
    /// Whether the turn guard tripped and aborted the driver (only
    /// possible when `bridge` was called with `max_turns = Some(_)`).
    pub turn_limit_exceeded: bool,
    /// The message log carried on the driver's `AgentEnd` event, if the
    /// stream reached one. This is the log as the driver emitted it at
    /// the moment its run ended — callers needing the "current"
    /// conversation mid-run still read it via `AgentDriver::messages`.
    pub final_messages: AgentMessageLog,
}

/// Drive one agent's event stream to completion, translating it into
/// `bus` events. `subtask_label`, when set, tags `activate_agent` /
/// `deactivate_agent` events so concurrent subtasks sharing one bus can
/// be told apart (the scheduler's `#{id}` label convention).
///
/// `max_turns`, when set, is the Executor's turn guard (§4.4 step 3e):
/// once `turn_end` has been observed `max_turns` times, `driver` is
/// aborted. The stream is still drained to completion afterward so the
/// bridge's own bookkeeping (flush, `deactivate_agent`) runs normally.
pub async fn bridge(
    mut handle: DriverHandle,
    driver: &dyn AgentDriver,
    bus: &EventBus,
    subtask_label: Option<&str>,
    max_turns: Option<u32>,
) -> Result<BridgeOutcome, BridgeError> {
    let mut buffer = String::new();
    let mut flushed_this_turn = false;
    let mut agent_started = false;
    let mut turn_count = 0u32;
    let mut outcome = BridgeOutcome::default();
    let label = subtask_label.map(str::to_string);

    while let Some(event) = handle.receiver.next().await {
        match event {
            DriverEvent::TurnStart => {
                if !agent_started {
                    agent_started = true;
                    bus.emit(Event::new(EventKind::ActivateAgent { subtask_id: label.clone() }))
                        .await;
                }
                buffer.clear();
                flushed_this_turn = false;
            }
            DriverEvent::MessageStart | DriverEvent::MessageEnd | DriverEvent::ToolExecutionUpdate { .. } => {}
            DriverEvent::MessageUpdate { delta, .. } => {
                tracing::debug!(delta_len = delta.len(), "buffering turn delta");
                buffer.push_str(&delta);
            }
            DriverEvent::ToolExecutionStart { name, .. } => {
                flush_thinking(bus, &mut buffer, &mut flushed_this_turn, true).await;
                bus.emit(Event::new(EventKind::ActivateToolkit { name: toolkit_name(&name) }))
                    .await;
            }
            DriverEvent::ToolExecutionEnd { name, success, output, .. } => {
                bus.emit(Event::new(EventKind::DeactivateToolkit {
                    name: toolkit_name(&name),
                    success,
                    output_preview: truncate_chars(&output, OUTPUT_PREVIEW_LIMIT),
                }))
                .await;
            }
            DriverEvent::TurnEnd => {
                turn_count += 1;
                if let Some(limit) = max_turns {
                    if turn_count >= limit && !outcome.turn_limit_exceeded {
                        outcome.turn_limit_exceeded = true;
                        tracing::warn!(turn_count, limit, "turn guard tripped, aborting driver");
                        driver.abort().await;
                    }
                }
            }
            DriverEvent::AgentEnd { messages, stop_reason } => {
                outcome.final_messages = messages;
                flush_thinking(bus, &mut buffer, &mut flushed_this_turn, false).await;
                bus.emit(Event::new(EventKind::DeactivateAgent { subtask_id: label.clone() }))
                    .await;
                if stop_reason == StopReason::Error {
                    bus.emit(Event::new(EventKind::Error {
                        message: "agent driver stopped with an error".into(),
                    }))
                    .await;
                }
            }
        }
    }
    Ok(outcome)
}

/// Flush the buffered thinking text, if any. `before_tool` distinguishes
/// the two cases the buffer can be flushed in: immediately before an
/// `activate_toolkit` event (both `agent_thinking` and
/// `agent_report(report_type=thinking)` fire), or at `agent_end` with no
/// following tool call (only `agent_thinking` fires — there is no report
/// to pair it with).
async fn flush_thinking(bus: &EventBus, buffer: &mut String, flushed_this_turn: &mut bool, before_tool: bool) {
    if *flushed_this_turn || buffer.is_empty() {
        return;
    }
    let text = std::mem::take(buffer);
    bus.emit(Event::new(EventKind::AgentThinking { text: text.clone() })).await;
    if before_tool {
        bus.emit(Event::new(EventKind::AgentReport {
            report_type: THINKING_REPORT_TYPE.to_string(),
            message: text,
        }))
        .await;
    }
    *flushed_this_turn = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toolkit_name_capitalises_first_segment() {
        assert_eq!(toolkit_name("browser_visit_page"), "Browser");
        assert_eq!(toolkit_name("code_run_script"), "Code");
        assert_eq!(toolkit_name("solo"), "Solo");
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        let s = "a".repeat(250);
        assert_eq!(truncate_chars(&s, 200).chars().count(), 200);
        assert_eq!(truncate_chars("short", 200), "short");
    }
}
