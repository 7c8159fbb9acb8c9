//! MockDriver — a scripted driver for testing the Bridge, Executor, and Orchestrator.

use crate::{AgentDriver, DriverError, DriverEvent, DriverHandle, MessageUpdateKind, StopReason};
use async_trait::async_trait;
use layer0::content::ContentBlock;
use relay_types::{AgentMessageLog, MessageEntry};
use std::sync::Mutex;

/// A driver that replays a fixed script of [`DriverEvent`]s on every
/// `prompt()` call, ignoring the prompt text. Used to exercise the
/// Bridge's turn-buffering and the Executor's turn-guard without a real
/// model in the loop.
pub struct MockDriver {
    script: Vec<DriverEvent>,
    messages: Mutex<AgentMessageLog>,
    aborted: Mutex<bool>,
}

impl MockDriver {
    /// Create a driver that emits `script` verbatim on every `prompt()`.
    pub fn new(script: Vec<DriverEvent>) -> Self {
        Self {
            script,
            messages: Mutex::new(Vec::new()),
            aborted: Mutex::new(false),
        }
    }

    /// A driver that emits a single turn with one text delta, then ends.
    /// The `AgentEnd` event carries a one-entry message log so callers
    /// extracting the final text (via
    /// [`relay_types::concat_final_assistant_text`]) see `text` without
    /// needing a real model in the loop.
    pub fn single_reply(text: impl Into<String>) -> Self {
        let text = text.into();
        let messages = vec![MessageEntry::Assistant { content: vec![ContentBlock::Text { text: text.clone() }] }];
        Self::new(vec![
            DriverEvent::TurnStart,
            DriverEvent::MessageStart,
            DriverEvent::MessageUpdate { kind: MessageUpdateKind::Text, delta: text },
            DriverEvent::MessageEnd,
            DriverEvent::TurnEnd,
            DriverEvent::AgentEnd { messages, stop_reason: StopReason::Complete },
        ])
    }

    /// A driver that emits a single turn containing one tool call (in
    /// addition to `text`), then ends — for exercising callers that react
    /// to a specific tool name appearing in the final message log (e.g.
    /// the Orchestrator's meta-tools).
    pub fn single_reply_with_tool_call(
        text: impl Into<String>,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_input: serde_json::Value,
    ) -> Self {
        let text = text.into();
        let messages = vec![MessageEntry::Assistant {
            content: vec![
                ContentBlock::Text { text: text.clone() },
                ContentBlock::ToolUse { id: tool_call_id.into(), name: tool_name.into(), input: tool_input },
            ],
        }];
        Self::new(vec![
            DriverEvent::TurnStart,
            DriverEvent::MessageStart,
            DriverEvent::MessageUpdate { kind: MessageUpdateKind::Text, delta: text },
            DriverEvent::MessageEnd,
            DriverEvent::TurnEnd,
            DriverEvent::AgentEnd { messages, stop_reason: StopReason::Aborted },
        ])
    }

    /// Whether `abort()` has been called.
    pub fn was_aborted(&self) -> bool {
        *self.aborted.lock().unwrap()
    }
}

#[async_trait]
impl AgentDriver for MockDriver {
    fn messages(&self) -> AgentMessageLog {
        self.messages.lock().unwrap().clone()
    }

    fn system_prompt(&self) -> Option<String> {
        None
    }

    fn error(&self) -> Option<String> {
        None
    }

    async fn prompt(&self, _text: String) -> Result<(), DriverError> {
        Ok(())
    }

    async fn abort(&self) {
        *self.aborted.lock().unwrap() = true;
    }

    fn subscribe(&self) -> DriverHandle {
        let events = self.script.clone();
        let stream = async_stream::stream! {
            for event in events {
                yield event;
            }
        };
        DriverHandle { receiver: Box::pin(stream) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn single_reply_emits_expected_sequence() {
        let driver = MockDriver::single_reply("hello");
        let mut handle = driver.subscribe();
        let mut kinds = Vec::new();
        while let Some(event) = handle.receiver.next().await {
            kinds.push(std::mem::discriminant(&event));
        }
        assert_eq!(kinds.len(), 6);
    }

    #[tokio::test]
    async fn abort_is_recorded() {
        let driver = MockDriver::new(vec![]);
        assert!(!driver.was_aborted());
        driver.abort().await;
        assert!(driver.was_aborted());
    }
}
