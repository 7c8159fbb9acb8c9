#![deny(missing_docs)]
//! The Agent driver interface the core consumes (never owns).
//!
//! Model token streaming and tool invocation are delegated entirely to
//! whatever implements [`AgentDriver`]. `subscribe` is modeled as an
//! owned [`futures::Stream`] of [`DriverEvent`]s rather than a
//! callback-registration API — the idiomatic shape for one-shot
//! consumption of a turn in an async runtime.

#[cfg(feature = "test-utils")]
pub mod mock;

use async_trait::async_trait;
use relay_types::AgentMessageLog;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;

use futures::Stream;

/// Errors from driving an agent.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DriverError {
    /// The driver has no credentials/configuration to run.
    #[error("driver not configured: {0}")]
    NotConfigured(String),

    /// The underlying model/provider call failed.
    #[error("driver call failed: {0}")]
    CallFailed(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Which kind of streaming delta a [`DriverEvent::MessageUpdate`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageUpdateKind {
    /// Visible response text.
    Text,
    /// Model reasoning, not part of the visible response.
    Thinking,
}

/// Why an agent's turn ended, carried on `AgentEnd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model produced a final response with no further tool calls.
    Complete,
    /// The driver was aborted (cancellation, turn-guard trip).
    Aborted,
    /// The model/provider call errored.
    Error,
}

/// One event in the driver's per-turn event stream.
///
/// Ordering: `TurnStart -> MessageStart -> MessageUpdate* -> MessageEnd ->
/// (ToolExecutionStart -> ToolExecutionUpdate* -> ToolExecutionEnd)? ->
/// TurnEnd`, and finally `AgentEnd` once the driver itself is done (which
/// may span several turns).
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// A new turn began.
    TurnStart,
    /// The model started producing a message.
    MessageStart,
    /// An incremental content delta within the current message.
    MessageUpdate {
        /// The delta's kind.
        kind: MessageUpdateKind,
        /// The incremental text.
        delta: String,
    },
    /// The model finished producing its message for this turn.
    MessageEnd,
    /// A tool call began.
    ToolExecutionStart {
        /// The tool call's id.
        id: String,
        /// The tool's name.
        name: String,
    },
    /// An incremental fragment of a tool call's JSON input.
    ToolExecutionUpdate {
        /// The tool call id this fragment belongs to.
        id: String,
        /// The JSON fragment.
        delta: String,
    },
    /// A tool call finished.
    ToolExecutionEnd {
        /// The tool call's id.
        id: String,
        /// The tool's name, repeated here so consumers don't need to
        /// correlate back to `ToolExecutionStart`.
        name: String,
        /// Whether the call succeeded.
        success: bool,
        /// The tool's full output text (bridge consumers truncate for display).
        output: String,
    },
    /// The current turn ended.
    TurnEnd,
    /// The agent is done (no further turns); carries the final message log.
    AgentEnd {
        /// The complete message log.
        messages: AgentMessageLog,
        /// Why the agent stopped.
        stop_reason: StopReason,
    },
}

/// Handle to a driver's event stream. Consume with `StreamExt::next()`.
pub struct DriverHandle {
    /// The stream of events.
    pub receiver: Pin<Box<dyn Stream<Item = DriverEvent> + Send>>,
}

impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverHandle").finish_non_exhaustive()
    }
}

/// A running agent: owns conversation state, accepts prompts, and
/// exposes its turn-by-turn event stream.
///
/// The core never implements this trait — it's supplied by the
/// embedding application (a ReAct loop, a raw API wrapper, a
/// human-in-the-loop adapter, or, in tests, [`mock::MockDriver`]).
#[async_trait]
pub trait AgentDriver: Send + Sync {
    /// The conversation so far.
    fn messages(&self) -> AgentMessageLog;

    /// The system prompt currently in effect, if any.
    fn system_prompt(&self) -> Option<String>;

    /// The last error the driver encountered, if any.
    fn error(&self) -> Option<String>;

    /// Send a new prompt, starting a new turn.
    async fn prompt(&self, text: String) -> Result<(), DriverError>;

    /// Abort the in-flight turn, if any. Idempotent.
    async fn abort(&self);

    /// Subscribe to this driver's event stream.
    fn subscribe(&self) -> DriverHandle;
}
