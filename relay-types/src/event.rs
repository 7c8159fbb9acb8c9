//! The SSE event taxonomy: every event the core can emit toward the UI.

use crate::agent_type::AgentType;
use crate::subtask::{MemoryLevel, Subtask, SubtaskState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single emitted event: a typed [`EventKind`] plus the envelope fields
/// every event carries regardless of kind.
///
/// Wire format (owned by the HTTP adapter, not this crate): each event is
/// framed as `data: {"step": "<action>", "data": <event-object>}\n\n`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// The event's typed payload; its discriminant is the wire `action`.
    #[serde(flatten)]
    pub kind: EventKind,
    /// Which task this event belongs to, stamped on emission if absent.
    pub task_id: Option<String>,
    /// When this event was emitted, stamped on emission if absent.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Event {
    /// Wrap a kind with no envelope fields set; the bus stamps them on emit.
    pub fn new(kind: EventKind) -> Self {
        Self { kind, task_id: None, timestamp: None }
    }

    /// Attach a task id, builder-style.
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// The wire `action` name for this event's kind.
    pub fn action(&self) -> &'static str {
        self.kind.action()
    }

    /// Stamp `task_id`/`timestamp` if absent. Called once by the bus on
    /// `emit`, never by producers themselves.
    pub fn stamp(&mut self, task_id: &str, now: DateTime<Utc>) {
        if self.task_id.is_none() {
            self.task_id = Some(task_id.to_string());
        }
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
        }
    }
}

/// Final disposition reported by the terminal `end` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndStatus {
    /// Every subtask completed without failure.
    Completed,
    /// At least one subtask failed.
    Failed,
    /// The task was cancelled mid-flight.
    Cancelled,
}

/// Exhaustive (for the core) tagged union of emittable events.
///
/// Grouped by the taxonomy in the external interface: task lifecycle,
/// planning, workforce, subtask, agent, tool, user, system.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EventKind {
    // --- Task lifecycle ---
    /// A task began executing.
    TaskStarted,
    /// A task finished with no failures.
    TaskCompleted {
        /// Count of subtasks that reached `Done`.
        completed: usize,
    },
    /// A task finished with at least one failure.
    TaskFailed {
        /// Human-readable failure summary.
        reason: String,
    },
    /// A task was cancelled via `stop()`.
    TaskCancelled,
    /// Terminal event; closes the SSE stream after delivery.
    End {
        /// Final disposition.
        status: EndStatus,
    },

    // --- Planning ---
    /// The Planner began decomposition.
    PlanStarted,
    /// Incremental planning progress.
    DecomposeProgress {
        /// Fraction complete, in `[0.0, 1.0]`.
        progress: f64,
        /// Human-readable progress message.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// Whether this is the terminal progress event.
        #[serde(default)]
        is_final: bool,
        /// The decomposed subtasks; present only when `is_final`.
        #[serde(skip_serializing_if = "Option::is_none")]
        sub_tasks: Option<Vec<Subtask>>,
    },
    /// Decomposition finished and subtasks were assigned.
    TaskDecomposed {
        /// Number of subtasks produced.
        subtask_count: usize,
    },
    /// `replanSubtasks` was applied.
    TaskReplanned {
        /// Pending subtasks dropped by the replan.
        removed_count: usize,
        /// New subtasks added by the replan.
        added_count: usize,
        /// Ids of subtasks kept unchanged across the replan.
        kept_ids: Vec<String>,
    },
    /// A streamed fragment of the decomposition response, pre-parse.
    StreamingDecompose {
        /// The incremental text fragment.
        delta: String,
    },
    /// The memory service's confidence tier for this plan.
    MemoryLevel {
        /// The computed memory level.
        level: MemoryLevel,
    },
    /// Whether the memory service returned any usable plan at all.
    MemoryResult {
        /// `true` if the memory query returned a non-empty plan.
        found: bool,
    },

    // --- Workforce ---
    /// The Executor began dispatching subtasks.
    WorkforceStarted,
    /// The Executor finished dispatching all subtasks.
    WorkforceCompleted {
        /// Count of subtasks that reached `Done`.
        completed: usize,
        /// Count of subtasks that reached `Failed`.
        failed: usize,
    },
    /// The Executor was stopped before all subtasks finished.
    WorkforceStopped,
    /// A subtask was handed to a worker agent.
    WorkerAssigned {
        /// The subtask id.
        subtask_id: String,
        /// The worker's agent type.
        agent_type: AgentType,
    },
    /// A worker began executing its assigned subtask.
    WorkerStarted {
        /// The subtask id.
        subtask_id: String,
    },
    /// A worker finished its assigned subtask successfully.
    WorkerCompleted {
        /// The subtask id.
        subtask_id: String,
    },
    /// A worker's assigned subtask failed.
    WorkerFailed {
        /// The subtask id.
        subtask_id: String,
        /// The failure's error message.
        error: String,
    },
    /// A subtask was dispatched for execution.
    AssignTask {
        /// The subtask id.
        subtask_id: String,
    },
    /// `addSubtasks` inserted new subtasks into the DAG.
    DynamicTasksAdded {
        /// The subtask the new ones were inserted after.
        parent_id: String,
        /// Ids of the newly inserted subtasks.
        added_ids: Vec<String>,
    },

    // --- Subtask ---
    /// A subtask transitioned state.
    SubtaskState {
        /// The subtask id.
        subtask_id: String,
        /// The subtask's new state.
        state: SubtaskState,
    },

    // --- Agent ---
    /// An agent turn began for a subtask (or the Orchestrator's own turn).
    ActivateAgent {
        /// The subtask this agent is working, if any.
        subtask_id: Option<String>,
    },
    /// An agent turn ended.
    DeactivateAgent {
        /// The subtask this agent was working, if any.
        subtask_id: Option<String>,
    },
    /// Flushed buffered thinking/text from one turn.
    AgentThinking {
        /// The accumulated text.
        text: String,
    },
    /// A structured status report from an agent or the Planner.
    AgentReport {
        /// What kind of report this is (e.g. `"thinking"`, `"warning"`).
        report_type: String,
        /// The report body.
        message: String,
    },

    // --- Tool ---
    /// A toolkit became active for the current turn.
    ActivateToolkit {
        /// The toolkit's name.
        name: String,
    },
    /// A toolkit finished executing.
    DeactivateToolkit {
        /// The toolkit's name.
        name: String,
        /// Whether the call succeeded.
        success: bool,
        /// The tool's output, truncated to 200 characters.
        output_preview: String,
    },
    /// Raw terminal/shell output.
    Terminal {
        /// The command that was run.
        command: String,
        /// Its output.
        output: String,
    },
    /// A browser automation action was taken.
    BrowserAction {
        /// Description of the action (e.g. `"click #submit"`).
        action: String,
    },
    /// A screenshot was captured.
    Screenshot {
        /// Where the screenshot is available (URL or path).
        url: String,
    },
    /// A file was written to the workspace.
    WriteFile {
        /// The written file's path.
        path: String,
    },

    // --- User ---
    /// The Orchestrator is awaiting user confirmation or presenting a reply.
    WaitConfirm {
        /// Reply content to show the user.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// A clarifying question, if one is being asked.
        #[serde(skip_serializing_if = "Option::is_none")]
        question: Option<String>,
        /// An error to surface, if this wait followed a failed turn.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The user confirmed a pending action (e.g. delegation).
    Confirmed,
    /// The Orchestrator is asking the user a direct question.
    Ask {
        /// The question text.
        question: String,
    },
    /// An informational notice with no required response.
    Notice {
        /// The notice text.
        message: String,
    },
    /// A human supplied an answer to an `Ask`.
    HumanResponse {
        /// The human's reply text.
        response: String,
    },

    // --- System ---
    /// Bus liveness signal; carries no additional data.
    Heartbeat,
    /// A non-recoverable error occurred.
    Error {
        /// The error message.
        message: String,
    },
    /// The SSE connection was established.
    Connected,
}

impl EventKind {
    /// The wire `action` name for this variant, matching its `#[serde(tag)]` value.
    pub fn action(&self) -> &'static str {
        match self {
            EventKind::TaskStarted => "task_started",
            EventKind::TaskCompleted { .. } => "task_completed",
            EventKind::TaskFailed { .. } => "task_failed",
            EventKind::TaskCancelled => "task_cancelled",
            EventKind::End { .. } => "end",
            EventKind::PlanStarted => "plan_started",
            EventKind::DecomposeProgress { .. } => "decompose_progress",
            EventKind::TaskDecomposed { .. } => "task_decomposed",
            EventKind::TaskReplanned { .. } => "task_replanned",
            EventKind::StreamingDecompose { .. } => "streaming_decompose",
            EventKind::MemoryLevel { .. } => "memory_level",
            EventKind::MemoryResult { .. } => "memory_result",
            EventKind::WorkforceStarted => "workforce_started",
            EventKind::WorkforceCompleted { .. } => "workforce_completed",
            EventKind::WorkforceStopped => "workforce_stopped",
            EventKind::WorkerAssigned { .. } => "worker_assigned",
            EventKind::WorkerStarted { .. } => "worker_started",
            EventKind::WorkerCompleted { .. } => "worker_completed",
            EventKind::WorkerFailed { .. } => "worker_failed",
            EventKind::AssignTask { .. } => "assign_task",
            EventKind::DynamicTasksAdded { .. } => "dynamic_tasks_added",
            EventKind::SubtaskState { .. } => "subtask_state",
            EventKind::ActivateAgent { .. } => "activate_agent",
            EventKind::DeactivateAgent { .. } => "deactivate_agent",
            EventKind::AgentThinking { .. } => "agent_thinking",
            EventKind::AgentReport { .. } => "agent_report",
            EventKind::ActivateToolkit { .. } => "activate_toolkit",
            EventKind::DeactivateToolkit { .. } => "deactivate_toolkit",
            EventKind::Terminal { .. } => "terminal",
            EventKind::BrowserAction { .. } => "browser_action",
            EventKind::Screenshot { .. } => "screenshot",
            EventKind::WriteFile { .. } => "write_file",
            EventKind::WaitConfirm { .. } => "wait_confirm",
            EventKind::Confirmed => "confirmed",
            EventKind::Ask { .. } => "ask",
            EventKind::Notice { .. } => "notice",
            EventKind::HumanResponse { .. } => "human_response",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Error { .. } => "error",
            EventKind::Connected => "connected",
        }
    }
}
