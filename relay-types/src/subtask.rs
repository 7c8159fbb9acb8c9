//! Subtasks: the unit of work the Executor schedules and dispatches.

use crate::agent_type::AgentType;
use serde::{Deserialize, Serialize};

/// How confident the Planner's memory lookup was in the subtasks it produced.
///
/// `L1` means at least one step was sourced from a memory "phrase" with a
/// `phrase_id`; `L2` means the plan had steps but none were phrase-backed;
/// `L3` means the plan was empty (no memory context at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryLevel {
    /// Phrase-backed: at least one decomposition step cites a known phrase.
    L1,
    /// Plan-backed: the memory service returned steps, none phrase-backed.
    L2,
    /// No memory context was available.
    L3,
}

/// A subtask's position in its lifecycle.
///
/// Transitions: `Pending -> Running -> (Done | Failed)`. `Failed` is
/// reachable only via retry-budget exhaustion, a failed or missing
/// dependency, cancellation, or deadlock (see [`FailureReason`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubtaskState {
    /// Waiting on dependencies or scheduling.
    Pending,
    /// Currently dispatched to an agent.
    Running,
    /// Finished successfully; `result` is set.
    Done,
    /// Finished unsuccessfully; `error` is set.
    Failed,
}

/// Canonical reasons a subtask lands in `Failed`, used to build the
/// human-readable `error` string. Kept as an enum internally so the
/// Executor can branch on cause (e.g. suppress retry for dependency
/// failures) without parsing strings.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// Retry budget was exhausted; `last_error` is the final attempt's error.
    RetriesExhausted {
        /// The error from the last retry attempt.
        last_error: String,
    },
    /// A dependency transitioned to `Failed` before this subtask ran.
    DependencyFailed {
        /// The id of the failed dependency.
        dependency: String,
    },
    /// A dependency id does not resolve to any subtask in the task.
    MissingDependency {
        /// The dangling dependency id.
        dependency: String,
    },
    /// No subtask in the remaining PENDING set was eligible to run.
    CircularDependency,
    /// The Executor was stopped while this subtask was running.
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::RetriesExhausted { last_error } => write!(f, "{last_error}"),
            FailureReason::DependencyFailed { dependency } => {
                write!(f, "Dependency '{dependency}' failed")
            }
            FailureReason::MissingDependency { dependency } => {
                write!(f, "depends on non-existent task '{dependency}'")
            }
            FailureReason::CircularDependency => write!(f, "circular dependency"),
            FailureReason::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// A single unit of delegated work within a [`crate::task::Task`].
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subtask {
    /// Stable identifier, unique within the owning task.
    pub id: String,
    /// Self-contained natural-language instruction for the agent.
    pub content: String,
    /// Which worker agent this subtask is routed to.
    pub agent_type: AgentType,
    /// Ids of subtasks that must reach `Done` before this one is eligible.
    pub depends_on: Vec<String>,
    /// Optional historical workflow guidance surfaced by the memory service.
    pub workflow_guide: Option<String>,
    /// How strongly memory informed this subtask's content.
    pub memory_level: MemoryLevel,
    /// Current lifecycle state.
    pub state: SubtaskState,
    /// Set when `state == Done`.
    pub result: Option<String>,
    /// Set when `state == Failed`.
    pub error: Option<String>,
    /// Number of attempts made so far (0 on first dispatch).
    pub retry_count: u32,
}

impl Subtask {
    /// Create a new, unscheduled subtask in the `Pending` state.
    pub fn new(id: impl Into<String>, content: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            agent_type,
            depends_on: Vec::new(),
            workflow_guide: None,
            memory_level: MemoryLevel::L3,
            state: SubtaskState::Pending,
            result: None,
            error: None,
            retry_count: 0,
        }
    }

    /// Whether this subtask's dependencies, as ids, starts with the given
    /// dynamic-child prefix convention `{parent_id}_dyn_`.
    pub fn is_dynamic_child_of(&self, parent_id: &str) -> bool {
        self.id.starts_with(&format!("{parent_id}_dyn_"))
    }

    /// Mark this subtask `Failed` with the given reason, formatting `error`.
    pub fn fail(&mut self, reason: FailureReason) {
        self.state = SubtaskState::Failed;
        self.error = Some(reason.to_string());
    }

    /// Mark this subtask `Done` with the given result text.
    pub fn complete(&mut self, result: impl Into<String>) {
        self.state = SubtaskState::Done;
        self.result = Some(result.into());
    }
}
