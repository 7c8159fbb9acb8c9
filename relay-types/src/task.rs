//! Tasks: a user request plus the subtask DAG the Planner decomposed it into.

use crate::subtask::{Subtask, SubtaskState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task's overall progress, derived from its subtasks on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The Executor is actively working the subtask DAG.
    Running,
    /// All subtasks reached a terminal state with no failures.
    Completed,
    /// At least one subtask failed and the task did not recover.
    Failed,
}

/// A user request plus everything the Planner and Executor produced from it.
///
/// Persisted wholesale as a single snapshot (see `relay-state`), replaced
/// on each mutation — never partially updated on disk.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable task identifier.
    pub task_id: String,
    /// The original, unmodified user request text.
    pub user_request: String,
    /// Current overall status.
    pub status: TaskStatus,
    /// Raw memory-plan payload returned by the Planner, if any.
    #[serde(default)]
    pub memory_plan: Option<serde_json::Value>,
    /// The subtask DAG, in Planner-assigned order.
    pub subtasks: Vec<Subtask>,
    /// When the task was first created.
    pub created_at: DateTime<Utc>,
    /// When the task was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new, empty task in the `Running` state.
    pub fn new(task_id: impl Into<String>, user_request: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            user_request: user_request.into(),
            status: TaskStatus::Running,
            memory_plan: None,
            subtasks: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a subtask by id.
    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    /// Look up a subtask by id, mutably.
    pub fn subtask_mut(&mut self, id: &str) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == id)
    }

    /// Recompute `status` from subtask states and touch `updated_at`.
    ///
    /// `Completed` only once every subtask has reached a terminal state
    /// with zero failures; any `Failed` subtask makes the whole task
    /// `Failed` even while others are still `Running`.
    pub fn recompute_status(&mut self) {
        let any_failed = self.subtasks.iter().any(|s| s.state == SubtaskState::Failed);
        let all_terminal = self
            .subtasks
            .iter()
            .all(|s| matches!(s.state, SubtaskState::Done | SubtaskState::Failed));

        self.status = if any_failed {
            TaskStatus::Failed
        } else if all_terminal {
            TaskStatus::Completed
        } else {
            TaskStatus::Running
        };
        self.updated_at = Utc::now();
    }

    /// Recovery rule applied on resume from a snapshot: `Done` subtasks
    /// retain their result; every other subtask resets to `Pending` and
    /// loses its retry count, per the durability guarantee that only
    /// completed work survives a crash mid-flight.
    pub fn reset_incomplete_for_resume(&mut self) {
        for subtask in &mut self.subtasks {
            if subtask.state != SubtaskState::Done {
                subtask.state = SubtaskState::Pending;
                subtask.error = None;
                subtask.retry_count = 0;
            }
        }
        self.status = TaskStatus::Running;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_type::AgentType;

    fn done(id: &str) -> Subtask {
        let mut s = Subtask::new(id, "x", AgentType::Code);
        s.complete("ok");
        s
    }

    fn failed(id: &str) -> Subtask {
        let mut s = Subtask::new(id, "x", AgentType::Code);
        s.error = Some("boom".into());
        s.state = crate::subtask::SubtaskState::Failed;
        s
    }

    #[test]
    fn new_task_is_running_with_no_subtasks() {
        let t = Task::new("t1", "do the thing");
        assert_eq!(t.status, TaskStatus::Running);
        assert!(t.subtasks.is_empty());
    }

    #[test]
    fn recompute_status_completed_when_all_done() {
        let mut t = Task::new("t1", "req");
        t.subtasks = vec![done("1"), done("2")];
        t.recompute_status();
        assert_eq!(t.status, TaskStatus::Completed);
    }

    #[test]
    fn recompute_status_failed_when_any_failed_even_if_others_running() {
        let mut t = Task::new("t1", "req");
        let mut running = Subtask::new("2", "x", AgentType::Code);
        running.state = SubtaskState::Running;
        t.subtasks = vec![failed("1"), running];
        t.recompute_status();
        assert_eq!(t.status, TaskStatus::Failed);
    }

    #[test]
    fn resume_keeps_done_resets_others() {
        let mut t = Task::new("t1", "req");
        let mut running = Subtask::new("2", "x", AgentType::Code);
        running.state = SubtaskState::Running;
        running.retry_count = 2;
        t.subtasks = vec![done("1"), running];

        t.reset_incomplete_for_resume();

        assert_eq!(t.subtask("1").unwrap().state, SubtaskState::Done);
        assert_eq!(t.subtask("1").unwrap().result.as_deref(), Some("ok"));
        assert_eq!(t.subtask("2").unwrap().state, SubtaskState::Pending);
        assert_eq!(t.subtask("2").unwrap().retry_count, 0);
    }
}
