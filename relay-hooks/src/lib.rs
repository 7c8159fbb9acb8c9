#![deny(missing_docs)]
//! Hook pipeline for the Task Executor's subtask lifecycle.
//!
//! Generalizes the Executor's post-execution learning trigger (and any
//! future observability attaching to the same points) into an ordered,
//! short-circuiting pipeline of observers. These points fire around
//! subtask dispatch and completion, not model inference, so the
//! vocabulary here is this crate's own.

use async_trait::async_trait;
use relay_types::{Subtask, Task};
use std::sync::Arc;
use thiserror::Error;

/// Where in the Executor's subtask lifecycle a hook fires.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorHookPoint {
    /// Immediately before a subtask is dispatched to an agent.
    BeforeDispatch,
    /// After a subtask transitions to `Done`.
    AfterSubtaskDone,
    /// After a subtask transitions to `Failed`.
    AfterSubtaskFailed,
    /// After `replanSubtasks` has been applied.
    AfterReplan,
    /// After the scheduler loop exits, where the post-execution learning
    /// trigger attaches: not stopped, authenticated, at least one browser
    /// subtask, two or more total, all browser subtasks done.
    PostExecutionLearning,
}

/// What context is available to a hook at its firing point.
///
/// Read-only: hooks observe and decide, they don't mutate the task or
/// subtask directly. A hook that wants to change scheduling returns
/// [`ExecutorHookAction::Halt`]; it does not reach into `task`.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ExecutorHookContext<'a> {
    /// Current hook point.
    pub point: ExecutorHookPoint,
    /// The task this subtask belongs to.
    pub task: &'a Task,
    /// The subtask this event concerns. `None` only at
    /// `PostExecutionLearning`, which is task-scoped, not subtask-scoped.
    pub subtask: Option<&'a Subtask>,
}

impl<'a> ExecutorHookContext<'a> {
    /// Build a context for a subtask-scoped hook point.
    pub fn for_subtask(point: ExecutorHookPoint, task: &'a Task, subtask: &'a Subtask) -> Self {
        Self { point, task, subtask: Some(subtask) }
    }

    /// Build a context for the task-scoped `PostExecutionLearning` point.
    pub fn for_task(task: &'a Task) -> Self {
        Self { point: ExecutorHookPoint::PostExecutionLearning, task, subtask: None }
    }

    /// Build a context for the task-scoped `AfterReplan` point.
    pub fn for_replan(task: &'a Task) -> Self {
        Self { point: ExecutorHookPoint::AfterReplan, task, subtask: None }
    }
}

/// What a hook decides to do.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorHookAction {
    /// Continue normally.
    Continue,
    /// Halt the executor (observer tripwire). Only meaningful at
    /// `BeforeDispatch`; the subtask is not dispatched and is left
    /// `Pending` for a future resume.
    Halt {
        /// Reason for halting.
        reason: String,
    },
}

/// Errors a hook implementation can report.
///
/// These are logged and do NOT halt the executor — use
/// `ExecutorHookAction::Halt` for that.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook's own logic failed.
    #[error("hook failed: {0}")]
    Failed(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// An observer attached to the Executor's subtask lifecycle.
///
/// Implementations:
/// - a post-execution learning uploader (fire-and-forget to the cloud)
/// - a metrics/telemetry sink
/// - a guardrail that halts dispatch under some policy
///
/// Handlers SHOULD complete quickly; a hook that calls out to a slow
/// external service adds latency to every subtask transition it's
/// registered for. That cost is the hook author's responsibility.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Which points this hook fires at.
    fn points(&self) -> &[ExecutorHookPoint];

    /// Called at each registered hook point.
    ///
    /// Returning an error does NOT halt the executor — it's logged via
    /// `tracing::warn!` and treated as `Continue`. Use
    /// `ExecutorHookAction::Halt` to halt.
    async fn on_event(&self, ctx: &ExecutorHookContext<'_>) -> Result<ExecutorHookAction, HookError>;
}

/// An ordered pipeline of [`Hook`]s, dispatched in registration order.
///
/// Short-circuits on the first non-`Continue` action. Hook errors are
/// logged and treated as `Continue` so one misbehaving observer can't
/// stall the scheduler.
pub struct HookRegistry {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookRegistry {
    /// Create a new empty hook registry.
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Add a hook to the end of the pipeline.
    pub fn add(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.push(hook);
    }

    /// Dispatch a hook event through the pipeline.
    pub async fn dispatch(&self, ctx: &ExecutorHookContext<'_>) -> ExecutorHookAction {
        for hook in &self.hooks {
            if !hook.points().contains(&ctx.point) {
                continue;
            }

            match hook.on_event(ctx).await {
                Ok(ExecutorHookAction::Continue) => continue,
                Ok(action) => return action,
                Err(err) => {
                    tracing::warn!(point = ?ctx.point, error = %err, "hook failed, continuing");
                    continue;
                }
            }
        }

        ExecutorHookAction::Continue
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
