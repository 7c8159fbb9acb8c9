#![deny(missing_docs)]
//! Parallel DAG scheduler: dispatches a task's subtasks to worker agents,
//! respecting dependencies, a concurrency cap, per-subtask retries, and
//! mid-flight replan/dynamic-insert operations.
//!
//! Owns its `Task` exclusively (mutated only from inside `execute()`'s
//! scheduler loop, never touched directly by a caller); external
//! callers reach it only through [`Executor::replan_subtasks`],
//! [`Executor::add_subtasks`], [`Executor::stop`], [`Executor::pause`], and
//! [`Executor::resume`].

pub mod prompt;
pub mod session;

use async_trait::async_trait;
use layer0::id::WorkflowId;
use relay_bus::EventBus;
use relay_driver::AgentDriver;
use relay_hooks::{ExecutorHookAction, ExecutorHookContext, ExecutorHookPoint, HookRegistry};
use relay_state::SnapshotStore;
use relay_types::{AgentType, Event, EventKind, FailureReason, MessageEntry, Subtask, SubtaskState, Task};
use serde::{Deserialize, Serialize};
use session::SessionPool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, Semaphore};
use tokio::task::JoinSet;

/// Tool name an agent calls to hand off the remainder of its subtask as
/// new dynamic subtasks instead of finishing it itself.
const SPLIT_AND_HANDOFF: &str = "split_and_handoff";

/// Tool name an agent calls to re-read accumulated context mid-attempt.
/// The Executor only needs to recognize this call, not act on it — tool
/// resolution and execution both live with the driver.
const REVIEW_CONTEXT: &str = "review_context";

/// Tunable limits for one [`Executor`] run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on subtasks dispatched concurrently.
    pub max_parallel_subtasks: usize,
    /// Retry attempts beyond the first (default 2, so 3 attempts total).
    pub max_retries: u32,
    /// `turn_end` events tolerated per attempt before the driver is aborted.
    pub max_turns_per_subtask: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_parallel_subtasks: 5, max_retries: 2, max_turns_per_subtask: 50 }
    }
}

/// Executor-level operational errors.
///
/// Per-subtask failure causes are NOT duplicated here: they are fully
/// modeled by [`relay_types::FailureReason`] and surface as a subtask's
/// `error` field, never as an `Err` from [`Executor::execute`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ExecError {
    /// `execute()` was called with no subtasks to schedule.
    #[error("executor has no subtasks to run")]
    NotConfigured,

    /// A `replan_subtasks`/`add_subtasks` call failed validation.
    #[error("invalid replan: {0}")]
    ReplanInvalid(String),

    /// The scheduler is no longer accepting operations (already exited).
    #[error("executor is no longer running")]
    NotRunning,

    /// An agent driver failed in a way the retry loop could not absorb.
    #[error(transparent)]
    Driver(#[from] relay_driver::DriverError),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// What a single subtask attempt needs from its driver factory.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct SubtaskContext<'a> {
    /// The subtask being attempted.
    pub subtask: &'a Subtask,
    /// The fully assembled prompt for this attempt.
    pub prompt: String,
    /// The borrowed browser session id, if `subtask.agent_type == Browser`.
    pub session_id: Option<&'a str>,
}

/// Creates a fresh agent driver for one subtask attempt.
///
/// Tool resolution (which tools the driver is given, the `split_and_handoff`
/// / `review_context` replan tools merged in, browser session wiring) is
/// this trait's responsibility — it's the Executor's seam onto the
/// agent-runtime collaborator. Invocation of those tools is the driver's
/// job too; the Executor only reacts to `split_and_handoff` showing up in
/// the attempt's final message log (see `run_attempt`), the same opaque-log
/// treatment every other tool call gets.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Build a driver ready to receive `ctx.prompt`.
    async fn create(&self, ctx: &SubtaskContext<'_>) -> Result<Arc<dyn AgentDriver>, ExecError>;

    /// Close an external session when its pool is drained at `execute()`
    /// exit. Default no-op for driver factories with nothing to close.
    async fn close_session(&self, _session_id: &str) {}
}

/// Records and retrieves browser-automation operations for a session.
///
/// All failures are swallowed by the Executor (logged, not propagated) —
/// a recorder is observability, not correctness.
#[async_trait]
pub trait BehaviorRecorder: Send + Sync {
    /// Start recording the given session.
    async fn start(&self, session_id: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Stop recording and return the captured operations.
    async fn stop(
        &self,
        session_id: &str,
    ) -> Result<Vec<serde_json::Value>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Writes and lists files in a subtask's shared workspace.
///
/// Backs the "dependency result too large to inline" and "workspace file
/// listing" prompt sections (§ prompt assembly). File previews themselves
/// are an external collaborator, out of core scope.
#[async_trait]
pub trait WorkspaceWriter: Send + Sync {
    /// Write (or overwrite) a file in the workspace.
    async fn write_file(&self, name: &str, content: &str);

    /// List files currently in the workspace as `(name, size_in_bytes)`.
    async fn list_files(&self) -> Vec<(String, u64)>;
}

/// A [`WorkspaceWriter`] that writes nothing and always reports empty.
pub struct NullWorkspace;

#[async_trait]
impl WorkspaceWriter for NullWorkspace {
    async fn write_file(&self, _name: &str, _content: &str) {}

    async fn list_files(&self) -> Vec<(String, u64)> {
        Vec::new()
    }
}

/// Outcome of replacing the PENDING portion of a task's subtask list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplanOutcome {
    /// PENDING subtasks dropped by the replan.
    pub removed_count: usize,
    /// New subtasks added by the replan.
    pub added_count: usize,
    /// Ids of subtasks kept unchanged across the replan.
    pub kept_ids: Vec<String>,
}

/// Terminal summary returned by [`Executor::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Subtasks that reached `DONE`.
    pub completed: usize,
    /// Subtasks that reached `FAILED`.
    pub failed: usize,
    /// Whether `stop()` was called before every subtask reached a terminal state.
    pub stopped: bool,
    /// Total subtask count.
    pub total: usize,
}

enum SchedulerOp {
    Replan { subtasks: Vec<Subtask>, reply: oneshot::Sender<Result<ReplanOutcome, ExecError>> },
    AddSubtasks {
        subtasks: Vec<Subtask>,
        after: Option<String>,
        reply: oneshot::Sender<Result<Vec<String>, ExecError>>,
    },
}

/// Drives one task's subtask DAG to completion.
///
/// Construct with [`Executor::new`], attach optional collaborators with
/// the `with_*` builders, wrap in an `Arc`, then call
/// `Arc::clone(&executor).execute()` — `execute` takes `self: Arc<Self>`
/// so its spawned subtask tasks can each hold their own clone.
pub struct Executor {
    config: ExecutorConfig,
    task: Mutex<Task>,
    bus: Arc<EventBus>,
    driver_factory: Arc<dyn DriverFactory>,
    recorder: Option<Arc<dyn BehaviorRecorder>>,
    workspace: Arc<dyn WorkspaceWriter>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    hooks: HookRegistry,
    sessions: SessionPool,
    authenticated: bool,
    stopped: AtomicBool,
    paused: AtomicBool,
    halted: AtomicBool,
    pause_notify: Notify,
    active_drivers: Mutex<HashMap<String, Arc<dyn AgentDriver>>>,
    dispatched: Mutex<HashSet<String>>,
    ops_tx: mpsc::UnboundedSender<SchedulerOp>,
    ops_rx: Mutex<Option<mpsc::UnboundedReceiver<SchedulerOp>>>,
}

impl Executor {
    /// Build a new executor for `task`. `task.subtasks` must already be
    /// populated (the Planner's job) before [`Executor::execute`] is called.
    pub fn new(
        task: Task,
        bus: Arc<EventBus>,
        driver_factory: Arc<dyn DriverFactory>,
        config: ExecutorConfig,
    ) -> Self {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let sessions = SessionPool::new(task.task_id.clone());
        Self {
            config,
            task: Mutex::new(task),
            bus,
            driver_factory,
            recorder: None,
            workspace: Arc::new(NullWorkspace),
            snapshot_store: None,
            hooks: HookRegistry::new(),
            sessions,
            authenticated: false,
            stopped: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            pause_notify: Notify::new(),
            active_drivers: Mutex::new(HashMap::new()),
            dispatched: Mutex::new(HashSet::new()),
            ops_tx,
            ops_rx: Mutex::new(Some(ops_rx)),
        }
    }

    /// Attach a behavior recorder for browser subtasks.
    pub fn with_recorder(mut self, recorder: Arc<dyn BehaviorRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Attach a workspace writer for large dependency results and file listings.
    pub fn with_workspace(mut self, workspace: Arc<dyn WorkspaceWriter>) -> Self {
        self.workspace = workspace;
        self
    }

    /// Attach a snapshot store; without one, mutations are not persisted.
    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    /// Install a hook pipeline (see `relay-hooks`). Defaults to empty.
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Mark this task's session as authenticated — one of the
    /// post-execution learning trigger's preconditions.
    pub fn authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    /// Look up a subtask's current state. Mainly useful for tests and
    /// callers polling progress outside the event bus.
    pub async fn subtask_state(&self, id: &str) -> Option<SubtaskState> {
        self.task.lock().await.subtask(id).map(|s| s.state)
    }

    /// Drive the subtask DAG to completion (or until `stop()`).
    ///
    /// `Err(ExecError::NotConfigured)` if called with no subtasks. Every
    /// other per-subtask failure is absorbed into that subtask's `FAILED`
    /// state, never into this function's return value.
    #[tracing::instrument(skip(self))]
    pub async fn execute(self: Arc<Self>) -> Result<ExecutionSummary, ExecError> {
        {
            let task = self.task.lock().await;
            if task.subtasks.is_empty() {
                return Err(ExecError::NotConfigured);
            }
        }

        self.bus.emit(Event::new(EventKind::WorkforceStarted)).await;
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_subtasks.max(1)));
        let mut emitted_failures: HashSet<String> = HashSet::new();
        let mut ops_rx = self
            .ops_rx
            .lock()
            .await
            .take()
            .expect("execute() must not be called more than once concurrently on the same Executor");
        let mut set: JoinSet<()> = JoinSet::new();

        'scheduler: loop {
            while let Ok(op) = ops_rx.try_recv() {
                self.handle_op(op).await;
            }

            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            let promoted_this_pass = self.promote_blocked_to_failed().await;
            self.emit_newly_failed(&mut emitted_failures).await;

            if !self.paused.load(Ordering::SeqCst) && !self.halted.load(Ordering::SeqCst) {
                for subtask_id in self.collect_eligible().await {
                    let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    self.dispatched.lock().await.insert(subtask_id.clone());
                    let executor = Arc::clone(&self);
                    set.spawn(async move {
                        let _permit = permit;
                        executor.dispatch_subtask(subtask_id).await;
                    });
                }
            }

            if set.is_empty() {
                if self.paused.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst) {
                    tokio::select! {
                        _ = self.pause_notify.notified() => {}
                        Some(op) = ops_rx.recv() => self.handle_op(op).await,
                    }
                    continue;
                }

                let task_done = {
                    let task = self.task.lock().await;
                    task.subtasks.iter().all(|s| matches!(s.state, SubtaskState::Done | SubtaskState::Failed))
                };
                if task_done {
                    break;
                }

                // Nothing in flight and nothing newly eligible. If this pass
                // still promoted a dependency failure, a dependent further
                // down the chain may become promotable on the next pass —
                // only declare a genuine deadlock (a cycle, or a hook halt
                // with no other work to drain) once a full pass makes no
                // progress at all.
                if self.collect_eligible().await.is_empty() {
                    if promoted_this_pass {
                        continue;
                    }
                    if self.fail_all_pending_as_circular().await {
                        self.emit_newly_failed(&mut emitted_failures).await;
                    }
                    break;
                }
                continue;
            }

            tokio::select! {
                Some(result) = set.join_next() => {
                    if let Err(join_err) = result {
                        tracing::warn!(error = %join_err, "subtask task panicked");
                    }
                }
                Some(op) = ops_rx.recv() => self.handle_op(op).await,
            }

            if self.halted.load(Ordering::SeqCst) {
                tracing::warn!("a before-dispatch hook halted the executor; remaining subtasks stay PENDING");
                while let Some(result) = set.join_next().await {
                    if let Err(join_err) = result {
                        tracing::warn!(error = %join_err, "subtask task panicked");
                    }
                }
                break 'scheduler;
            }
        }

        self.close_all_sessions().await;

        let (completed, failed, total) = {
            let mut task = self.task.lock().await;
            task.recompute_status();
            let completed = task.subtasks.iter().filter(|s| s.state == SubtaskState::Done).count();
            let failed = task.subtasks.iter().filter(|s| s.state == SubtaskState::Failed).count();
            (completed, failed, task.subtasks.len())
        };
        let stopped = self.stopped.load(Ordering::SeqCst);

        self.bus
            .emit(Event::new(if stopped {
                EventKind::WorkforceStopped
            } else {
                EventKind::WorkforceCompleted { completed, failed }
            }))
            .await;

        self.persist_snapshot().await;
        self.maybe_trigger_post_execution_learning().await;

        Ok(ExecutionSummary { completed, failed, stopped, total })
    }

    /// Stop the executor: aborts every in-flight driver, wakes pause
    /// waiters, and lets the scheduler loop exit on its next check.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let active = self.active_drivers.lock().await;
        for driver in active.values() {
            driver.abort().await;
        }
        self.pause_notify.notify_waiters();
    }

    /// Pause: the scheduler stops starting new batches until `resume()`.
    /// Already-RUNNING subtasks are unaffected.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resume a paused executor.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.pause_notify.notify_waiters();
    }

    /// Replace the PENDING portion of the subtask list with `new_subtasks`.
    /// RUNNING/DONE/FAILED subtasks are kept unchanged. Applied atomically
    /// between two scheduler iterations, never mid-scan.
    pub async fn replan_subtasks(&self, new_subtasks: Vec<Subtask>) -> Result<ReplanOutcome, ExecError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ops_tx
            .send(SchedulerOp::Replan { subtasks: new_subtasks, reply: reply_tx })
            .map_err(|_| ExecError::NotRunning)?;
        reply_rx.await.map_err(|_| ExecError::NotRunning)?
    }

    /// Insert `new_subtasks` immediately after `after` (or at the tail if
    /// `None`), skipping over already-inserted `{after}_dyn_*` siblings.
    pub async fn add_subtasks(
        &self,
        new_subtasks: Vec<Subtask>,
        after: Option<String>,
    ) -> Result<Vec<String>, ExecError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ops_tx
            .send(SchedulerOp::AddSubtasks { subtasks: new_subtasks, after, reply: reply_tx })
            .map_err(|_| ExecError::NotRunning)?;
        reply_rx.await.map_err(|_| ExecError::NotRunning)?
    }

    async fn handle_op(&self, op: SchedulerOp) {
        match op {
            SchedulerOp::Replan { subtasks, reply } => {
                let result = self.apply_replan(subtasks).await;
                let _ = reply.send(result);
            }
            SchedulerOp::AddSubtasks { subtasks, after, reply } => {
                let result = self.apply_add_subtasks(subtasks, after).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn apply_replan(&self, new_subtasks: Vec<Subtask>) -> Result<ReplanOutcome, ExecError> {
        let mut task = self.task.lock().await;
        let kept: Vec<Subtask> =
            task.subtasks.iter().filter(|s| s.state != SubtaskState::Pending).cloned().collect();
        let removed_count = task.subtasks.iter().filter(|s| s.state == SubtaskState::Pending).count();
        let kept_ids: Vec<String> = kept.iter().map(|s| s.id.clone()).collect();

        let mut seen: HashSet<&str> = kept_ids.iter().map(String::as_str).collect();
        for s in &new_subtasks {
            if !seen.insert(&s.id) {
                return Err(ExecError::ReplanInvalid(format!(
                    "subtask id '{}' collides with a kept subtask",
                    s.id
                )));
            }
        }
        for s in &new_subtasks {
            for dep in &s.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(ExecError::ReplanInvalid(format!(
                        "subtask '{}' depends on unresolved id '{dep}'",
                        s.id
                    )));
                }
            }
        }

        let added_count = new_subtasks.len();
        task.subtasks = kept.into_iter().chain(new_subtasks).collect();
        task.recompute_status();

        let ctx = ExecutorHookContext::for_replan(&task);
        let _ = self.hooks.dispatch(&ctx).await;
        drop(task);

        self.persist_snapshot().await;
        self.bus
            .emit(Event::new(EventKind::TaskReplanned {
                removed_count,
                added_count,
                kept_ids: kept_ids.clone(),
            }))
            .await;

        Ok(ReplanOutcome { removed_count, added_count, kept_ids })
    }

    async fn apply_add_subtasks(
        &self,
        new_subtasks: Vec<Subtask>,
        after: Option<String>,
    ) -> Result<Vec<String>, ExecError> {
        let mut task = self.task.lock().await;
        let existing: HashSet<String> = task.subtasks.iter().map(|s| s.id.clone()).collect();
        for s in &new_subtasks {
            if existing.contains(&s.id) {
                return Err(ExecError::ReplanInvalid(format!("subtask id '{}' already exists", s.id)));
            }
        }
        let added_ids: Vec<String> = new_subtasks.iter().map(|s| s.id.clone()).collect();

        let insert_at = match &after {
            Some(parent_id) => match task.subtasks.iter().position(|s| &s.id == parent_id) {
                Some(idx) => {
                    let prefix = format!("{parent_id}_dyn_");
                    let mut pos = idx + 1;
                    while pos < task.subtasks.len() && task.subtasks[pos].id.starts_with(&prefix) {
                        pos += 1;
                    }
                    pos
                }
                None => task.subtasks.len(),
            },
            None => task.subtasks.len(),
        };

        for (offset, subtask) in new_subtasks.into_iter().enumerate() {
            task.subtasks.insert(insert_at + offset, subtask);
        }
        task.recompute_status();
        drop(task);

        self.persist_snapshot().await;
        self.bus
            .emit(Event::new(EventKind::DynamicTasksAdded {
                parent_id: after.unwrap_or_default(),
                added_ids: added_ids.clone(),
            }))
            .await;

        Ok(added_ids)
    }

    /// Promote any PENDING subtask whose dependency is FAILED or missing
    /// to FAILED, recording why. Does not touch subtasks whose deps are
    /// still PENDING/RUNNING. Returns whether anything was promoted, so
    /// callers can tell a cascading chain (needs another scheduler pass)
    /// apart from a genuine deadlock.
    async fn promote_blocked_to_failed(&self) -> bool {
        let mut task = self.task.lock().await;
        let states: HashMap<String, SubtaskState> =
            task.subtasks.iter().map(|s| (s.id.clone(), s.state)).collect();

        let mut promoted = false;
        for subtask in task.subtasks.iter_mut().filter(|s| s.state == SubtaskState::Pending) {
            for dep in &subtask.depends_on {
                match states.get(dep) {
                    None => {
                        subtask.fail(FailureReason::MissingDependency { dependency: dep.clone() });
                        promoted = true;
                        break;
                    }
                    Some(SubtaskState::Failed) => {
                        subtask.fail(FailureReason::DependencyFailed { dependency: dep.clone() });
                        promoted = true;
                        break;
                    }
                    _ => {}
                }
            }
        }
        promoted
    }

    async fn fail_all_pending_as_circular(&self) -> bool {
        let mut task = self.task.lock().await;
        let mut any = false;
        for subtask in task.subtasks.iter_mut().filter(|s| s.state == SubtaskState::Pending) {
            subtask.fail(FailureReason::CircularDependency);
            any = true;
        }
        any
    }

    /// PENDING subtasks whose dependencies are all DONE and that have not
    /// already been claimed by an in-flight [`Executor::dispatch_subtask`]
    /// call. The `dispatched` check closes the window between a subtask
    /// being selected here and its state actually flipping to RUNNING
    /// inside the spawned task, without which a subtask could be spawned
    /// twice across two scheduler-loop iterations.
    async fn collect_eligible(&self) -> Vec<String> {
        let task = self.task.lock().await;
        let dispatched = self.dispatched.lock().await;
        task.subtasks
            .iter()
            .filter(|s| s.state == SubtaskState::Pending && !dispatched.contains(&s.id))
            .filter(|s| {
                s.depends_on
                    .iter()
                    .all(|dep| task.subtask(dep).is_some_and(|d| d.state == SubtaskState::Done))
            })
            .map(|s| s.id.clone())
            .collect()
    }

    async fn emit_newly_failed(&self, emitted: &mut HashSet<String>) {
        let ids: Vec<String> = {
            let task = self.task.lock().await;
            task.subtasks
                .iter()
                .filter(|s| s.state == SubtaskState::Failed && !emitted.contains(&s.id))
                .map(|s| s.id.clone())
                .collect()
        };

        for id in ids {
            emitted.insert(id.clone());
            let error = {
                let task = self.task.lock().await;
                task.subtask(&id).and_then(|s| s.error.clone()).unwrap_or_default()
            };
            self.bus
                .emit(Event::new(EventKind::SubtaskState { subtask_id: id.clone(), state: SubtaskState::Failed }))
                .await;
            self.bus
                .emit(Event::new(EventKind::WorkerFailed { subtask_id: id.clone(), error }))
                .await;

            let task = self.task.lock().await;
            if let Some(subtask) = task.subtask(&id) {
                let ctx = ExecutorHookContext::for_subtask(ExecutorHookPoint::AfterSubtaskFailed, &task, subtask);
                let _ = self.hooks.dispatch(&ctx).await;
            }
        }
    }

    /// Dispatch a claimed subtask, then release its claim in `dispatched`
    /// regardless of how it finished (completed, failed, or halted).
    /// Dispatch a claimed subtask, then release its claim in `dispatched`
    /// regardless of how it finished (completed, failed, or halted).
    async fn dispatch_subtask(self: Arc<Self>, subtask_id: String) {
        self.dispatch_subtask_inner(subtask_id.clone()).await;
        self.dispatched.lock().await.remove(&subtask_id);
    }

    async fn dispatch_subtask_inner(&self, subtask_id: String) {
        let agent_type = {
            let task = self.task.lock().await;
            task.subtask(&subtask_id).map(|s| s.agent_type)
        };
        let Some(agent_type) = agent_type else { return };

        {
            let task = self.task.lock().await;
            if let Some(subtask) = task.subtask(&subtask_id) {
                let ctx = ExecutorHookContext::for_subtask(ExecutorHookPoint::BeforeDispatch, &task, subtask);
                if let ExecutorHookAction::Halt { reason } = self.hooks.dispatch(&ctx).await {
                    tracing::warn!(subtask_id = %subtask_id, reason, "hook halted dispatch, leaving subtask PENDING");
                    self.halted.store(true, Ordering::SeqCst);
                    return;
                }
            }
        }

        let session_id = if agent_type == AgentType::Browser { Some(self.sessions.borrow().await) } else { None };

        {
            let mut task = self.task.lock().await;
            if let Some(subtask) = task.subtask_mut(&subtask_id) {
                subtask.state = SubtaskState::Running;
            }
        }
        self.bus.emit(Event::new(EventKind::AssignTask { subtask_id: subtask_id.clone() })).await;
        self.bus
            .emit(Event::new(EventKind::SubtaskState { subtask_id: subtask_id.clone(), state: SubtaskState::Running }))
            .await;
        self.bus
            .emit(Event::new(EventKind::WorkerAssigned { subtask_id: subtask_id.clone(), agent_type }))
            .await;

        let max_attempts = self.config.max_retries + 1;
        let mut last_error = String::new();
        let mut success = false;

        for attempt in 0..max_attempts {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            if agent_type == AgentType::Browser {
                if let (Some(recorder), Some(session_id)) = (&self.recorder, session_id.as_deref()) {
                    if let Err(err) = recorder.start(session_id).await {
                        tracing::warn!(subtask_id = %subtask_id, error = %err, "behavior recorder failed to start");
                    }
                }
            }

            let prompt_text = {
                let task = self.task.lock().await;
                match task.subtask(&subtask_id) {
                    Some(subtask) => {
                        crate::prompt::assemble(&task, subtask, session_id.as_deref(), self.workspace.as_ref()).await
                    }
                    None => break,
                }
            };

            let subtask_snapshot = {
                let task = self.task.lock().await;
                task.subtask(&subtask_id).cloned()
            };
            let Some(subtask_snapshot) = subtask_snapshot else { break };
            let sub_ctx = SubtaskContext {
                subtask: &subtask_snapshot,
                prompt: prompt_text.clone(),
                session_id: session_id.as_deref(),
            };

            match self.driver_factory.create(&sub_ctx).await {
                Ok(driver) => {
                    self.active_drivers.lock().await.insert(subtask_id.clone(), Arc::clone(&driver));

                    let attempt_result = self.run_attempt(&subtask_id, driver.as_ref(), prompt_text).await;

                    self.active_drivers.lock().await.remove(&subtask_id);

                    if let Some(session_id) = session_id.as_deref() {
                        if let Some(recorder) = &self.recorder {
                            if let Err(err) = recorder.stop(session_id).await {
                                tracing::warn!(subtask_id = %subtask_id, error = %err, "behavior recorder failed to stop");
                            }
                        }
                    }

                    match attempt_result {
                        Ok(result_text) => {
                            success = true;
                            self.complete_subtask(&subtask_id, result_text).await;
                        }
                        Err(err) => last_error = err,
                    }
                }
                Err(err) => last_error = err.to_string(),
            }

            if success {
                break;
            }

            self.remove_dynamic_children(&subtask_id).await;
            let exhausted = attempt + 1 >= max_attempts;
            self.record_retry(&subtask_id, &last_error).await;
            if exhausted {
                break;
            }
        }

        if !success {
            let mut task = self.task.lock().await;
            if let Some(subtask) = task.subtask_mut(&subtask_id) {
                if subtask.state == SubtaskState::Running {
                    if self.stopped.load(Ordering::SeqCst) {
                        subtask.fail(FailureReason::Cancelled);
                    } else {
                        subtask.fail(FailureReason::RetriesExhausted { last_error: last_error.clone() });
                    }
                }
            }
        }

        if let Some(session_id) = session_id {
            self.sessions.release(session_id).await;
        }
    }

    /// Prompt the driver, bridge its events to the bus with the
    /// turn-guard installed, and extract the final assistant text.
    ///
    /// If the final message log contains a `split_and_handoff` call, its
    /// stored hand-off summary overrides the extracted text and its
    /// `subtasks` become dynamic children of `subtask_id`. A
    /// `review_context` call is recognized (logged) but otherwise has no
    /// effect here — reacting to it belongs to the driver's tool loop.
    async fn run_attempt(&self, subtask_id: &str, driver: &dyn AgentDriver, prompt: String) -> Result<String, String> {
        driver.prompt(prompt).await.map_err(|e| e.to_string())?;

        let handle = driver.subscribe();
        let outcome = relay_bridge::bridge(
            handle,
            driver,
            &self.bus,
            Some(subtask_id),
            Some(self.config.max_turns_per_subtask),
        )
        .await
        .map_err(|e| e.to_string())?;

        if outcome.turn_limit_exceeded {
            tracing::warn!(subtask_id, "turn guard tripped; counting this attempt as a failure");
            return Err("turn limit exceeded".to_string());
        }

        if find_tool_call(&outcome.final_messages, REVIEW_CONTEXT).is_some() {
            tracing::debug!(subtask_id, "agent invoked review_context");
        }

        if let Some((_, input)) = find_tool_call(&outcome.final_messages, SPLIT_AND_HANDOFF) {
            let handoff = parse_split_and_handoff(subtask_id, input);
            if !handoff.new_subtasks.is_empty() {
                if let Err(err) = self.add_subtasks(handoff.new_subtasks, Some(subtask_id.to_string())).await {
                    tracing::warn!(subtask_id, error = %err, "split_and_handoff failed to add dynamic subtasks");
                }
            }
            return Ok(handoff.summary);
        }

        relay_types::concat_final_assistant_text(&outcome.final_messages)
            .ok_or_else(|| "agent produced no final text".to_string())
    }

    async fn complete_subtask(&self, subtask_id: &str, result: String) {
        {
            let mut task = self.task.lock().await;
            if let Some(subtask) = task.subtask_mut(subtask_id) {
                subtask.complete(result);
            }
        }
        self.bus
            .emit(Event::new(EventKind::SubtaskState { subtask_id: subtask_id.to_string(), state: SubtaskState::Done }))
            .await;
        self.bus.emit(Event::new(EventKind::WorkerCompleted { subtask_id: subtask_id.to_string() })).await;

        let task = self.task.lock().await;
        if let Some(subtask) = task.subtask(subtask_id) {
            let ctx = ExecutorHookContext::for_subtask(ExecutorHookPoint::AfterSubtaskDone, &task, subtask);
            let _ = self.hooks.dispatch(&ctx).await;
        }
        drop(task);

        self.persist_snapshot().await;
    }

    async fn record_retry(&self, subtask_id: &str, error: &str) {
        let mut task = self.task.lock().await;
        if let Some(subtask) = task.subtask_mut(subtask_id) {
            subtask.retry_count += 1;
            subtask.error = Some(error.to_string());
        }
    }

    async fn remove_dynamic_children(&self, subtask_id: &str) {
        let mut task = self.task.lock().await;
        let prefix = format!("{subtask_id}_dyn_");
        task.subtasks.retain(|s| !(s.id.starts_with(&prefix) && s.state == SubtaskState::Pending));
    }

    async fn close_all_sessions(&self) {
        for session_id in self.sessions.drain().await {
            self.driver_factory.close_session(&session_id).await;
        }
    }

    async fn persist_snapshot(&self) {
        let Some(store) = &self.snapshot_store else { return };
        let task = self.task.lock().await;
        let task_id = task.task_id.clone();
        match serde_json::to_value(&*task) {
            Ok(value) => {
                drop(task);
                if let Err(err) = store.put_snapshot(&WorkflowId::from(task_id.as_str()), value).await {
                    tracing::warn!(error = %err, "failed to persist task snapshot");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to serialize task snapshot"),
        }
    }

    async fn maybe_trigger_post_execution_learning(&self) {
        if self.stopped.load(Ordering::SeqCst) || !self.authenticated {
            return;
        }
        let task = self.task.lock().await;
        let browser_subtasks: Vec<&Subtask> =
            task.subtasks.iter().filter(|s| s.agent_type == AgentType::Browser).collect();
        let eligible = !browser_subtasks.is_empty()
            && task.subtasks.len() >= 2
            && browser_subtasks.iter().all(|s| s.state == SubtaskState::Done);
        if !eligible {
            return;
        }
        let ctx = ExecutorHookContext::for_task(&task);
        let _ = self.hooks.dispatch(&ctx).await;
    }
}

fn find_tool_call<'a>(messages: &'a [MessageEntry], name: &str) -> Option<(&'a str, &'a serde_json::Value)> {
    messages.iter().rev().find_map(|entry| {
        entry.tool_calls().into_iter().find(|(_, call_name, _)| *call_name == name).map(|(id, _, input)| (id, input))
    })
}

/// Dynamic subtasks inserted by a `split_and_handoff` call, plus the
/// hand-off summary that overrides the attempt's result text.
struct SplitAndHandoff {
    summary: String,
    new_subtasks: Vec<Subtask>,
}

/// Parse a `split_and_handoff` call's input: `{summary, subtasks:
/// [{id?, content, agent_type?, depends_on?}]}`. Each new subtask's id is
/// qualified with the `{parent_id}_dyn_` prefix if not already carrying
/// it; a `depends_on` entry referring to a sibling in the same batch is
/// qualified the same way, one referring to an existing task subtask is
/// left alone. A missing/unrecognized `agent_type` falls back to
/// [`AgentType::infer`] over the subtask's content.
fn parse_split_and_handoff(parent_id: &str, input: &serde_json::Value) -> SplitAndHandoff {
    let summary = input.get("summary").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let raw_subtasks: Vec<serde_json::Value> =
        input.get("subtasks").and_then(|v| v.as_array()).cloned().unwrap_or_default();

    let sibling_ids: HashSet<String> = raw_subtasks
        .iter()
        .filter_map(|s| s.get("id").and_then(|v| v.as_str()).map(str::to_string))
        .collect();

    let prefix = format!("{parent_id}_dyn_");
    let qualify = |id: &str| -> String {
        if id.starts_with(&prefix) {
            id.to_string()
        } else {
            format!("{prefix}{id}")
        }
    };

    let new_subtasks = raw_subtasks
        .iter()
        .enumerate()
        .map(|(idx, raw)| {
            let raw_id =
                raw.get("id").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| idx.to_string());
            let content = raw.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let agent_type = raw
                .get("agent_type")
                .and_then(|v| v.as_str())
                .and_then(|s| match s {
                    "browser" => Some(AgentType::Browser),
                    "document" => Some(AgentType::Document),
                    "code" => Some(AgentType::Code),
                    "multi_modal" => Some(AgentType::MultiModal),
                    _ => None,
                })
                .unwrap_or_else(|| AgentType::infer(&content));

            let mut subtask = Subtask::new(qualify(&raw_id), content, agent_type);
            subtask.depends_on = raw
                .get("depends_on")
                .and_then(|v| v.as_array())
                .map(|deps| {
                    deps.iter()
                        .filter_map(|d| d.as_str())
                        .map(|d| if sibling_ids.contains(d) { qualify(d) } else { d.to_string() })
                        .collect()
                })
                .unwrap_or_default();
            subtask
        })
        .collect();

    SplitAndHandoff { summary, new_subtasks }
}
