#![deny(missing_docs)]
//! Persistent conversational session that decides, turn by turn, whether
//! to answer a user directly or delegate the request to a background
//! [`relay_executor::Executor`].
//!
//! Tool *invocation* (shell exec, search, ask-human, attach-file, and the
//! five delegation meta-tools) is the agent driver's job — an
//! agent-runtime collaborator out of scope here, exactly as
//! `relay_executor::DriverFactory` treats tool resolution for subtask
//! attempts. This module only reacts to what shows up in the driver's
//! final message log once a turn completes, the same opaque-log
//! treatment `relay_executor::run_attempt` and
//! `relay_planner::decompose_and_query_memory` already give driver
//! output. A fresh driver is created every turn, full history threaded
//! through [`OrchestratorContext`] — `AgentDriver` has no system-prompt
//! setter, so a turn is always a rebuild-the-request affair rather than
//! a mutation of some long-lived agent object.

pub mod index;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use index::{IndexStatus, TaskIndex};
use layer0::content::ContentBlock;
use layer0::effect::Scope;
use layer0::error::StateError;
use layer0::id::WorkflowId;
use layer0::state::StateStore;
use relay_bus::EventBus;
use relay_driver::{AgentDriver, DriverError};
use relay_executor::{
    DriverFactory as SubtaskDriverFactory, ExecError, Executor, ExecutorConfig, ReplanOutcome,
};
use relay_memory::MemoryClient;
use relay_planner::{decompose_and_query_memory, PlanError, PlannerConfig};
use relay_state::{SnapshotStore, SNAPSHOT_KEY};
use relay_types::{
    concat_final_assistant_text, EndStatus, Event, EventKind, MessageEntry, Subtask, SubtaskState, Task, TaskStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

const COMPLETION_RESULT_LIMIT: usize = 1000;

/// Tunables for one Orchestrator session.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// How long `run()` waits for the next message while no Executor is
    /// active before ending the loop.
    pub idle_timeout: Duration,
    /// Turn guard for the Orchestrator's own conversational turns —
    /// distinct from `ExecutorConfig::max_turns_per_subtask`, which
    /// guards subtask attempts.
    pub max_turns: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { idle_timeout: Duration::from_secs(600), max_turns: 50 }
    }
}

/// Orchestrator-level operational errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum OrchError {
    /// The conversational driver failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The bridge translating driver events to the bus failed.
    #[error(transparent)]
    Bridge(#[from] relay_bridge::BridgeError),

    /// Decomposition failed.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// The delegated Executor reported an operational error.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The snapshot store failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// `resume_task` was called with no id and no incomplete task exists.
    #[error("no incomplete task to resume")]
    NothingToResume,

    /// A meta-tool referenced a task id with no matching snapshot or
    /// running Executor.
    #[error("unknown task id '{0}'")]
    UnknownTask(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// What the Orchestrator's driver factory needs to build a fresh driver
/// for one conversational turn.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct OrchestratorContext<'a> {
    /// The conversation so far, oldest first.
    pub history: &'a [MessageEntry],
    /// The freshly rendered system prompt for this turn.
    pub system_prompt: String,
    /// This turn's forwarded message text — the user's own message, a
    /// prefix of `[EXECUTION COMPLETE: ...]` summaries, or both.
    pub user_message: &'a str,
}

/// Creates a fresh driver for one Orchestrator turn, wired with the nine
/// tools (shell exec, search, ask-human, attach-file, and the five
/// delegation meta-tools). Tool resolution itself is out of scope — this
/// is the seam onto that agent-runtime collaborator.
#[async_trait]
pub trait OrchestratorDriverFactory: Send + Sync {
    /// Build a driver ready to receive `ctx.user_message`. An `Err` here
    /// is how credential/configuration failures (§4.5 step 6) surface.
    async fn create(&self, ctx: &OrchestratorContext<'_>) -> Result<Arc<dyn AgentDriver>, OrchError>;
}

/// Creates a fresh, tool-free driver for one decomposition call — the
/// same seam `relay_planner::decompose_and_query_memory` expects.
#[async_trait]
pub trait PlannerDriverFactory: Send + Sync {
    /// Build a driver ready to receive the decomposition prompt.
    async fn create(&self) -> Result<Arc<dyn AgentDriver>, OrchError>;
}

/// Why [`Orchestrator::run`]'s loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// No Executor was running and no message arrived within `idle_timeout`.
    IdleTimeout,
}

/// Terminal summary returned when `run()`'s loop ends.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Why the loop ended.
    pub reason: EndReason,
    /// Task ids still running in the background when the loop ended.
    pub still_running: Vec<String>,
}

struct ExecutorHandle {
    label: String,
    executor: Arc<Executor>,
    started_at: DateTime<Utc>,
}

enum OrchestratorOp {
    UserMessage(String),
    ExecutorDone(String),
}

/// Forwards `put_snapshot`/`get_snapshot`/`delete_snapshot` to a raw
/// `Arc<dyn StateStore>`.
///
/// `relay_state::SnapshotStore` is blanket-implemented for `T: StateStore`,
/// but that blanket impl implicitly requires `T: Sized` — it does not
/// extend to the unsized `dyn StateStore` trait object the Orchestrator
/// is handed. This adapter is `Sized` itself, so it gets its own
/// (otherwise identical) impl instead.
struct StoreSnapshots(Arc<dyn StateStore>);

#[async_trait]
impl SnapshotStore for StoreSnapshots {
    async fn put_snapshot(&self, task_id: &WorkflowId, snapshot: serde_json::Value) -> Result<(), StateError> {
        self.0.write(&Scope::Workflow(task_id.clone()), SNAPSHOT_KEY, snapshot).await
    }

    async fn get_snapshot(&self, task_id: &WorkflowId) -> Result<Option<serde_json::Value>, StateError> {
        self.0.read(&Scope::Workflow(task_id.clone()), SNAPSHOT_KEY).await
    }

    async fn delete_snapshot(&self, task_id: &WorkflowId) -> Result<(), StateError> {
        self.0.delete(&Scope::Workflow(task_id.clone()), SNAPSHOT_KEY).await
    }
}

/// Drives the persistent conversational loop described in the `run`
/// method. Construct with [`Orchestrator::new`], which also returns a
/// cloneable [`OrchestratorHandle`] for injecting messages and invoking
/// the resume/cancel/replan meta-operations from outside the loop.
pub struct Orchestrator {
    config: OrchestratorConfig,
    driver_factory: Arc<dyn OrchestratorDriverFactory>,
    planner_driver_factory: Arc<dyn PlannerDriverFactory>,
    subtask_driver_factory: Arc<dyn SubtaskDriverFactory>,
    memory: Arc<dyn MemoryClient>,
    bus: Arc<EventBus>,
    store: Arc<dyn StateStore>,
    index: TaskIndex,
    executor_config: ExecutorConfig,
    planner_config: PlannerConfig,
    platform: String,
    workspace: String,
    history: Mutex<Vec<MessageEntry>>,
    executors: Mutex<HashMap<String, ExecutorHandle>>,
    ops_tx: mpsc::UnboundedSender<OrchestratorOp>,
    ops_rx: Mutex<Option<mpsc::UnboundedReceiver<OrchestratorOp>>>,
}

impl Orchestrator {
    /// Build a new session. Returns the session itself (for `run()`) and
    /// a cloneable handle for driving it from outside the loop.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver_factory: Arc<dyn OrchestratorDriverFactory>,
        planner_driver_factory: Arc<dyn PlannerDriverFactory>,
        subtask_driver_factory: Arc<dyn SubtaskDriverFactory>,
        memory: Arc<dyn MemoryClient>,
        bus: Arc<EventBus>,
        store: Arc<dyn StateStore>,
        platform: impl Into<String>,
        workspace: impl Into<String>,
        config: OrchestratorConfig,
    ) -> (Arc<Self>, OrchestratorHandle) {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let index = TaskIndex::new(store.clone());
        let orch = Arc::new(Self {
            config,
            driver_factory,
            planner_driver_factory,
            subtask_driver_factory,
            memory,
            bus,
            store,
            index,
            executor_config: ExecutorConfig::default(),
            planner_config: PlannerConfig::default(),
            platform: platform.into(),
            workspace: workspace.into(),
            history: Mutex::new(Vec::new()),
            executors: Mutex::new(HashMap::new()),
            ops_tx,
            ops_rx: Mutex::new(Some(ops_rx)),
        });
        let handle = OrchestratorHandle { inner: orch.clone() };
        (orch, handle)
    }

    /// The bus this session emits its conversational events on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Drive the session: process one message per loop iteration per the
    /// ten-step contract, until idle for `config.idle_timeout` with no
    /// Executor running.
    pub async fn run(self: Arc<Self>, initial_message: String) -> Result<ExecutionResult, OrchError> {
        let mut ops_rx = self
            .ops_rx
            .lock()
            .await
            .take()
            .expect("run() must not be called more than once concurrently on the same Orchestrator");
        let mut pending_op = Some(OrchestratorOp::UserMessage(initial_message));

        loop {
            let mut user_message: Option<String> = None;
            let mut prefix = String::new();

            if let Some(op) = pending_op.take() {
                self.apply_op(op, &mut user_message, &mut prefix).await;
            }
            while let Ok(op) = ops_rx.try_recv() {
                self.apply_op(op, &mut user_message, &mut prefix).await;
            }

            let turn_message = match (&prefix[..], user_message) {
                (p, Some(m)) if !p.is_empty() => format!("{p}{m}"),
                (p, None) if !p.is_empty() => p.trim_end().to_string(),
                (_, Some(m)) => m,
                (_, None) => String::new(),
            };

            self.run_one_turn(&turn_message).await?;

            pending_op = match self.await_next(&mut ops_rx).await {
                Some(op) => Some(op),
                None => return Ok(self.end_result(EndReason::IdleTimeout).await),
            };
        }
    }

    async fn apply_op(&self, op: OrchestratorOp, user_message: &mut Option<String>, prefix: &mut String) {
        match op {
            OrchestratorOp::UserMessage(text) => *user_message = Some(text),
            OrchestratorOp::ExecutorDone(task_id) => {
                if let Some(summary) = self.drain_executor(&task_id).await {
                    prefix.push_str(&summary);
                    prefix.push_str("\n\n");
                }
            }
        }
    }

    async fn await_next(&self, ops_rx: &mut mpsc::UnboundedReceiver<OrchestratorOp>) -> Option<OrchestratorOp> {
        let no_executors = self.executors.lock().await.is_empty();
        if no_executors {
            tokio::time::timeout(self.config.idle_timeout, ops_rx.recv()).await.ok().flatten()
        } else {
            ops_rx.recv().await
        }
    }

    /// Steps 2-9 of the contract for one already-assembled turn message.
    async fn run_one_turn(self: &Arc<Self>, turn_message: &str) -> Result<(), OrchError> {
        let active_tasks_context = self.active_tasks_context().await;
        let system_prompt = render_system_prompt(&self.platform, &self.workspace, &active_tasks_context);

        self.history.lock().await.push(MessageEntry::User { content: layer0::content::Content::Text(turn_message.to_string()) });
        let history_snapshot = self.history.lock().await.clone();

        let ctx = OrchestratorContext { history: &history_snapshot, system_prompt, user_message: turn_message };
        let driver = match self.driver_factory.create(&ctx).await {
            Ok(driver) => driver,
            Err(err) => {
                self.bus.emit(Event::new(EventKind::Error { message: err.to_string() })).await;
                self.bus
                    .emit(Event::new(EventKind::WaitConfirm { content: None, question: None, error: Some(err.to_string()) }))
                    .await;
                return Ok(());
            }
        };

        driver.prompt(turn_message.to_string()).await?;
        let handle = driver.subscribe();
        let outcome = relay_bridge::bridge(handle, driver.as_ref(), &self.bus, None, Some(self.config.max_turns)).await?;

        let decompose_call = find_tool_call(&outcome.final_messages, "decompose_task");

        if let Some((_, input)) = decompose_call {
            let description = input
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or(turn_message)
                .to_string();
            let resume_task_id = input.get("resume_task_id").and_then(|v| v.as_str()).map(str::to_string);

            match self.clone().decompose_task(description, resume_task_id).await {
                Ok(reply) => {
                    self.bus
                        .emit(Event::new(EventKind::WaitConfirm { content: Some(reply.clone()), question: None, error: None }))
                        .await;
                    self.bus.emit(Event::new(EventKind::Confirmed)).await;
                    self.history
                        .lock()
                        .await
                        .push(MessageEntry::Assistant { content: vec![ContentBlock::Text { text: reply }] });
                }
                Err(err) => {
                    self.bus
                        .emit(Event::new(EventKind::WaitConfirm { content: None, question: None, error: Some(err.to_string()) }))
                        .await;
                }
            }
            // The turn's own trailing assistant entry was an intentionally
            // aborted tool-call turn (§4.5 decompose_task mechanics); it is
            // deliberately not appended to history beyond the reply above,
            // so the next turn sees a clean conversation.
            return Ok(());
        }

        if let Some(err) = driver.error() {
            self.bus
                .emit(Event::new(EventKind::WaitConfirm { content: None, question: None, error: Some(err) }))
                .await;
            return Ok(());
        }

        let reply = concat_final_assistant_text(&outcome.final_messages).unwrap_or_default();
        self.bus
            .emit(Event::new(EventKind::WaitConfirm { content: Some(reply.clone()), question: None, error: None }))
            .await;
        if let Some(entry) = outcome.final_messages.into_iter().rev().find(|m| matches!(m, MessageEntry::Assistant { .. })) {
            self.history.lock().await.push(entry);
        }
        Ok(())
    }

    async fn active_tasks_context(&self) -> String {
        let executors = self.executors.lock().await;
        if executors.is_empty() {
            return "No active background tasks.".to_string();
        }
        let mut out = String::new();
        for (task_id, handle) in executors.iter() {
            out.push_str(&format!("- `{task_id}` ({}): started {}\n", handle.label, handle.started_at.to_rfc3339()));
        }
        out
    }

    async fn drain_executor(&self, task_id: &str) -> Option<String> {
        let handle = self.executors.lock().await.remove(task_id)?;
        let scope = Scope::Workflow(WorkflowId::from(task_id));
        let value = self.store.read(&scope, SNAPSHOT_KEY).await.ok().flatten()?;
        let task: Task = serde_json::from_value(value).ok()?;
        Some(render_completion_summary(&handle.label, &task))
    }

    async fn end_result(&self, reason: EndReason) -> ExecutionResult {
        let still_running = self.executors.lock().await.keys().cloned().collect();
        self.bus.emit(Event::new(EventKind::End { status: EndStatus::Completed })).await;
        ExecutionResult { reason, still_running }
    }

    /// `decompose_task` mechanics (§4.5): plan from scratch, or seed from
    /// a prior snapshot when `resume_task_id` is set, then spawn a
    /// background Executor.
    async fn decompose_task(self: Arc<Self>, description: String, resume_task_id: Option<String>) -> Result<String, OrchError> {
        let task = match resume_task_id {
            Some(old_id) => {
                let scope = Scope::Workflow(WorkflowId::from(old_id.as_str()));
                let value =
                    self.store.read(&scope, SNAPSHOT_KEY).await?.ok_or_else(|| OrchError::UnknownTask(old_id.clone()))?;
                let mut task: Task =
                    serde_json::from_value(value).map_err(|e| OrchError::Other(Box::new(e)))?;
                task.reset_incomplete_for_resume();
                task.task_id = Uuid::new_v4().simple().to_string();

                let mut retired = task.clone();
                retired.task_id = old_id.clone();
                retired.status = TaskStatus::Completed;
                let retired_value = serde_json::to_value(&retired).map_err(|e| OrchError::Other(Box::new(e)))?;
                self.store.write(&scope, SNAPSHOT_KEY, retired_value).await?;
                self.index.mark_completed(&old_id).await?;

                task
            }
            None => {
                let mut task = Task::new(Uuid::new_v4().simple().to_string(), description.clone());
                let driver = self.planner_driver_factory.create().await?;
                let workers_info = "browser, document, code, and multi_modal worker agents are available";
                task.subtasks = decompose_and_query_memory(
                    &description,
                    workers_info,
                    self.memory.as_ref(),
                    driver.as_ref(),
                    &self.bus,
                    &self.planner_config,
                )
                .await?;
                task.recompute_status();
                task
            }
        };

        let task_id = task.task_id.clone();
        self.index.record(&task_id, IndexStatus::Incomplete).await?;
        self.bus
            .emit(Event::new(EventKind::TaskDecomposed { subtask_count: task.subtasks.len() }).with_task_id(task_id.clone()))
            .await;

        let task_bus = Arc::new(
            EventBus::new(task_id.clone(), relay_bus::BusConfig::default()).map_err(|e| OrchError::Other(Box::new(e)))?,
        );
        let executor = Arc::new(
            Executor::new(task, task_bus, self.subtask_driver_factory.clone(), self.executor_config)
                .with_snapshot_store(Arc::new(StoreSnapshots(self.store.clone()))),
        );

        self.executors
            .lock()
            .await
            .insert(task_id.clone(), ExecutorHandle { label: description, executor: executor.clone(), started_at: Utc::now() });

        let ops_tx = self.ops_tx.clone();
        let spawned_task_id = task_id.clone();
        tokio::spawn(async move {
            let _ = executor.execute().await;
            let _ = ops_tx.send(OrchestratorOp::ExecutorDone(spawned_task_id));
        });

        Ok(format!("Delegated to a background executor (task `{task_id}`)."))
    }

    async fn resume_task(&self, task_id: Option<String>) -> Result<String, OrchError> {
        let task_id = match task_id {
            Some(id) => id,
            None => self.index.most_recent_incomplete().await?.ok_or(OrchError::NothingToResume)?,
        };
        let scope = Scope::Workflow(WorkflowId::from(task_id.as_str()));
        let value = self.store.read(&scope, SNAPSHOT_KEY).await?.ok_or_else(|| OrchError::UnknownTask(task_id.clone()))?;
        let task: Task = serde_json::from_value(value).map_err(|e| OrchError::Other(Box::new(e)))?;
        Ok(render_resume_summary(&task))
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), OrchError> {
        let executors = self.executors.lock().await;
        let handle = executors.get(task_id).ok_or_else(|| OrchError::UnknownTask(task_id.to_string()))?;
        handle.executor.stop().await;
        Ok(())
    }

    async fn replan_task(&self, task_id: &str, new_subtasks: Vec<Subtask>) -> Result<ReplanOutcome, OrchError> {
        let executors = self.executors.lock().await;
        let handle = executors.get(task_id).ok_or_else(|| OrchError::UnknownTask(task_id.to_string()))?;
        Ok(handle.executor.replan_subtasks(new_subtasks).await?)
    }
}

/// A cloneable front door for driving an [`Orchestrator`] from outside
/// its `run()` loop: injecting user messages, and invoking the
/// resume/cancel/replan meta-operations, which (unlike `decompose_task`)
/// need no in-loop coordination since they act on state already shared
/// via `Arc`/`Mutex`.
#[derive(Clone)]
pub struct OrchestratorHandle {
    inner: Arc<Orchestrator>,
}

impl OrchestratorHandle {
    /// Push a new user message at the running session.
    pub fn inject_message(&self, text: impl Into<String>) {
        let _ = self.inner.ops_tx.send(OrchestratorOp::UserMessage(text.into()));
    }

    /// Load a snapshot (most-recent incomplete if `task_id` is `None`)
    /// and return a human-readable summary.
    pub async fn resume_task(&self, task_id: Option<String>) -> Result<String, OrchError> {
        self.inner.resume_task(task_id).await
    }

    /// Stop a running background Executor.
    pub async fn cancel_task(&self, task_id: &str) -> Result<(), OrchError> {
        self.inner.cancel_task(task_id).await
    }

    /// Replan a running background Executor's pending subtasks.
    pub async fn replan_task(&self, task_id: &str, new_subtasks: Vec<Subtask>) -> Result<ReplanOutcome, OrchError> {
        self.inner.replan_task(task_id, new_subtasks).await
    }
}

fn find_tool_call<'a>(messages: &'a [MessageEntry], name: &str) -> Option<(&'a str, &'a serde_json::Value)> {
    messages.iter().rev().find_map(|entry| {
        entry.tool_calls().into_iter().find(|(_, call_name, _)| *call_name == name).map(|(id, _, input)| (id, input))
    })
}

fn render_system_prompt(platform: &str, workspace: &str, active_tasks_context: &str) -> String {
    format!(
        "You are the orchestrator running on {platform} at {now}.\nWorkspace: {workspace}\n\nActive background tasks:\n{active_tasks_context}",
        now = Utc::now().to_rfc3339()
    )
}

fn render_completion_summary(label: &str, task: &Task) -> String {
    let mut out = format!("[EXECUTION COMPLETE: {label}]\n");
    for subtask in task.subtasks.iter().filter(|s| s.state == SubtaskState::Done) {
        let result = subtask.result.as_deref().unwrap_or_default();
        let truncated: String = if result.chars().count() > COMPLETION_RESULT_LIMIT {
            result.chars().take(COMPLETION_RESULT_LIMIT).chain("... (truncated)".chars()).collect()
        } else {
            result.to_string()
        };
        out.push_str(&format!("- {}: {truncated}\n", subtask.id));
    }
    out
}

fn render_resume_summary(task: &Task) -> String {
    let mut out = format!("## Resuming task `{}`\n{}\n\n", task.task_id, task.user_request);
    for subtask in &task.subtasks {
        out.push_str(&format!("- `{}` [{:?}]: {}\n", subtask.id, subtask.state, subtask.content));
    }
    out
}
