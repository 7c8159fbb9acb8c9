//! End-to-end scheduler behavior: parallel dispatch, fail-fast propagation,
//! mid-flight replan, cancellation, and circular-dependency detection.

use async_trait::async_trait;
use layer0::content::ContentBlock;
use layer0::id::WorkflowId;
use relay_bus::{BusConfig, EventBus};
use relay_driver::mock::MockDriver;
use relay_driver::{AgentDriver, DriverError, DriverEvent, DriverHandle, MessageUpdateKind, StopReason};
use relay_executor::{DriverFactory, ExecError, Executor, ExecutionSummary, ExecutorConfig, SubtaskContext};
use relay_state::MemoryStore;
use relay_types::{AgentType, MessageEntry, Subtask, SubtaskState, Task};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

fn bus() -> Arc<EventBus> {
    Arc::new(EventBus::new("t1", BusConfig::default()).unwrap())
}

struct EchoFactory;

#[async_trait]
impl DriverFactory for EchoFactory {
    async fn create(&self, ctx: &SubtaskContext<'_>) -> Result<Arc<dyn AgentDriver>, ExecError> {
        Ok(Arc::new(MockDriver::single_reply(format!("done: {}", ctx.subtask.id))))
    }
}

struct AlwaysFailFactory;

#[async_trait]
impl DriverFactory for AlwaysFailFactory {
    async fn create(&self, _ctx: &SubtaskContext<'_>) -> Result<Arc<dyn AgentDriver>, ExecError> {
        Err(ExecError::Other("agent unavailable".into()))
    }
}

/// A driver whose `prompt()` blocks on a [`Notify`] until the test releases
/// it, letting tests observe and act on a subtask while it is genuinely
/// `RUNNING` rather than racing a driver that completes instantly.
struct GatedDriver {
    gate: Arc<Notify>,
    aborted: AtomicBool,
    reply: String,
}

impl GatedDriver {
    fn new(gate: Arc<Notify>, reply: impl Into<String>) -> Self {
        Self { gate, aborted: AtomicBool::new(false), reply: reply.into() }
    }
}

#[async_trait]
impl AgentDriver for GatedDriver {
    fn messages(&self) -> relay_types::AgentMessageLog {
        Vec::new()
    }

    fn system_prompt(&self) -> Option<String> {
        None
    }

    fn error(&self) -> Option<String> {
        None
    }

    async fn prompt(&self, _text: String) -> Result<(), DriverError> {
        self.gate.notified().await;
        Ok(())
    }

    async fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    fn subscribe(&self) -> DriverHandle {
        if self.aborted.load(Ordering::SeqCst) {
            let stream = async_stream::stream! {
                yield DriverEvent::TurnStart;
                yield DriverEvent::AgentEnd { messages: Vec::new(), stop_reason: StopReason::Aborted };
            };
            return DriverHandle { receiver: Box::pin(stream) };
        }
        let text = self.reply.clone();
        let messages = vec![MessageEntry::Assistant { content: vec![ContentBlock::Text { text: text.clone() }] }];
        let stream = async_stream::stream! {
            yield DriverEvent::TurnStart;
            yield DriverEvent::MessageStart;
            yield DriverEvent::MessageUpdate { kind: MessageUpdateKind::Text, delta: text };
            yield DriverEvent::MessageEnd;
            yield DriverEvent::TurnEnd;
            yield DriverEvent::AgentEnd { messages, stop_reason: StopReason::Complete };
        };
        DriverHandle { receiver: Box::pin(stream) }
    }
}

/// Dispatches `gate_ids` subtasks through a [`GatedDriver`] (held until the
/// test calls [`SelectiveGateFactory::release`]) and everything else through
/// an instant [`MockDriver`].
struct SelectiveGateFactory {
    gate_ids: HashSet<String>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl SelectiveGateFactory {
    fn new(gate_ids: impl IntoIterator<Item = &'static str>) -> Self {
        Self { gate_ids: gate_ids.into_iter().map(String::from).collect(), gates: Mutex::new(HashMap::new()) }
    }

    async fn gate_for(&self, id: &str) -> Arc<Notify> {
        self.gates.lock().await.entry(id.to_string()).or_insert_with(|| Arc::new(Notify::new())).clone()
    }

    async fn release(&self, id: &str) {
        self.gate_for(id).await.notify_waiters();
    }
}

#[async_trait]
impl DriverFactory for SelectiveGateFactory {
    async fn create(&self, ctx: &SubtaskContext<'_>) -> Result<Arc<dyn AgentDriver>, ExecError> {
        if self.gate_ids.contains(&ctx.subtask.id) {
            let gate = self.gate_for(&ctx.subtask.id).await;
            Ok(Arc::new(GatedDriver::new(gate, format!("done: {}", ctx.subtask.id))))
        } else {
            Ok(Arc::new(MockDriver::single_reply(format!("done: {}", ctx.subtask.id))))
        }
    }
}

/// A driver whose `AgentEnd` message log carries a `split_and_handoff`
/// tool call instead of plain text.
struct SplitAndHandoffDriver;

#[async_trait]
impl AgentDriver for SplitAndHandoffDriver {
    fn messages(&self) -> relay_types::AgentMessageLog {
        Vec::new()
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

    async fn abort(&self) {}

    fn subscribe(&self) -> DriverHandle {
        let messages = vec![MessageEntry::Assistant {
            content: vec![ContentBlock::ToolUse {
                id: "call-1".into(),
                name: "split_and_handoff".into(),
                input: serde_json::json!({
                    "summary": "handed off remaining work to a new subtask",
                    "subtasks": [
                        {"id": "more", "content": "keep searching the site", "agent_type": "browser"}
                    ],
                }),
            }],
        }];
        let stream = async_stream::stream! {
            yield DriverEvent::TurnStart;
            yield DriverEvent::TurnEnd;
            yield DriverEvent::AgentEnd { messages, stop_reason: StopReason::Complete };
        };
        DriverHandle { receiver: Box::pin(stream) }
    }
}

/// Triggers a `split_and_handoff` call only for `trigger_id`; every other
/// subtask (including the dynamic child it hands off) gets a plain reply,
/// so the handoff fires exactly once instead of recursing forever.
struct SplitAndHandoffFactory {
    trigger_id: &'static str,
}

#[async_trait]
impl DriverFactory for SplitAndHandoffFactory {
    async fn create(&self, ctx: &SubtaskContext<'_>) -> Result<Arc<dyn AgentDriver>, ExecError> {
        if ctx.subtask.id == self.trigger_id {
            Ok(Arc::new(SplitAndHandoffDriver))
        } else {
            Ok(Arc::new(MockDriver::single_reply(format!("done: {}", ctx.subtask.id))))
        }
    }
}

async fn wait_until_running(executor: &Arc<Executor>, subtask_id: &str, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if executor.subtask_state(subtask_id).await == Some(SubtaskState::Running) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("subtask '{subtask_id}' never reached RUNNING");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn two_independent_subtasks_run_in_parallel_and_persist_a_snapshot() {
    let mut task = Task::new("t1", "gather two pages");
    task.subtasks.push(Subtask::new("1", "visit page a", AgentType::Browser));
    task.subtasks.push(Subtask::new("2", "visit page b", AgentType::Browser));

    let store = Arc::new(MemoryStore::new());
    let executor = Arc::new(
        Executor::new(task, bus(), Arc::new(EchoFactory), ExecutorConfig::default())
            .with_snapshot_store(store.clone()),
    );

    let summary = executor.clone().execute().await.unwrap();
    assert_eq!(summary, ExecutionSummary { completed: 2, failed: 0, stopped: false, total: 2 });

    let snapshot = store.get_snapshot(&WorkflowId::from("t1")).await.unwrap();
    assert!(snapshot.is_some(), "executor should persist a snapshot on completion");
    let snapshot = snapshot.unwrap();
    assert_eq!(snapshot["status"], "completed");
}

#[tokio::test]
async fn dependency_chain_fails_fast_once_its_root_fails() {
    let mut task = Task::new("t1", "chained work");
    task.subtasks.push(Subtask::new("1", "root", AgentType::Code));
    let mut mid = Subtask::new("2", "mid", AgentType::Code);
    mid.depends_on.push("1".into());
    task.subtasks.push(mid);
    let mut leaf = Subtask::new("3", "leaf", AgentType::Code);
    leaf.depends_on.push("2".into());
    task.subtasks.push(leaf);

    let config = ExecutorConfig { max_retries: 0, ..ExecutorConfig::default() };
    let executor = Arc::new(Executor::new(task, bus(), Arc::new(AlwaysFailFactory), config));

    let summary = executor.execute().await.unwrap();
    assert_eq!(summary, ExecutionSummary { completed: 0, failed: 3, stopped: false, total: 3 });
}

#[tokio::test]
async fn circular_dependency_fails_every_subtask_in_the_cycle() {
    let mut task = Task::new("t1", "deadlock");
    let mut a = Subtask::new("a", "x", AgentType::Code);
    a.depends_on.push("b".into());
    let mut b = Subtask::new("b", "x", AgentType::Code);
    b.depends_on.push("a".into());
    task.subtasks.push(a);
    task.subtasks.push(b);

    let executor = Arc::new(Executor::new(task, bus(), Arc::new(EchoFactory), ExecutorConfig::default()));
    let summary = executor.execute().await.unwrap();
    assert_eq!(summary, ExecutionSummary { completed: 0, failed: 2, stopped: false, total: 2 });
}

#[tokio::test]
async fn replan_mid_flight_drops_the_pending_subtask_and_runs_the_replacement() {
    let mut task = Task::new("t1", "replan me");
    task.subtasks.push(Subtask::new("1", "long-running root", AgentType::Code));
    let mut blocked = Subtask::new("2", "about to be replanned away", AgentType::Code);
    blocked.depends_on.push("1".into());
    task.subtasks.push(blocked);

    let factory = Arc::new(SelectiveGateFactory::new(["1"]));
    let executor = Arc::new(Executor::new(task, bus(), factory.clone(), ExecutorConfig::default()));

    let run = tokio::spawn(executor.clone().execute());
    wait_until_running(&executor, "1", Duration::from_secs(2)).await;

    let outcome = executor.replan_subtasks(vec![Subtask::new("3", "replacement", AgentType::Code)]).await.unwrap();
    assert_eq!(outcome.removed_count, 1);
    assert_eq!(outcome.added_count, 1);

    factory.release("1").await;
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn stop_cancels_the_running_subtask_and_leaves_the_rest_pending() {
    let mut task = Task::new("t1", "abort me");
    task.subtasks.push(Subtask::new("1", "stuck forever", AgentType::Code));
    task.subtasks.push(Subtask::new("2", "independent", AgentType::Code));

    let factory = Arc::new(SelectiveGateFactory::new(["1", "2"]));
    let executor = Arc::new(Executor::new(task, bus(), factory.clone(), ExecutorConfig::default()));

    let run = tokio::spawn(executor.clone().execute());
    wait_until_running(&executor, "1", Duration::from_secs(2)).await;

    executor.stop().await;
    let summary = run.await.unwrap().unwrap();

    assert!(summary.stopped);
    assert_eq!(executor.subtask_state("1").await, Some(SubtaskState::Failed));
}

#[tokio::test]
async fn add_subtasks_inserts_new_work_immediately_after_its_parent() {
    let mut task = Task::new("t1", "dynamic insert");
    task.subtasks.push(Subtask::new("1", "parent", AgentType::Code));
    task.subtasks.push(Subtask::new("2", "tail", AgentType::Code));

    let factory = Arc::new(SelectiveGateFactory::new(["1"]));
    let executor = Arc::new(Executor::new(task, bus(), factory.clone(), ExecutorConfig::default()));

    let run = tokio::spawn(executor.clone().execute());
    wait_until_running(&executor, "1", Duration::from_secs(2)).await;

    let added = executor
        .add_subtasks(vec![Subtask::new("1_dyn_a", "split-off work", AgentType::Code)], Some("1".to_string()))
        .await
        .unwrap();
    assert_eq!(added, vec!["1_dyn_a".to_string()]);

    factory.release("1").await;
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.completed, 3);
}

#[tokio::test]
async fn split_and_handoff_inserts_a_dynamic_subtask_and_overrides_the_result() {
    let mut task = Task::new("t1", "split this up");
    task.subtasks.push(Subtask::new("1", "too big for one pass", AgentType::Browser));

    let factory = Arc::new(SplitAndHandoffFactory { trigger_id: "1" });
    let executor = Arc::new(Executor::new(task, bus(), factory, ExecutorConfig::default()));
    let summary = executor.clone().execute().await.unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.completed, 2);
    assert_eq!(executor.subtask_state("1_dyn_more").await, Some(SubtaskState::Done));
}
