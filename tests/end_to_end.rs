//! Workspace-level integration tests: these exercise how the crates
//! compose, not any single crate's internals. Each test drives at least
//! two `relay-*` crates together through their public APIs.

use async_trait::async_trait;
use layer0::content::ContentBlock;
use layer0::id::WorkflowId;
use relay_bus::{BusConfig, EventBus};
use relay_collector::{collect, ToolCallRecord};
use relay_driver::mock::MockDriver;
use relay_driver::AgentDriver;
use relay_executor::{DriverFactory, ExecError, Executor, ExecutionSummary, ExecutorConfig, SubtaskContext};
use relay_state::{MemoryStore, SnapshotStore};
use relay_types::{AgentType, MessageEntry, Subtask, Task};
use std::sync::Arc;

struct EchoFactory;

#[async_trait]
impl DriverFactory for EchoFactory {
    async fn create(&self, ctx: &SubtaskContext<'_>) -> Result<Arc<dyn AgentDriver>, ExecError> {
        Ok(Arc::new(MockDriver::single_reply(format!("done: {}", ctx.subtask.id))))
    }
}

/// Executor + event bus + snapshot store, composed the way a real task
/// run wires them: two independent browser subtasks complete, and the
/// persisted snapshot reflects the recovery rule a resume would apply
/// (DONE subtasks keep their result, status flips to completed).
#[tokio::test]
async fn two_independent_subtasks_complete_and_persist_a_resumable_snapshot() {
    let mut task = Task::new("t1", "gather two pages");
    task.subtasks.push(Subtask::new("1", "visit page a", AgentType::Browser));
    task.subtasks.push(Subtask::new("2", "visit page b", AgentType::Browser));

    let bus = Arc::new(EventBus::new("t1", BusConfig::default()).unwrap());
    let store = Arc::new(MemoryStore::new());
    let executor = Arc::new(
        Executor::new(task, bus, Arc::new(EchoFactory), ExecutorConfig::default())
            .with_snapshot_store(store.clone()),
    );

    let summary = executor.execute().await.unwrap();
    assert_eq!(summary, ExecutionSummary { completed: 2, failed: 0, stopped: false, total: 2 });

    let snapshot = store.get_snapshot(&WorkflowId::from("t1")).await.unwrap().unwrap();
    assert_eq!(snapshot["status"], "completed");
    let subtasks = snapshot["subtasks"].as_array().unwrap();
    assert!(subtasks.iter().all(|s| s["state"] == "DONE"));
    assert!(subtasks.iter().all(|s| s["result"].is_string()));
}

/// The Collector walks an agent message log independent of how it was
/// produced — here a hand-built log rather than one the Bridge/Executor
/// actually drove, confirming the two components only share the wire
/// shape, not any runtime coupling.
#[tokio::test]
async fn collector_turns_a_tool_call_into_a_learning_record() {
    let log: Vec<MessageEntry> = vec![
        MessageEntry::Assistant {
            content: vec![
                ContentBlock::Text { text: "I should check the page first".into() },
                ContentBlock::ToolUse {
                    id: "call-1".into(),
                    name: "browser_visit_page".into(),
                    input: serde_json::json!({"url": "https://example.com", "extra": "drop-me"}),
                },
            ],
        },
        MessageEntry::ToolResult {
            tool_call_id: "call-1".into(),
            content: "URL: **https://example.com**\nLoaded fine".into(),
            is_error: false,
        },
        MessageEntry::Assistant { content: vec![ContentBlock::Text { text: "page loaded, moving on".into() }] },
    ];

    let records: Vec<ToolCallRecord> = collect(&log);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.tool_name, "browser_visit_page");
    assert!(record.success);
    assert!(record.input_summary.contains("https://example.com"));
    assert!(!record.input_summary.contains("drop-me"));
    assert_eq!(record.judgment.as_deref(), Some("page loaded, moving on"));
    assert_eq!(record.current_url, "https://example.com");
}
