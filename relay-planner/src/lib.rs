#![deny(missing_docs)]
//! Memory-first task decomposition: turns a free-form user request into
//! an ordered dependency DAG of [`Subtask`]s.
//!
//! Queries the memory service first (§4.3), folds whatever it returns
//! into the decomposition prompt, then parses the agent's response with
//! a primary parser and two fallbacks, trying each in turn until one
//! succeeds.

mod parse;
mod prompt;

pub use parse::{into_subtasks, parse_attributed, parse_bare, parse_json_subtasks, RawSubtask};
pub use prompt::{render as render_prompt, DEFAULT_TEMPLATE};

use futures::StreamExt;
use relay_bus::EventBus;
use relay_driver::{AgentDriver, DriverError, DriverEvent};
use relay_memory::{MemoryClient, MemoryPlan};
use relay_types::{concat_final_assistant_text, Event, EventKind, MemoryLevel, Subtask};
use std::time::Duration;
use thiserror::Error;

/// Errors from task decomposition.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PlanError {
    /// The memory service timed out. Recovered internally — the Planner
    /// proceeds with an empty memory context — so callers only see this
    /// if they inspect logs; it is not returned from
    /// [`decompose_and_query_memory`].
    #[error("memory service call timed out")]
    MemoryTimeout,

    /// None of the three parsers could extract subtasks from the
    /// decomposition agent's response. Fatal: no retry.
    #[error("failed to parse decomposition output: {0}")]
    ParseFailed(String),

    /// The agent driver itself failed.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Tunables for one decomposition call.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// How long to wait for the memory service before proceeding with an
    /// empty context.
    pub memory_timeout: Duration,
    /// The decomposition prompt template; see [`DEFAULT_TEMPLATE`].
    pub template: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { memory_timeout: Duration::from_secs(5), template: DEFAULT_TEMPLATE.to_string() }
    }
}

fn memory_level_report(level: MemoryLevel) -> &'static str {
    match level {
        MemoryLevel::L1 => "Found an exact workflow match in memory.",
        MemoryLevel::L2 => "Found partial guidance in memory.",
        MemoryLevel::L3 => "No relevant memory found; planning from scratch.",
    }
}

/// Decompose `task_text` into an ordered list of subtasks, consulting
/// `memory` first and driving `driver` (a freshly created agent with an
/// empty tool set) to produce the decomposition itself.
///
/// `bus` receives `decompose_progress`, `memory_level`, `memory_result`,
/// and `agent_report` events as the call proceeds.
pub async fn decompose_and_query_memory(
    task_text: &str,
    workers_info: &str,
    memory: &dyn MemoryClient,
    driver: &dyn AgentDriver,
    bus: &EventBus,
    config: &PlannerConfig,
) -> Result<Vec<Subtask>, PlanError> {
    bus.emit(Event::new(EventKind::DecomposeProgress {
        progress: 0.1,
        message: Some("Querying memory...".to_string()),
        is_final: false,
        sub_tasks: None,
    }))
    .await;

    let memory_plan = match tokio::time::timeout(config.memory_timeout, memory.plan_task(task_text)).await {
        Ok(Ok(plan)) => plan,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "memory service call failed, proceeding without memory context");
            MemoryPlan::default()
        }
        Err(_elapsed) => {
            tracing::warn!("memory service call timed out, proceeding without memory context");
            bus.emit(Event::new(EventKind::AgentReport {
                report_type: "warning".to_string(),
                message: "Memory service timed out; proceeding without memory context".to_string(),
            }))
            .await;
            MemoryPlan::default()
        }
    };

    bus.emit(Event::new(EventKind::MemoryResult { found: !memory_plan.steps.is_empty() })).await;

    let level = memory_plan.classify_level();
    bus.emit(Event::new(EventKind::MemoryLevel { level })).await;
    bus.emit(Event::new(EventKind::AgentReport {
        report_type: "memory_level".to_string(),
        message: memory_level_report(level).to_string(),
    }))
    .await;

    bus.emit(Event::new(EventKind::DecomposeProgress {
        progress: 0.3,
        message: Some("Analyzing task...".to_string()),
        is_final: false,
        sub_tasks: None,
    }))
    .await;

    let memory_context = memory_plan.format_context();
    let rendered = prompt::render(&config.template, workers_info, &memory_context, task_text);

    driver.prompt(rendered).await?;
    let mut handle = driver.subscribe();
    let mut final_messages = None;
    while let Some(event) = handle.receiver.next().await {
        if let DriverEvent::AgentEnd { messages, .. } = event {
            final_messages = Some(messages);
            break;
        }
    }
    let messages = final_messages
        .ok_or_else(|| PlanError::ParseFailed("driver stream ended without an agent_end event".to_string()))?;
    let text = concat_final_assistant_text(&messages)
        .ok_or_else(|| PlanError::ParseFailed("decomposition agent produced no text response".to_string()))?;

    bus.emit(Event::new(EventKind::DecomposeProgress {
        progress: 0.8,
        message: None,
        is_final: false,
        sub_tasks: None,
    }))
    .await;

    let raw = parse::parse_attributed(&text)
        .or_else(|| parse::parse_bare(&text))
        .or_else(|| parse::parse_json_subtasks(&text))
        .ok_or_else(|| PlanError::ParseFailed("no parser could extract subtasks from the response".to_string()))?;
    let subtasks = parse::into_subtasks(raw, level);

    bus.emit(Event::new(EventKind::DecomposeProgress {
        progress: 1.0,
        message: None,
        is_final: true,
        sub_tasks: Some(subtasks.clone()),
    }))
    .await;

    Ok(subtasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_bus::BusConfig;
    use relay_driver::mock::MockDriver;
    use relay_memory::mock::MockMemoryClient;
    use relay_memory::{MemorySource, MemoryStep};
    use std::time::Duration as StdDuration;

    fn bus() -> EventBus {
        EventBus::new("t1", BusConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn decomposes_using_attributed_parser() {
        let driver = MockDriver::single_reply(
            r#"<tasks><task id="1" type="browser" depends_on="">open the site</task></tasks>"#,
        );
        let memory = MockMemoryClient::returning(MemoryPlan::default());
        let bus = bus();
        let config = PlannerConfig::default();

        let subtasks = decompose_and_query_memory("open the site", "browser, code", &memory, &driver, &bus, &config)
            .await
            .unwrap();

        assert_eq!(subtasks.len(), 1);
        assert_eq!(subtasks[0].id, "1");
        assert_eq!(subtasks[0].memory_level, MemoryLevel::L3);
    }

    #[tokio::test]
    async fn falls_back_to_json_parser_when_xml_absent() {
        let driver = MockDriver::single_reply(
            r#"I couldn't format XML, here: {"subtasks": [{"id": "1", "content": "write report", "type": "document", "depends_on": []}]}"#,
        );
        let memory = MockMemoryClient::returning(MemoryPlan::default());
        let bus = bus();
        let config = PlannerConfig::default();

        let subtasks = decompose_and_query_memory("write a report", "doc", &memory, &driver, &bus, &config)
            .await
            .unwrap();
        assert_eq!(subtasks[0].content, "write report");
    }

    #[tokio::test]
    async fn unparseable_response_fails_the_call() {
        let driver = MockDriver::single_reply("no structured output at all");
        let memory = MockMemoryClient::returning(MemoryPlan::default());
        let bus = bus();
        let config = PlannerConfig::default();

        let err = decompose_and_query_memory("do something", "browser", &memory, &driver, &bus, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::ParseFailed(_)));
    }

    #[tokio::test]
    async fn memory_timeout_is_recovered_with_empty_context() {
        let driver = MockDriver::single_reply(r#"<tasks><task id="1" type="code">x</task></tasks>"#);
        let memory = MockMemoryClient::timing_out();
        let bus = bus();
        let config = PlannerConfig { memory_timeout: StdDuration::from_millis(1), ..Default::default() };

        let subtasks = decompose_and_query_memory("x", "code", &memory, &driver, &bus, &config).await.unwrap();
        assert_eq!(subtasks[0].memory_level, MemoryLevel::L3);
    }

    #[tokio::test]
    async fn phrase_backed_memory_tags_subtasks_l1() {
        let driver = MockDriver::single_reply(r#"<tasks><task id="1" type="code">x</task></tasks>"#);
        let plan = MemoryPlan {
            steps: vec![MemoryStep {
                index: 0,
                content: "prior run".into(),
                source: MemorySource::Phrase,
                phrase_id: Some("p1".into()),
                workflow_guide: None,
            }],
            preferences: vec![],
            coverage: 1.0,
        };
        let memory = MockMemoryClient::returning(plan);
        let bus = bus();
        let config = PlannerConfig::default();

        let subtasks = decompose_and_query_memory("x", "code", &memory, &driver, &bus, &config).await.unwrap();
        assert_eq!(subtasks[0].memory_level, MemoryLevel::L1);
    }
}
