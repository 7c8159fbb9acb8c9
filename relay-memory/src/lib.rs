#![deny(missing_docs)]
//! The Memory service client the Task Planner consumes for Memory-First
//! decomposition (§4.3). Out of scope here: the service's own storage or
//! retrieval logic — only the wire-level contract and the shaping the
//! Planner needs (level classification, prompt-context formatting).

#[cfg(feature = "test-utils")]
pub mod mock;

use async_trait::async_trait;
use relay_types::MemoryLevel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors calling the memory service.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The service call did not complete in time. Planner-visible timeouts
    /// are non-fatal — callers recover with an empty plan.
    #[error("memory service call timed out")]
    Timeout,

    /// The service rejected or failed the call.
    #[error("memory service call failed: {0}")]
    CallFailed(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Where a decomposition step's guidance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    /// Backed by a known, previously recorded phrase/workflow.
    Phrase,
    /// Backed by graph-derived guidance with no single matching phrase.
    Graph,
    /// No backing memory for this step.
    None,
}

/// One step of guidance the memory service attaches to a planned task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryStep {
    /// The step's position in the plan.
    pub index: usize,
    /// The step's guidance text.
    pub content: String,
    /// Where this guidance came from.
    pub source: MemorySource,
    /// The matched phrase's id, present only when `source == Phrase`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phrase_id: Option<String>,
    /// Detailed historical workflow text, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_guide: Option<String>,
}

/// The memory service's response to `planTask`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryPlan {
    /// Ordered guidance steps; empty when the service found nothing.
    pub steps: Vec<MemoryStep>,
    /// Free-form user/workflow preferences to respect during execution.
    pub preferences: Vec<String>,
    /// The service's self-reported confidence in plan coverage, `[0.0, 1.0]`.
    pub coverage: f64,
}

impl MemoryPlan {
    /// Classify this plan's confidence tier per the Planner's rule: a
    /// phrase-backed step (with a `phrase_id`) wins L1 outright; any steps
    /// at all (even ungrounded ones) earn L2; no steps is L3.
    pub fn classify_level(&self) -> MemoryLevel {
        let has_phrase_match = self
            .steps
            .iter()
            .any(|s| s.source == MemorySource::Phrase && s.phrase_id.is_some());
        if has_phrase_match {
            MemoryLevel::L1
        } else if !self.steps.is_empty() {
            MemoryLevel::L2
        } else {
            MemoryLevel::L3
        }
    }

    /// Render this plan as the single context block substituted into the
    /// decomposition prompt template: one line per step tagged with its
    /// source, indented `workflow_guide` lines beneath, preferences
    /// listed at the tail. An empty plan renders as an empty string.
    pub fn format_context(&self) -> String {
        if self.steps.is_empty() && self.preferences.is_empty() {
            return String::new();
        }

        let mut out = String::new();
        for step in &self.steps {
            let tag = match step.source {
                MemorySource::Phrase => "phrase",
                MemorySource::Graph => "graph",
                MemorySource::None => "none",
            };
            out.push_str(&format!("[{tag}] {}\n", step.content));
            if let Some(guide) = &step.workflow_guide {
                for line in guide.lines() {
                    out.push_str("  ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        if !self.preferences.is_empty() {
            out.push_str("Preferences:\n");
            for pref in &self.preferences {
                out.push_str("- ");
                out.push_str(pref);
                out.push('\n');
            }
        }
        out
    }
}

/// The external memory service, as consumed by the Task Planner.
#[async_trait]
pub trait MemoryClient: Send + Sync {
    /// Query prior workflow/phrase guidance for a task's free-form text.
    async fn plan_task(&self, text: &str) -> Result<MemoryPlan, MemoryError>;

    /// Record operations observed during a session (e.g. delegation
    /// decisions) for later retrieval.
    async fn memory_add(
        &self,
        operations: serde_json::Value,
        session_id: Option<String>,
    ) -> Result<serde_json::Value, MemoryError>;

    /// Feed a completed execution's data back for learning.
    async fn memory_learn(&self, execution_data: serde_json::Value) -> Result<serde_json::Value, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(source: MemorySource, phrase_id: Option<&str>) -> MemoryStep {
        MemoryStep {
            index: 0,
            content: "open the dashboard".into(),
            source,
            phrase_id: phrase_id.map(String::from),
            workflow_guide: None,
        }
    }

    #[test]
    fn classify_level_phrase_backed_is_l1() {
        let plan = MemoryPlan { steps: vec![step(MemorySource::Phrase, Some("p1"))], ..Default::default() };
        assert_eq!(plan.classify_level(), MemoryLevel::L1);
    }

    #[test]
    fn classify_level_phrase_without_id_is_l2() {
        let plan = MemoryPlan { steps: vec![step(MemorySource::Phrase, None)], ..Default::default() };
        assert_eq!(plan.classify_level(), MemoryLevel::L2);
    }

    #[test]
    fn classify_level_graph_only_is_l2() {
        let plan = MemoryPlan { steps: vec![step(MemorySource::Graph, None)], ..Default::default() };
        assert_eq!(plan.classify_level(), MemoryLevel::L2);
    }

    #[test]
    fn classify_level_empty_is_l3() {
        assert_eq!(MemoryPlan::default().classify_level(), MemoryLevel::L3);
    }

    #[test]
    fn format_context_empty_plan_is_empty_string() {
        assert_eq!(MemoryPlan::default().format_context(), "");
    }

    #[test]
    fn format_context_includes_tag_guide_and_preferences() {
        let plan = MemoryPlan {
            steps: vec![MemoryStep {
                index: 0,
                content: "navigate to settings".into(),
                source: MemorySource::Phrase,
                phrase_id: Some("p1".into()),
                workflow_guide: Some("click gear icon\nselect billing".into()),
            }],
            preferences: vec!["prefer dark mode".into()],
            coverage: 0.9,
        };
        let ctx = plan.format_context();
        assert!(ctx.contains("[phrase] navigate to settings"));
        assert!(ctx.contains("  click gear icon"));
        assert!(ctx.contains("  select billing"));
        assert!(ctx.contains("Preferences:"));
        assert!(ctx.contains("- prefer dark mode"));
    }
}
