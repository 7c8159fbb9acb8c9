//! A scripted [`MemoryClient`] for exercising the Planner without a real
//! memory service in the loop.

use crate::{MemoryClient, MemoryError, MemoryPlan};
use async_trait::async_trait;

/// Returns a fixed plan (or a fixed failure) on every `plan_task` call,
/// ignoring the query text.
pub struct MockMemoryClient {
    plan: Result<MemoryPlan, ()>,
}

impl MockMemoryClient {
    /// A client that always returns `plan`.
    pub fn returning(plan: MemoryPlan) -> Self {
        Self { plan: Ok(plan) }
    }

    /// A client whose `plan_task` always times out.
    pub fn timing_out() -> Self {
        Self { plan: Err(()) }
    }
}

#[async_trait]
impl MemoryClient for MockMemoryClient {
    async fn plan_task(&self, _text: &str) -> Result<MemoryPlan, MemoryError> {
        self.plan.clone().map_err(|()| MemoryError::Timeout)
    }

    async fn memory_add(
        &self,
        _operations: serde_json::Value,
        _session_id: Option<String>,
    ) -> Result<serde_json::Value, MemoryError> {
        Ok(serde_json::json!({"status": "recorded"}))
    }

    async fn memory_learn(&self, _execution_data: serde_json::Value) -> Result<serde_json::Value, MemoryError> {
        Ok(serde_json::json!({"status": "learned"}))
    }
}
