//! Cross-task index of incomplete work, keyed in `Scope::Global`.
//!
//! [`relay_state::SnapshotStore`] is deliberately scoped per task —
//! `layer0::state::StateStore::list` only enumerates keys *within* one
//! `Scope`, so nothing in `relay-state` can answer "what's the most
//! recent incomplete task?" across every task id. This index fills that
//! gap with its own well-known prefix in the store's global scope,
//! written alongside (never instead of) each task's snapshot.

use chrono::{DateTime, Utc};
use layer0::effect::Scope;
use layer0::error::StateError;
use layer0::state::StateStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const INDEX_PREFIX: &str = "task_index:";

/// A task's last-known status, as recorded in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// Still has incomplete subtasks (or has not been decomposed yet).
    Incomplete,
    /// Every subtask reached a terminal state, or the entry was
    /// explicitly retired (e.g. after a resume re-seeded its work under
    /// a new task id).
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    task_id: String,
    status: IndexStatus,
    updated_at: DateTime<Utc>,
}

/// Tracks which tasks have incomplete work, so the Orchestrator can
/// answer "resume the most recent incomplete task" without scanning
/// every workflow scope in the store.
pub struct TaskIndex {
    store: Arc<dyn StateStore>,
}

impl TaskIndex {
    /// Wrap a store for index bookkeeping. Shares the same backend as
    /// task snapshots; the index lives in `Scope::Global` so it never
    /// collides with a task's own `Scope::Workflow` data.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    fn key(task_id: &str) -> String {
        format!("{INDEX_PREFIX}{task_id}")
    }

    /// Record (or update) a task's status.
    pub async fn record(&self, task_id: &str, status: IndexStatus) -> Result<(), StateError> {
        let entry = IndexEntry { task_id: task_id.to_string(), status, updated_at: Utc::now() };
        let value = serde_json::to_value(&entry).map_err(|e| StateError::Serialization(e.to_string()))?;
        self.store.write(&Scope::Global, &Self::key(task_id), value).await
    }

    /// Mark a task completed/retired so it no longer surfaces as the
    /// most recent incomplete task (used after a resume re-seeds its
    /// work under a fresh task id, per the "rewritten as completed"
    /// resume rule).
    pub async fn mark_completed(&self, task_id: &str) -> Result<(), StateError> {
        self.record(task_id, IndexStatus::Completed).await
    }

    /// The most recently updated task still marked incomplete, if any.
    pub async fn most_recent_incomplete(&self) -> Result<Option<String>, StateError> {
        let keys = self.store.list(&Scope::Global, INDEX_PREFIX).await?;
        let mut best: Option<IndexEntry> = None;
        for key in keys {
            let Some(value) = self.store.read(&Scope::Global, &key).await? else { continue };
            let Ok(entry) = serde_json::from_value::<IndexEntry>(value) else { continue };
            if entry.status != IndexStatus::Incomplete {
                continue;
            }
            if best.as_ref().is_none_or(|b| entry.updated_at > b.updated_at) {
                best = Some(entry);
            }
        }
        Ok(best.map(|e| e.task_id))
    }
}
