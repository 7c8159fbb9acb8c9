#![deny(missing_docs)]
//! Snapshot store abstraction and backends for relay.
//!
//! A task and its subtasks are persisted as a single JSON snapshot,
//! replaced wholesale on each mutation (last-writer-wins, per the core's
//! durability guarantee). [`SnapshotStore`] is a thin specialization of
//! [`layer0::state::StateStore`]: every store is blanket-implemented as a
//! snapshot store, namespaced by `Scope::Workflow(task_id)` and a single
//! well-known key. Swapping the backend (in-memory vs filesystem) never
//! changes how the core talks to it.

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use layer0::effect::Scope;
use layer0::error::StateError;
use layer0::id::WorkflowId;
use layer0::state::StateStore;

/// The key a task snapshot is stored under within its workflow scope.
pub const SNAPSHOT_KEY: &str = "snapshot";

/// Persists and retrieves whole-task snapshots, keyed by task id.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a task snapshot, replacing any prior snapshot for the same id.
    async fn put_snapshot(
        &self,
        task_id: &WorkflowId,
        snapshot: serde_json::Value,
    ) -> Result<(), StateError>;

    /// Load the most recent snapshot for a task, if one exists.
    async fn get_snapshot(
        &self,
        task_id: &WorkflowId,
    ) -> Result<Option<serde_json::Value>, StateError>;

    /// Remove a task's snapshot.
    async fn delete_snapshot(&self, task_id: &WorkflowId) -> Result<(), StateError>;
}

#[async_trait]
impl<T: StateStore> SnapshotStore for T {
    async fn put_snapshot(
        &self,
        task_id: &WorkflowId,
        snapshot: serde_json::Value,
    ) -> Result<(), StateError> {
        self.write(&Scope::Workflow(task_id.clone()), SNAPSHOT_KEY, snapshot)
            .await
    }

    async fn get_snapshot(
        &self,
        task_id: &WorkflowId,
    ) -> Result<Option<serde_json::Value>, StateError> {
        self.read(&Scope::Workflow(task_id.clone()), SNAPSHOT_KEY)
            .await
    }

    async fn delete_snapshot(&self, task_id: &WorkflowId) -> Result<(), StateError> {
        self.delete(&Scope::Workflow(task_id.clone()), SNAPSHOT_KEY)
            .await
    }
}
