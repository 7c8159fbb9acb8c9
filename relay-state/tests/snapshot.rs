use layer0::id::WorkflowId;
use relay_state::{MemoryStore, SnapshotStore};
use serde_json::json;

#[tokio::test]
async fn put_then_get_roundtrips() {
    let store = MemoryStore::new();
    let task_id = WorkflowId::new("task-1");
    let snapshot = json!({"task_id": "task-1", "status": "running", "subtasks": []});

    store.put_snapshot(&task_id, snapshot.clone()).await.unwrap();
    let loaded = store.get_snapshot(&task_id).await.unwrap();
    assert_eq!(loaded, Some(snapshot));
}

#[tokio::test]
async fn get_missing_returns_none() {
    let store = MemoryStore::new();
    let task_id = WorkflowId::new("missing");
    assert_eq!(store.get_snapshot(&task_id).await.unwrap(), None);
}

#[tokio::test]
async fn put_replaces_prior_snapshot() {
    let store = MemoryStore::new();
    let task_id = WorkflowId::new("task-1");

    store
        .put_snapshot(&task_id, json!({"status": "running"}))
        .await
        .unwrap();
    store
        .put_snapshot(&task_id, json!({"status": "completed"}))
        .await
        .unwrap();

    let loaded = store.get_snapshot(&task_id).await.unwrap();
    assert_eq!(loaded, Some(json!({"status": "completed"})));
}

#[tokio::test]
async fn delete_removes_snapshot() {
    let store = MemoryStore::new();
    let task_id = WorkflowId::new("task-1");

    store.put_snapshot(&task_id, json!({"status": "running"})).await.unwrap();
    store.delete_snapshot(&task_id).await.unwrap();
    assert_eq!(store.get_snapshot(&task_id).await.unwrap(), None);
}

#[tokio::test]
async fn different_tasks_are_isolated() {
    let store = MemoryStore::new();
    let t1 = WorkflowId::new("t1");
    let t2 = WorkflowId::new("t2");

    store.put_snapshot(&t1, json!({"task_id": "t1"})).await.unwrap();
    store.put_snapshot(&t2, json!({"task_id": "t2"})).await.unwrap();

    assert_eq!(store.get_snapshot(&t1).await.unwrap(), Some(json!({"task_id": "t1"})));
    assert_eq!(store.get_snapshot(&t2).await.unwrap(), Some(json!({"task_id": "t2"})));
}
