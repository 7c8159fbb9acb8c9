//! The per-task browser-session id pool.
//!
//! Borrowed ids are reused across subtasks within the same task; a new one
//! is only minted when the pool is empty. Ids are opaque strings handed to
//! [`crate::DriverFactory`] and [`crate::DriverFactory::close_session`] —
//! the executor never interprets them.

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// LIFO pool of reusable session ids, scoped to one task.
pub struct SessionPool {
    task_id: String,
    stack: Mutex<Vec<String>>,
}

impl SessionPool {
    /// Create an empty pool for the given task id.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self { task_id: task_id.into(), stack: Mutex::new(Vec::new()) }
    }

    /// Pop a reusable id, minting a fresh `{task_id}_par_{timestamp}_{rand}`
    /// one if the pool is empty.
    pub async fn borrow(&self) -> String {
        let mut stack = self.stack.lock().await;
        stack.pop().unwrap_or_else(|| {
            format!("{}_par_{}_{}", self.task_id, Utc::now().timestamp_millis(), Uuid::new_v4().simple())
        })
    }

    /// Return a borrowed id to the pool for reuse.
    pub async fn release(&self, id: String) {
        self.stack.lock().await.push(id);
    }

    /// Drain every pooled id, leaving the pool empty. Called once at
    /// `execute()` exit so each id's external session can be closed.
    pub async fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.stack.lock().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn borrow_mints_a_fresh_id_when_empty() {
        let pool = SessionPool::new("t1");
        let id = pool.borrow().await;
        assert!(id.starts_with("t1_par_"));
    }

    #[tokio::test]
    async fn released_ids_are_reused_before_minting() {
        let pool = SessionPool::new("t1");
        let id = pool.borrow().await;
        pool.release(id.clone()).await;
        let reused = pool.borrow().await;
        assert_eq!(id, reused);
    }

    #[tokio::test]
    async fn drain_empties_the_pool() {
        let pool = SessionPool::new("t1");
        pool.release("a".into()).await;
        pool.release("b".into()).await;
        let drained = pool.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(pool.drain().await.is_empty());
    }
}
