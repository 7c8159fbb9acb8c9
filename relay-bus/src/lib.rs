#![deny(missing_docs)]
//! The SSE event bus: a bounded, single-producer-per-task queue of typed
//! [`relay_types::Event`]s with drop-oldest overflow and direct hand-off
//! to a waiting consumer.
//!
//! Built on `tokio::sync` primitives: a `Mutex`-guarded queue plus a
//! registry of `oneshot` waiters, one per pending `next()` call.

use relay_types::Event;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

/// Errors constructing or operating a bus.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BusError {
    /// `BusConfig::capacity` was zero; a zero-capacity bus can never hold
    /// an event for a consumer to receive.
    #[error("bus capacity must be greater than zero")]
    InvalidCapacity,

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Bus construction parameters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BusConfig {
    /// Maximum number of queued, undelivered events before the oldest is
    /// dropped to make room for a new one.
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

struct Inner {
    queue: VecDeque<Event>,
    waiters: VecDeque<oneshot::Sender<Option<Event>>>,
    closed: bool,
}

/// Single-producer-per-task, single-consumer bounded event queue.
///
/// `emit` never blocks and never fails from the producer's perspective —
/// overflow silently drops the oldest queued event (and logs a warning).
/// `next` blocks up to a timeout, returning `None` on timeout or after
/// `close()`.
pub struct EventBus {
    task_id: String,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl EventBus {
    /// Create a new bus for the given task id.
    pub fn new(task_id: impl Into<String>, config: BusConfig) -> Result<Self, BusError> {
        if config.capacity == 0 {
            return Err(BusError::InvalidCapacity);
        }
        Ok(Self {
            task_id: task_id.into(),
            capacity: config.capacity,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                waiters: VecDeque::new(),
                closed: false,
            }),
        })
    }

    /// Emit an event. Stamps `task_id`/`timestamp` if absent, hands off
    /// directly to a waiting consumer if one exists, otherwise enqueues —
    /// dropping the oldest queued event first if that would overflow
    /// `capacity`. A no-op after `close()`.
    pub async fn emit(&self, mut event: Event) {
        event.stamp(&self.task_id, chrono::Utc::now());

        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }

        let mut pending = Some(event);
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(pending.take().expect("pending set on every loop entry")) {
                Ok(()) => return,
                Err(returned) => pending = Some(returned),
            }
        }

        let event = pending.expect("loop only exits via return or with pending restored");
        inner.queue.push_back(event);
        if inner.queue.len() > self.capacity {
            if let Some(dropped) = inner.queue.pop_front() {
                tracing::warn!(action = dropped.action(), "event bus overflow, dropping oldest event");
            }
        }
    }

    /// Wait up to `timeout` for the next event. Returns `None` on timeout
    /// or once the bus has been closed; otherwise returns the oldest
    /// queued (or directly handed-off) event.
    pub async fn next(&self, timeout: Duration) -> Option<Event> {
        let receiver = {
            let mut inner = self.inner.lock().await;
            if let Some(event) = inner.queue.pop_front() {
                return Some(event);
            }
            if inner.closed {
                return None;
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            rx
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(event)) => event,
            Ok(Err(_)) => None,
            Err(_) => None,
        }
    }

    /// Close the bus. Idempotent. Wakes every pending consumer with
    /// `None`; subsequent `emit` calls become no-ops.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        inner.closed = true;
        while let Some(waiter) = inner.waiters.pop_front() {
            let _ = waiter.send(None);
        }
    }
}
