use relay_bus::{BusConfig, EventBus};
use relay_types::{Event, EventKind};
use std::time::Duration;

fn heartbeat() -> Event {
    Event::new(EventKind::Heartbeat)
}

#[tokio::test]
async fn emit_then_next_roundtrips() {
    let bus = EventBus::new("t1", BusConfig::default()).unwrap();
    bus.emit(heartbeat()).await;
    let event = bus.next(Duration::from_millis(100)).await.unwrap();
    assert_eq!(event.action(), "heartbeat");
    assert_eq!(event.task_id.as_deref(), Some("t1"));
}

#[tokio::test]
async fn next_times_out_on_empty_bus() {
    let bus = EventBus::new("t1", BusConfig::default()).unwrap();
    let result = bus.next(Duration::from_millis(20)).await;
    assert!(result.is_none());
}

#[tokio::test]
async fn fifo_order_preserved() {
    let bus = EventBus::new("t1", BusConfig::default()).unwrap();
    bus.emit(Event::new(EventKind::TaskStarted)).await;
    bus.emit(Event::new(EventKind::PlanStarted)).await;

    let first = bus.next(Duration::from_millis(100)).await.unwrap();
    let second = bus.next(Duration::from_millis(100)).await.unwrap();
    assert_eq!(first.action(), "task_started");
    assert_eq!(second.action(), "plan_started");
}

#[tokio::test]
async fn overflow_drops_oldest() {
    let bus = EventBus::new("t1", BusConfig { capacity: 2 }).unwrap();
    bus.emit(Event::new(EventKind::TaskStarted)).await;
    bus.emit(Event::new(EventKind::PlanStarted)).await;
    bus.emit(Event::new(EventKind::Connected)).await;

    // TaskStarted should have been dropped; PlanStarted survives.
    let first = bus.next(Duration::from_millis(100)).await.unwrap();
    assert_eq!(first.action(), "plan_started");
    let second = bus.next(Duration::from_millis(100)).await.unwrap();
    assert_eq!(second.action(), "connected");
}

#[tokio::test]
async fn waiting_consumer_receives_direct_handoff() {
    let bus = std::sync::Arc::new(EventBus::new("t1", BusConfig::default()).unwrap());
    let consumer_bus = bus.clone();

    let consumer = tokio::spawn(async move { consumer_bus.next(Duration::from_secs(2)).await });

    // give the consumer a moment to start waiting
    tokio::time::sleep(Duration::from_millis(20)).await;
    bus.emit(heartbeat()).await;

    let received = consumer.await.unwrap();
    assert_eq!(received.unwrap().action(), "heartbeat");
}

#[tokio::test]
async fn close_wakes_pending_consumer_with_none() {
    let bus = std::sync::Arc::new(EventBus::new("t1", BusConfig::default()).unwrap());
    let consumer_bus = bus.clone();

    let consumer = tokio::spawn(async move { consumer_bus.next(Duration::from_secs(2)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    bus.close().await;

    let received = consumer.await.unwrap();
    assert!(received.is_none());
}

#[tokio::test]
async fn close_is_idempotent() {
    let bus = EventBus::new("t1", BusConfig::default()).unwrap();
    bus.close().await;
    bus.close().await;
}

#[tokio::test]
async fn emit_after_close_is_noop() {
    let bus = EventBus::new("t1", BusConfig::default()).unwrap();
    bus.close().await;
    bus.emit(heartbeat()).await;
    assert!(bus.next(Duration::from_millis(20)).await.is_none());
}

#[tokio::test]
async fn zero_capacity_is_rejected() {
    let result = EventBus::new("t1", BusConfig { capacity: 0 });
    assert!(result.is_err());
}

#[tokio::test]
async fn timeout_then_emit_still_delivers() {
    let bus = EventBus::new("t1", BusConfig::default()).unwrap();
    assert!(bus.next(Duration::from_millis(10)).await.is_none());

    bus.emit(heartbeat()).await;
    let event = bus.next(Duration::from_millis(100)).await.unwrap();
    assert_eq!(event.action(), "heartbeat");
}
