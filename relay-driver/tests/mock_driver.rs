#![cfg(feature = "test-utils")]

use futures::StreamExt;
use relay_driver::mock::MockDriver;
use relay_driver::{AgentDriver, DriverEvent, MessageUpdateKind};
use std::sync::Arc;

#[tokio::test]
async fn usable_as_dyn_agent_driver() {
    let driver: Arc<dyn AgentDriver> = Arc::new(MockDriver::single_reply("hi"));
    driver.prompt("hello".into()).await.unwrap();
    assert!(driver.messages().is_empty());
}

#[tokio::test]
async fn stream_yields_text_delta_matching_script() {
    let driver = MockDriver::single_reply("the answer is 4");
    let mut handle = driver.subscribe();

    let mut deltas = Vec::new();
    while let Some(event) = handle.receiver.next().await {
        if let DriverEvent::MessageUpdate { kind: MessageUpdateKind::Text, delta } = event {
            deltas.push(delta);
        }
    }
    assert_eq!(deltas, vec!["the answer is 4"]);
}
