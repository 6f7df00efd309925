use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use weft_bus::{Envelope, InProcessBus, Publish, Subscribe, Topic, TopicPattern};

mod common;
use common::collector;

fn probe(message_id: &str) -> Envelope {
    Envelope::builder()
        .with_message_id(message_id)
        .with_message_type("probe")
        .with_correlation_id("c1")
        .with_source("publisher")
        .build()
        .unwrap()
}

async fn next(receiver: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("expected a delivery within one second")
        .expect("collector channel closed")
}

#[tokio::test(flavor = "multi_thread")]
async fn roundtrip_preserves_visible_fields() {
    // Given
    let bus = InProcessBus::default();
    let (handler, mut received) = collector();
    let subscription = bus
        .subscribe(
            TopicPattern::parse("test.roundtrip").unwrap(),
            "roundtrip",
            handler,
        )
        .await
        .unwrap();

    // When
    bus.publish(&Topic::parse("test.roundtrip").unwrap(), probe("m1"))
        .await
        .unwrap();

    // Then
    let envelope = next(&mut received).await;
    assert_eq!(envelope.message_id(), "m1");
    assert_eq!(envelope.correlation_id(), Some("c1"));
    assert_eq!(envelope.source(), "publisher");

    subscription.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn distinct_subscription_names_fan_out() {
    // Given: two groups bound to the same pattern
    let bus = InProcessBus::default();
    let (handler_a, mut received_a) = collector();
    let (handler_b, mut received_b) = collector();
    let pattern = TopicPattern::parse("user.message").unwrap();

    let subscription_a = bus
        .subscribe(pattern.clone(), "group_a", handler_a)
        .await
        .unwrap();
    let subscription_b = bus
        .subscribe(pattern, "group_b", handler_b)
        .await
        .unwrap();

    // When
    bus.publish(&Topic::parse("user.message").unwrap(), probe("m1"))
        .await
        .unwrap();

    // Then: each group receives its own copy
    assert_eq!(next(&mut received_a).await.message_id(), "m1");
    assert_eq!(next(&mut received_b).await.message_id(), "m1");

    subscription_a.dispose().await;
    subscription_b.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shared_subscription_name_competes() {
    // Given: two members of the same group
    let bus = InProcessBus::default();
    let (handler, mut received) = collector();
    let pattern = TopicPattern::parse("user.message").unwrap();

    let subscription_a = bus
        .subscribe(pattern.clone(), "shared", Arc::clone(&handler))
        .await
        .unwrap();
    let subscription_b = bus.subscribe(pattern, "shared", handler).await.unwrap();

    // When
    bus.publish(&Topic::parse("user.message").unwrap(), probe("m1"))
        .await
        .unwrap();

    // Then: exactly one member receives the message
    assert_eq!(next(&mut received).await.message_id(), "m1");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(received.try_recv().is_err());

    subscription_a.dispose().await;
    subscription_b.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn deliveries_within_one_group_are_fifo() {
    // Given
    let bus = InProcessBus::default();
    let (handler, mut received) = collector();
    let subscription = bus
        .subscribe(TopicPattern::parse("ordered").unwrap(), "ordered", handler)
        .await
        .unwrap();

    // When
    for index in 0..10 {
        bus.publish(
            &Topic::parse("ordered").unwrap(),
            probe(&format!("m{}", index)),
        )
        .await
        .unwrap();
    }

    // Then
    for index in 0..10 {
        assert_eq!(next(&mut received).await.message_id(), format!("m{}", index));
    }

    subscription.dispose().await;
}
