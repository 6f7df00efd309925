use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weft_bus::{
    handler_fn, Envelope, InProcessBus, InProcessConfig, MessageResult, Publish, Subscribe, Topic,
    TopicPattern,
};

fn probe() -> Envelope {
    Envelope::builder()
        .with_message_type("probe")
        .with_source("publisher")
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_is_capped_then_discarded() {
    // Given: a handler that always asks for a retry
    let bus = InProcessBus::default();
    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);
    let handler = handler_fn(move |_envelope| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::Relaxed);
            MessageResult::Retry
        }
    });
    let subscription = bus
        .subscribe(TopicPattern::parse("flaky").unwrap(), "flaky", handler)
        .await
        .unwrap();

    // When
    bus.publish(&Topic::parse("flaky").unwrap(), probe())
        .await
        .unwrap();

    // Then: the default cap of 3 redeliveries makes for exactly 4
    // invocations, after which the message is discarded
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(invocations.load(Ordering::Relaxed), 4);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(invocations.load(Ordering::Relaxed), 4);

    subscription.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_cap_is_configurable() {
    // Given
    let bus = InProcessBus::new(InProcessConfig {
        queue_capacity: None,
        max_redeliveries: 1,
    });
    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);
    let handler = handler_fn(move |_envelope| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::Relaxed);
            MessageResult::Retry
        }
    });
    let subscription = bus
        .subscribe(TopicPattern::parse("flaky").unwrap(), "flaky", handler)
        .await
        .unwrap();

    // When
    bus.publish(&Topic::parse("flaky").unwrap(), probe())
        .await
        .unwrap();

    // Then
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(invocations.load(Ordering::Relaxed), 2);

    subscription.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn dead_letter_is_discarded_immediately() {
    // Given
    let bus = InProcessBus::default();
    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);
    let handler = handler_fn(move |_envelope| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::Relaxed);
            MessageResult::DeadLetter
        }
    });
    let subscription = bus
        .subscribe(TopicPattern::parse("poison").unwrap(), "poison", handler)
        .await
        .unwrap();

    // When
    bus.publish(&Topic::parse("poison").unwrap(), probe())
        .await
        .unwrap();

    // Then
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(invocations.load(Ordering::Relaxed), 1);

    subscription.dispose().await;
}
