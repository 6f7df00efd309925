use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weft_bus::{
    handler_fn, Envelope, InProcessBus, MessageResult, Publish, Subscribe, Topic, TopicPattern,
};

fn probe() -> Envelope {
    Envelope::builder()
        .with_message_type("probe")
        .with_source("publisher")
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn disposed_subscription_receives_nothing_further() {
    // Given: a deliberately slow handler, so deliveries stay in flight
    let bus = InProcessBus::default();
    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);
    let handler = handler_fn(move |_envelope| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(Duration::from_millis(20)).await;
            MessageResult::Ack
        }
    });
    let subscription = bus
        .subscribe(TopicPattern::parse("burst").unwrap(), "burst", handler)
        .await
        .unwrap();

    // When: a burst of messages, disposed mid-stream
    for _ in 0..20 {
        bus.publish(&Topic::parse("burst").unwrap(), probe())
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    subscription.dispose().await;
    let invocations_at_disposal = invocations.load(Ordering::Relaxed);

    // Then: zero further handler invocations after dispose returns
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(invocations.load(Ordering::Relaxed), invocations_at_disposal);
    assert!(subscription.is_disposed());

    // Repeated disposal is a no-op
    subscription.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn publishing_after_disposal_delivers_nowhere() {
    // Given
    let bus = InProcessBus::default();
    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);
    let handler = handler_fn(move |_envelope| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::Relaxed);
            MessageResult::Ack
        }
    });
    let subscription = bus
        .subscribe(TopicPattern::parse("gone").unwrap(), "gone", handler)
        .await
        .unwrap();
    subscription.dispose().await;

    // When
    bus.publish(&Topic::parse("gone").unwrap(), probe())
        .await
        .unwrap();

    // Then
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(invocations.load(Ordering::Relaxed), 0);
}
