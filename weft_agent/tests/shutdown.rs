use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use weft_agent::protocol::UserMessage;
use weft_agent::{ProxyConfig, RequestProxy, SendError};
use weft_bus::{InProcessBus, Publish, Subscribe};

mod common;
use common::RecordingDisplay;

/// Fabric termination is process-global, so this file holds the single test
/// that shuts the fabric down.
#[tokio::test(flavor = "multi_thread")]
async fn fabric_shutdown_cancels_outstanding_requests() {
    // Given: a proxy with a request in flight that nobody will ever answer
    let bus = Arc::new(InProcessBus::default());
    let (display, _unsolicited) = RecordingDisplay::new();
    let proxy = RequestProxy::start(
        Arc::clone(&bus) as Arc<dyn Publish>,
        Arc::clone(&bus) as Arc<dyn Subscribe>,
        display,
        ProxyConfig::default(),
    )
    .await
    .unwrap();

    let outstanding = tokio::spawn({
        let proxy = Arc::clone(&proxy);
        async move {
            proxy
                .send(
                    UserMessage {
                        content: "anyone?".to_string(),
                        target: None,
                    },
                    None,
                    Some(Duration::from_secs(60)),
                )
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // When: the whole fabric shuts down
    weft_core::weft_shutdown().await;

    // Then: the caller observes cancellation well inside the shutdown
    // budget, rather than running into its own 60-second timeout
    let result = timeout(Duration::from_secs(1), outstanding)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(SendError::Cancelled)));
}
