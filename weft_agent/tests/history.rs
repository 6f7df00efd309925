use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use weft_agent::protocol::{HistoryEntry, HistoryRequest, HistoryResponse};
use weft_agent::{
    AgentHost, HandlerContext, HandlerFault, HostConfig, OutboundReply, ProxyConfig, RequestProxy,
    Respond, SendError,
};
use weft_bus::{InProcessBus, Publish, Subscribe};

mod common;
use common::{spec, RecordingDisplay};

/// Serves canned history.
struct HistoryKeeper;

#[async_trait]
impl Respond<HistoryRequest> for HistoryKeeper {
    async fn respond(
        &self,
        request: HistoryRequest,
        _ctx: &HandlerContext,
    ) -> Result<OutboundReply, HandlerFault> {
        let entries = match request.session_id.as_deref() {
            Some("empty") => Vec::new(),
            _ => vec![HistoryEntry {
                role: "user".to_string(),
                content: "hello".to_string(),
            }],
        };

        Ok(OutboundReply::encode(&HistoryResponse { entries })?)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn history_requests_use_the_lazy_per_proxy_topic() {
    // Given
    let bus = Arc::new(InProcessBus::default());
    let config = HostConfig {
        agent_name: "keeper".to_string(),
        subscriptions: vec![spec("user.history.request", "keeper")],
    };
    let host = AgentHost::builder(config)
        .respond::<HistoryRequest, _>(HistoryKeeper)
        .build(
            Arc::clone(&bus) as Arc<dyn Publish>,
            Arc::clone(&bus) as Arc<dyn Subscribe>,
        )
        .unwrap();
    host.start().await.unwrap();

    let (display, _unsolicited) = RecordingDisplay::new();
    let proxy = RequestProxy::start(
        Arc::clone(&bus) as Arc<dyn Publish>,
        Arc::clone(&bus) as Arc<dyn Subscribe>,
        display,
        ProxyConfig {
            proxy_id: Some("proxy-a".to_string()),
            ..ProxyConfig::default()
        },
    )
    .await
    .unwrap();

    // When: two lookups; the second reuses the lazily registered
    // subscription
    let first = proxy
        .history(HistoryRequest::default(), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    let second = proxy
        .history(
            HistoryRequest {
                session_id: Some("empty".to_string()),
            },
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    // Then
    assert_eq!(first.entries.len(), 1);
    assert_eq!(first.entries[0].content, "hello");
    assert!(second.entries.is_empty());

    proxy.dispose().await;
    host.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn history_lookup_times_out_without_a_keeper() {
    // Given: nobody serves history
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

    // When
    let result = proxy
        .history(HistoryRequest::default(), Some(Duration::from_millis(50)))
        .await;

    // Then
    assert!(matches!(result, Err(SendError::NoReply)));

    proxy.dispose().await;
}
