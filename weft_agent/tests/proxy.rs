use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use weft_agent::protocol::{UserMessage, UserResponse, WireMessage};
use weft_agent::{
    AgentHost, HandlerContext, HandlerFault, HostConfig, OutboundReply, ProxyConfig, RequestProxy,
    Respond, SendError,
};
use weft_bus::{Envelope, InProcessBus, Publish, Subscribe};

mod common;
use common::{spec, RecordingDisplay};

/// Replies with a streamed progress update followed by the final answer.
struct StreamingResponder {
    delay: Option<Duration>,
}

#[async_trait]
impl Respond<UserMessage> for StreamingResponder {
    async fn respond(
        &self,
        _message: UserMessage,
        ctx: &HandlerContext,
    ) -> Result<OutboundReply, HandlerFault> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        // Stream an intermediate reply on the request's reply topic
        let progress = UserResponse {
            content: "thinking".to_string(),
            is_final: false,
        };
        let envelope = Envelope::builder()
            .with_payload(UserResponse::MESSAGE_TYPE, &progress)?
            .with_correlation_id(ctx.envelope().correlation_id().unwrap())
            .with_source(ctx.agent_name())
            .build()
            .unwrap();
        ctx.publish(ctx.envelope().reply_to().unwrap(), envelope)
            .await
            .map_err(|error| HandlerFault::execution(error.to_string()))?;

        Ok(OutboundReply::encode(&UserResponse {
            content: "done".to_string(),
            is_final: true,
        })?)
    }
}

async fn start_responder(bus: &Arc<InProcessBus>, delay: Option<Duration>) -> AgentHost {
    let config = HostConfig {
        agent_name: "responder".to_string(),
        subscriptions: vec![spec("user.message", "responder")],
    };

    let host = AgentHost::builder(config)
        .respond::<UserMessage, _>(StreamingResponder { delay })
        .build(
            Arc::clone(bus) as Arc<dyn Publish>,
            Arc::clone(bus) as Arc<dyn Subscribe>,
        )
        .unwrap();
    host.start().await.unwrap();

    host
}

#[tokio::test(flavor = "multi_thread")]
async fn progress_streams_and_final_reply_resolves() {
    // Given
    let bus = Arc::new(InProcessBus::default());
    let host = start_responder(&bus, None).await;
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
    let (progress_sink, mut progress) = mpsc::unbounded_channel();
    let reply = proxy
        .send(
            UserMessage {
                content: "summarize this".to_string(),
                target: None,
            },
            Some(progress_sink),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    // Then: the awaited result is the final reply, and the progress sink
    // observed the intermediate one
    assert_eq!(reply.content, "done");
    assert!(reply.is_final);

    let streamed = timeout(Duration::from_secs(1), progress.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(streamed.content, "thinking");
    assert!(!streamed.is_final);

    proxy.dispose().await;
    host.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn dispose_cancels_outstanding_requests() {
    // Given: no responder at all, so the request would otherwise hang
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
    let outstanding = tokio::spawn({
        let proxy = Arc::clone(&proxy);
        async move {
            proxy
                .send(
                    UserMessage {
                        content: "anyone there?".to_string(),
                        target: None,
                    },
                    None,
                    Some(Duration::from_secs(30)),
                )
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    proxy.dispose().await;

    // Then: the caller observes cancellation rather than hanging
    let result = timeout(Duration::from_secs(1), outstanding)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(SendError::Cancelled)));

    // A disposed proxy refuses further sends
    let refused = proxy
        .send(
            UserMessage {
                content: "again".to_string(),
                target: None,
            },
            None,
            None,
        )
        .await;
    assert!(matches!(refused, Err(SendError::Cancelled)));
}

#[tokio::test(flavor = "multi_thread")]
async fn late_reply_is_unsolicited() {
    // Given: a responder slower than the caller's timeout
    let bus = Arc::new(InProcessBus::default());
    let host = start_responder(&bus, Some(Duration::from_millis(300))).await;
    let (display, mut unsolicited) = RecordingDisplay::new();
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
        .send(
            UserMessage {
                content: "too slow".to_string(),
                target: None,
            },
            None,
            Some(Duration::from_millis(50)),
        )
        .await;

    // Then: the send times out locally, and the late reply lands with the
    // display collaborator instead
    assert!(matches!(result, Err(SendError::NoReply)));

    let late = timeout(Duration::from_secs(2), unsolicited.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(late.content, "thinking");

    proxy.dispose().await;
    host.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn destination_rides_the_envelope() {
    // Given: a responder that replies with what it saw
    struct TargetEcho;

    #[async_trait]
    impl Respond<UserMessage> for TargetEcho {
        async fn respond(
            &self,
            _message: UserMessage,
            ctx: &HandlerContext,
        ) -> Result<OutboundReply, HandlerFault> {
            Ok(OutboundReply::encode(&UserResponse {
                content: ctx.envelope().destination().unwrap_or("<none>").to_string(),
                is_final: true,
            })?)
        }
    }

    let bus = Arc::new(InProcessBus::default());
    let config = HostConfig {
        agent_name: "responder".to_string(),
        subscriptions: vec![spec("user.message", "responder")],
    };
    let host = AgentHost::builder(config)
        .respond::<UserMessage, _>(TargetEcho)
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
        ProxyConfig::default(),
    )
    .await
    .unwrap();

    // When
    let reply = proxy
        .send(
            UserMessage {
                content: "route me".to_string(),
                target: Some("researcher".to_string()),
            },
            None,
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    // Then
    assert_eq!(reply.content, "researcher");

    proxy.dispose().await;
    host.shutdown().await;
}
