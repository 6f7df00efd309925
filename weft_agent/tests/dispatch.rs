use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weft_agent::protocol::{ErrorReply, UserMessage, WireMessage};
use weft_agent::{
    AgentHost, Consume, ErrorCode, HandlerContext, HandlerFault, HostConfig, OutboundReply,
    Respond,
};
use weft_bus::{Envelope, InProcessBus, Publish, Subscribe, Topic, TopicPattern};

mod common;
use common::{collector, next, spec};

struct CountingConsumer {
    invocations: Arc<AtomicU32>,
}

#[async_trait]
impl Consume<UserMessage> for CountingConsumer {
    async fn consume(
        &self,
        _message: UserMessage,
        _ctx: &HandlerContext,
    ) -> Result<(), HandlerFault> {
        self.invocations.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }
}

struct FailingResponder;

#[async_trait]
impl Respond<UserMessage> for FailingResponder {
    async fn respond(
        &self,
        _message: UserMessage,
        _ctx: &HandlerContext,
    ) -> Result<OutboundReply, HandlerFault> {
        Err(HandlerFault::invalid_arguments("the content is empty"))
    }
}

fn user_message_envelope(content: &str) -> Envelope {
    Envelope::builder()
        .with_payload(
            UserMessage::MESSAGE_TYPE,
            &UserMessage {
                content: content.to_string(),
                target: None,
            },
        )
        .unwrap()
        .with_source("test")
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn typed_dispatch_routes_by_message_type() {
    // Given
    let bus = Arc::new(InProcessBus::default());
    let invocations = Arc::new(AtomicU32::new(0));
    let config = HostConfig {
        agent_name: "listener".to_string(),
        subscriptions: vec![spec("user.message", "listener")],
    };
    let host = AgentHost::builder(config)
        .consume::<UserMessage, _>(CountingConsumer {
            invocations: Arc::clone(&invocations),
        })
        .build(
            Arc::clone(&bus) as Arc<dyn Publish>,
            Arc::clone(&bus) as Arc<dyn Subscribe>,
        )
        .unwrap();
    host.start().await.unwrap();

    // When: one envelope of the registered type, one of an unknown type,
    // and one of the registered type with a payload that does not decode
    let topic = Topic::parse("user.message").unwrap();
    bus.publish(&topic, user_message_envelope("hello"))
        .await
        .unwrap();

    let unknown_type = Envelope::builder()
        .with_message_type("mystery")
        .with_source("test")
        .with_body(b"{}".to_vec())
        .build()
        .unwrap();
    bus.publish(&topic, unknown_type).await.unwrap();

    let malformed = Envelope::builder()
        .with_message_type(UserMessage::MESSAGE_TYPE)
        .with_source("test")
        .with_body(b"not json".to_vec())
        .build()
        .unwrap();
    bus.publish(&topic, malformed).await.unwrap();

    // Then: only the well-formed, registered envelope reached the handler;
    // the other two were dead-lettered without an invocation
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(invocations.load(Ordering::Relaxed), 1);

    host.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn invocation_fault_becomes_a_classified_error_reply() {
    // Given
    let bus = Arc::new(InProcessBus::default());
    let config = HostConfig {
        agent_name: "responder".to_string(),
        subscriptions: vec![spec("user.message", "responder")],
    };
    let host = AgentHost::builder(config)
        .respond::<UserMessage, _>(FailingResponder)
        .build(
            Arc::clone(&bus) as Arc<dyn Publish>,
            Arc::clone(&bus) as Arc<dyn Subscribe>,
        )
        .unwrap();
    host.start().await.unwrap();

    let (handler, mut replies) = collector();
    let reply_subscription = bus
        .subscribe(TopicPattern::parse("replies").unwrap(), "caller", handler)
        .await
        .unwrap();

    // When
    let envelope = Envelope::builder()
        .with_payload(
            UserMessage::MESSAGE_TYPE,
            &UserMessage {
                content: String::new(),
                target: None,
            },
        )
        .unwrap()
        .with_reply_to(Topic::parse("replies").unwrap())
        .with_correlation_id("c9")
        .with_source("caller")
        .build()
        .unwrap();
    bus.publish(&Topic::parse("user.message").unwrap(), envelope)
        .await
        .unwrap();

    // Then
    let reply = next(&mut replies).await;
    assert_eq!(reply.message_type(), "error");
    assert_eq!(reply.correlation_id(), Some("c9"));
    assert_eq!(reply.source(), "responder");

    let error = reply.decode::<ErrorReply>().unwrap();
    assert_eq!(error.code, ErrorCode::InvalidArguments);
    assert!(!error.is_retryable);

    reply_subscription.dispose().await;
    host.shutdown().await;
}
