use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use weft_agent::protocol::{ToolErrorReply, ToolInvocation, ToolResult, WireMessage};
use weft_agent::{
    AgentHost, ErrorCode, HandlerFault, HostConfig, ToolExecutor, ToolRegistration, ToolRegistry,
    ToolRouter, ToolRouterConfig,
};
use weft_bus::{Envelope, InProcessBus, Publish, Subscribe, Topic, HEADER_TIMEOUT_MS};

mod common;
use common::{collector, next, spec};

struct EchoExecutor;

#[async_trait]
impl ToolExecutor for EchoExecutor {
    async fn execute(
        &self,
        invocation: &ToolInvocation,
        _cancel: &CancellationToken,
    ) -> Result<Option<String>, HandlerFault> {
        let arguments = invocation
            .arguments
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        Ok(Some(format!("echo:{}", arguments)))
    }
}

struct SleepyExecutor;

#[async_trait]
impl ToolExecutor for SleepyExecutor {
    async fn execute(
        &self,
        _invocation: &ToolInvocation,
        _cancel: &CancellationToken,
    ) -> Result<Option<String>, HandlerFault> {
        tokio::time::sleep(Duration::from_millis(500)).await;

        Ok(None)
    }
}

async fn start_tool_host(bus: &Arc<InProcessBus>, registry: Arc<ToolRegistry>) -> AgentHost {
    let router = ToolRouter::new(registry, ToolRouterConfig::default());

    let config = HostConfig {
        agent_name: "tool-agent".to_string(),
        subscriptions: vec![spec("tool.invoke", "tools")],
    };

    let host = AgentHost::builder(config)
        .respond::<ToolInvocation, _>(router)
        .build(
            Arc::clone(bus) as Arc<dyn Publish>,
            Arc::clone(bus) as Arc<dyn Subscribe>,
        )
        .unwrap();
    host.start().await.unwrap();

    host
}

fn invocation_envelope(invocation: &ToolInvocation, reply_to: &str) -> Envelope {
    Envelope::builder()
        .with_payload(ToolInvocation::MESSAGE_TYPE, invocation)
        .unwrap()
        .with_reply_to(Topic::parse(reply_to).unwrap())
        .with_correlation_id("corr-1")
        .with_source("caller")
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_tool_yields_tool_not_found_within_a_second() {
    // Given
    let bus = Arc::new(InProcessBus::default());
    let host = start_tool_host(&bus, Arc::new(ToolRegistry::new())).await;
    let (handler, mut replies) = collector();
    let reply_subscription = bus
        .subscribe(
            weft_bus::TopicPattern::parse("tool.result.a").unwrap(),
            "caller",
            handler,
        )
        .await
        .unwrap();

    // When
    let invocation = ToolInvocation {
        tool_call_id: "t1".to_string(),
        tool_name: "missing".to_string(),
        arguments: None,
        session_id: None,
    };
    bus.publish(
        &Topic::parse("tool.invoke").unwrap(),
        invocation_envelope(&invocation, "tool.result.a"),
    )
    .await
    .unwrap();

    // Then: `next` enforces the one-second budget
    let reply = next(&mut replies).await;
    assert_eq!(reply.message_type(), "tool-error");

    let error = reply.decode::<ToolErrorReply>().unwrap();
    assert_eq!(error.tool_call_id, "t1");
    assert_eq!(error.code, ErrorCode::ToolNotFound);
    assert!(!error.is_retryable);

    reply_subscription.dispose().await;
    host.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn registered_tool_produces_a_result() {
    // Given
    let bus = Arc::new(InProcessBus::default());
    let registry = Arc::new(ToolRegistry::new());
    registry
        .register(ToolRegistration::new(
            "echo",
            "echoes its arguments",
            r#"{"type":"object"}"#,
            "builtin",
            Arc::new(EchoExecutor),
        ))
        .unwrap();
    let host = start_tool_host(&bus, Arc::clone(&registry)).await;

    let (handler, mut replies) = collector();
    let reply_subscription = bus
        .subscribe(
            weft_bus::TopicPattern::parse("tool.result.a").unwrap(),
            "caller",
            handler,
        )
        .await
        .unwrap();

    // When
    let invocation = ToolInvocation {
        tool_call_id: "t2".to_string(),
        tool_name: "echo".to_string(),
        arguments: Some(serde_json::json!({"query": "weather"})),
        session_id: None,
    };
    bus.publish(
        &Topic::parse("tool.invoke").unwrap(),
        invocation_envelope(&invocation, "tool.result.a"),
    )
    .await
    .unwrap();

    // Then
    let reply = next(&mut replies).await;
    assert_eq!(reply.message_type(), "tool-result");
    assert_eq!(reply.correlation_id(), Some("corr-1"));

    let result = reply.decode::<ToolResult>().unwrap();
    assert_eq!(result.tool_call_id, "t2");
    assert!(!result.is_error);
    assert_eq!(result.content.as_deref(), Some(r#"echo:{"query":"weather"}"#));

    // The invocation counter moved under the tool's name
    assert_eq!(registry.lookup("echo").unwrap().invocation_count(), 1);

    reply_subscription.dispose().await;
    host.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_header_caps_the_execution() {
    // Given: a tool slower than the requested deadline
    let bus = Arc::new(InProcessBus::default());
    let registry = Arc::new(ToolRegistry::new());
    registry
        .register(ToolRegistration::new(
            "sleepy",
            "sleeps",
            "{}",
            "builtin",
            Arc::new(SleepyExecutor),
        ))
        .unwrap();
    let host = start_tool_host(&bus, registry).await;

    let (handler, mut replies) = collector();
    let reply_subscription = bus
        .subscribe(
            weft_bus::TopicPattern::parse("tool.result.a").unwrap(),
            "caller",
            handler,
        )
        .await
        .unwrap();

    // When: the envelope asks for a 50ms deadline
    let invocation = ToolInvocation {
        tool_call_id: "t3".to_string(),
        tool_name: "sleepy".to_string(),
        arguments: None,
        session_id: None,
    };
    let envelope =
        invocation_envelope(&invocation, "tool.result.a").with_header(HEADER_TIMEOUT_MS, "50");
    bus.publish(&Topic::parse("tool.invoke").unwrap(), envelope)
        .await
        .unwrap();

    // Then: a retryable timeout error
    let reply = next(&mut replies).await;
    let error = reply.decode::<ToolErrorReply>().unwrap();
    assert_eq!(error.code, ErrorCode::Timeout);
    assert!(error.is_retryable);

    reply_subscription.dispose().await;
    host.shutdown().await;
}
