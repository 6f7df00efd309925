use crate::protocol::{ErrorReply, WireMessage};
use crate::HandlerFault;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use weft_bus::{
    CodecError, Envelope, MessageHandler, MessageResult, Publish, PublishError, Subscribe,
    SubscribeError, Subscription, Topic, TopicPattern,
};
use weft_core::FabricContext;

/// Configuration of an [`AgentHost`]: the agent identity plus the topics it
/// declares interest in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// The identity this agent publishes under.
    pub agent_name: String,
    /// The `(topic pattern, subscription name)` pairs to consume.
    pub subscriptions: Vec<SubscriptionSpec>,
}

/// One subscription declared by a [`HostConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionSpec {
    /// The binding pattern.
    pub topic_pattern: TopicPattern,
    /// The durable consumer-group name.
    pub subscription_name: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            agent_name: "weft-agent".to_string(),
            subscriptions: Vec::new(),
        }
    }
}

/// Everything a handler may need while processing one delivery: the raw
/// envelope, the configured publisher, the agent identity, and a
/// cancellation token linked to the subscription lifetime.
pub struct HandlerContext {
    envelope: Envelope,
    publisher: Arc<dyn Publish>,
    agent_name: Arc<str>,
    cancel: CancellationToken,
}

impl HandlerContext {
    /// Exposes the raw envelope under processing.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Exposes the configured publisher.
    pub fn publisher(&self) -> &Arc<dyn Publish> {
        &self.publisher
    }

    /// Exposes the identity of the hosting agent.
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Exposes the cancellation token scoped to the subscription lifetime.
    /// A set token means the host is shutting down; handlers must propagate
    /// it rather than convert it into a reply.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Publishes an envelope through the configured publisher.
    pub async fn publish(&self, topic: &Topic, envelope: Envelope) -> Result<(), PublishError> {
        self.publisher.publish(topic, envelope).await
    }
}

/// A typed fire-and-forget handler: consumes a decoded message, produces no
/// reply. Faults are logged by the dispatcher and the delivery is retried or
/// dead-lettered depending on the classification.
#[async_trait]
pub trait Consume<M>: Send + Sync {
    /// Processes one decoded message.
    async fn consume(&self, message: M, ctx: &HandlerContext) -> Result<(), HandlerFault>;
}

/// A typed invocation-style handler: consumes a decoded request and produces
/// a reply that the dispatcher publishes to the request's `reply_to`. Faults
/// are converted into a classified error reply on the same topic.
#[async_trait]
pub trait Respond<M>: Send + Sync {
    /// Processes one decoded request and returns the reply to publish.
    async fn respond(&self, message: M, ctx: &HandlerContext) -> Result<OutboundReply, HandlerFault>;
}

/// Lets one shared handler instance serve several registrations (e.g. a
/// worker answering both a request type and its cancel type).
#[async_trait]
impl<M, H> Consume<M> for Arc<H>
where
    M: Send + 'static,
    H: Consume<M> + ?Sized,
{
    async fn consume(&self, message: M, ctx: &HandlerContext) -> Result<(), HandlerFault> {
        self.as_ref().consume(message, ctx).await
    }
}

/// Lets one shared handler instance serve several registrations.
#[async_trait]
impl<M, H> Respond<M> for Arc<H>
where
    M: Send + 'static,
    H: Respond<M> + ?Sized,
{
    async fn respond(&self, message: M, ctx: &HandlerContext) -> Result<OutboundReply, HandlerFault> {
        self.as_ref().respond(message, ctx).await
    }
}

/// A reply produced by a [`Respond`] handler: an already encoded payload
/// plus an optional fallback topic for requests that carry no `reply_to`.
pub struct OutboundReply {
    message_type: Arc<str>,
    body: Vec<u8>,
    fallback_topic: Option<Topic>,
}

impl OutboundReply {
    /// Encodes the given wire message into a reply.
    pub fn encode<T>(value: &T) -> Result<Self, CodecError>
    where
        T: WireMessage + Serialize,
    {
        let body = serde_json::to_vec(value).map_err(|source| CodecError::Encode {
            message_type: T::MESSAGE_TYPE.to_string(),
            source,
        })?;

        Ok(Self {
            message_type: Arc::from(T::MESSAGE_TYPE),
            body,
            fallback_topic: None,
        })
    }

    /// Sets the topic to publish on when the request carries no `reply_to`.
    pub fn with_fallback_topic(mut self, topic: Topic) -> Self {
        self.fallback_topic = Some(topic);

        self
    }

    /// Exposes the logical message type of this reply.
    pub fn message_type(&self) -> &str {
        &self.message_type
    }
}

/// Distinguishes the two handler registration flavors for fault routing.
#[derive(Clone, Copy, PartialEq, Eq)]
enum HandlerStyle {
    FireAndForget,
    Invocation,
}

/// What a dispatched handler produced.
enum Outcome {
    Done,
    Reply(OutboundReply),
    Fault(HandlerFault),
}

/// A type-erased, registered handler.
#[async_trait]
trait ErasedHandler: Send + Sync {
    fn style(&self) -> HandlerStyle;

    /// Decodes the payload and runs the typed handler. A decode failure is
    /// reported separately from handler faults, because it dead-letters the
    /// delivery without ever invoking the handler.
    async fn dispatch(&self, ctx: &HandlerContext) -> Result<Outcome, CodecError>;
}

struct ConsumeAdapter<M, H> {
    handler: H,
    _message: PhantomData<fn(M)>,
}

#[async_trait]
impl<M, H> ErasedHandler for ConsumeAdapter<M, H>
where
    M: DeserializeOwned + Send + 'static,
    H: Consume<M>,
{
    fn style(&self) -> HandlerStyle {
        HandlerStyle::FireAndForget
    }

    async fn dispatch(&self, ctx: &HandlerContext) -> Result<Outcome, CodecError> {
        let message = ctx.envelope().decode::<M>()?;

        Ok(match self.handler.consume(message, ctx).await {
            Ok(()) => Outcome::Done,
            Err(fault) => Outcome::Fault(fault),
        })
    }
}

struct RespondAdapter<M, H> {
    handler: H,
    _message: PhantomData<fn(M)>,
}

#[async_trait]
impl<M, H> ErasedHandler for RespondAdapter<M, H>
where
    M: DeserializeOwned + Send + 'static,
    H: Respond<M>,
{
    fn style(&self) -> HandlerStyle {
        HandlerStyle::Invocation
    }

    async fn dispatch(&self, ctx: &HandlerContext) -> Result<Outcome, CodecError> {
        let message = ctx.envelope().decode::<M>()?;

        Ok(match self.handler.respond(message, ctx).await {
            Ok(reply) => Outcome::Reply(reply),
            Err(fault) => Outcome::Fault(fault),
        })
    }
}

/// Represents failure to assemble an [`AgentHost`].
#[derive(Error, Debug)]
pub enum HostBuildError {
    /// Two handlers were registered for the same message type. The registry
    /// is fail-closed: the collision must be resolved, not silently won by
    /// the later registration.
    #[error("a handler for message type '{0}' is already registered")]
    DuplicateHandler(String),
}

/// Builds an [`AgentHost`] by accumulating typed handlers; see
/// [`AgentHost::builder`].
pub struct AgentHostBuilder {
    config: HostConfig,
    handlers: HashMap<Arc<str>, Arc<dyn ErasedHandler>>,
    collision: Option<String>,
}

impl AgentHostBuilder {
    fn new(config: HostConfig) -> Self {
        Self {
            config,
            handlers: HashMap::new(),
            collision: None,
        }
    }

    /// Registers a fire-and-forget handler for the message type `M`.
    pub fn consume<M, H>(self, handler: H) -> Self
    where
        M: WireMessage + DeserializeOwned + Send + 'static,
        H: Consume<M> + 'static,
    {
        self.register::<M>(Arc::new(ConsumeAdapter {
            handler,
            _message: PhantomData,
        }))
    }

    /// Registers an invocation-style handler for the message type `M`.
    pub fn respond<M, H>(self, handler: H) -> Self
    where
        M: WireMessage + DeserializeOwned + Send + 'static,
        H: Respond<M> + 'static,
    {
        self.register::<M>(Arc::new(RespondAdapter {
            handler,
            _message: PhantomData,
        }))
    }

    fn register<M>(mut self, handler: Arc<dyn ErasedHandler>) -> Self
    where
        M: WireMessage,
    {
        let message_type: Arc<str> = Arc::from(M::MESSAGE_TYPE);

        if self.handlers.contains_key(message_type.as_ref()) {
            self.collision.get_or_insert(M::MESSAGE_TYPE.to_string());
            return self;
        }

        self.handlers.insert(message_type, handler);

        self
    }

    /// Finalizes the host against the given broker handles.
    pub fn build(
        self,
        publisher: Arc<dyn Publish>,
        subscriber: Arc<dyn Subscribe>,
    ) -> Result<AgentHost, HostBuildError> {
        if let Some(collision) = self.collision {
            return Err(HostBuildError::DuplicateHandler(collision));
        }

        let agent_name: Arc<str> = Arc::from(self.config.agent_name.as_str());
        let dispatcher = Arc::new(Dispatcher {
            agent_name: Arc::clone(&agent_name),
            publisher,
            handlers: self.handlers,
        });

        Ok(AgentHost {
            agent_name,
            config: self.config,
            subscriber,
            dispatcher,
            subscriptions: AsyncMutex::new(Vec::new()),
        })
    }
}

/// The composition root of an agent process: owns the agent identity, the
/// broker handles, the registered message-type-to-handler map, and the set
/// of topics the agent has declared interest in.
pub struct AgentHost {
    agent_name: Arc<str>,
    config: HostConfig,
    subscriber: Arc<dyn Subscribe>,
    dispatcher: Arc<Dispatcher>,
    subscriptions: AsyncMutex<Vec<Subscription>>,
}

impl AgentHost {
    /// Starts building a host for the given configuration.
    pub fn builder(config: HostConfig) -> AgentHostBuilder {
        AgentHostBuilder::new(config)
    }

    /// Reports the identity of this agent.
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Registers every configured subscription. Idempotence is not
    /// attempted: call once per host.
    pub async fn start(&self) -> Result<(), SubscribeError> {
        let mut subscriptions = self.subscriptions.lock().await;

        for spec in &self.config.subscriptions {
            let subscription = self
                .subscriber
                .subscribe(
                    spec.topic_pattern.clone(),
                    &spec.subscription_name,
                    Arc::clone(&self.dispatcher) as Arc<dyn MessageHandler>,
                )
                .await?;

            info!(
                agent = self.agent_name.as_ref(),
                pattern = spec.topic_pattern.as_str(),
                subscription = spec.subscription_name.as_str(),
                "Registered a subscription",
            );

            subscriptions.push(subscription);
        }

        Ok(())
    }

    /// Runs the host until the global [`FabricContext`] terminates, then
    /// shuts down.
    pub async fn run(&self) -> Result<(), SubscribeError> {
        self.start().await?;

        FabricContext::terminated().await;

        self.shutdown().await;

        Ok(())
    }

    /// Disposes every subscription, draining their pumps. In-flight
    /// deliveries are abandoned back to the broker.
    pub async fn shutdown(&self) {
        let subscriptions = {
            let mut guard = self.subscriptions.lock().await;
            std::mem::take(&mut *guard)
        };

        for subscription in subscriptions {
            subscription.dispose().await;
        }
    }
}

/// The bus-facing handler shared by every subscription of a host: looks up
/// the registered handler by the envelope's message type, decodes, invokes,
/// classifies.
struct Dispatcher {
    agent_name: Arc<str>,
    publisher: Arc<dyn Publish>,
    handlers: HashMap<Arc<str>, Arc<dyn ErasedHandler>>,
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn handle(&self, envelope: Envelope, cancel: &CancellationToken) -> MessageResult {
        let Some(handler) = self.handlers.get(envelope.message_type()) else {
            warn!(
                agent = self.agent_name.as_ref(),
                message_id = envelope.message_id(),
                message_type = envelope.message_type(),
                "No handler registered for the message type; dead-lettering",
            );
            return MessageResult::DeadLetter;
        };
        let handler = Arc::clone(handler);

        let ctx = HandlerContext {
            envelope,
            publisher: Arc::clone(&self.publisher),
            agent_name: Arc::clone(&self.agent_name),
            cancel: cancel.clone(),
        };

        match handler.dispatch(&ctx).await {
            // The payload never decoded; the handler was not invoked
            Err(codec_error) => {
                warn!(
                    agent = self.agent_name.as_ref(),
                    message_id = ctx.envelope.message_id(),
                    error_message = %codec_error,
                    "Malformed payload; dead-lettering",
                );
                MessageResult::DeadLetter
            }

            Ok(Outcome::Done) => MessageResult::Ack,

            Ok(Outcome::Reply(reply)) => self.publish_reply(&ctx, reply).await,

            Ok(Outcome::Fault(fault)) => {
                // A fault observed during host shutdown is the cancellation
                // propagating; abandon the delivery rather than reply
                if cancel.is_cancelled() {
                    return MessageResult::Retry;
                }

                self.handle_fault(&ctx, handler.style(), fault).await
            }
        }
    }
}

impl Dispatcher {
    /// Routes a classified fault: invocation-style handlers answer with a
    /// typed error reply, fire-and-forget handlers only log.
    async fn handle_fault(
        &self,
        ctx: &HandlerContext,
        style: HandlerStyle,
        fault: HandlerFault,
    ) -> MessageResult {
        match style {
            HandlerStyle::Invocation => {
                let reply = ErrorReply {
                    code: fault.code(),
                    message: fault.to_string(),
                    is_retryable: fault.is_retryable(),
                };

                match OutboundReply::encode(&reply) {
                    Ok(reply) => self.publish_reply(ctx, reply).await,
                    Err(codec_error) => {
                        error!(
                            alert = true,
                            agent = self.agent_name.as_ref(),
                            error_message = %codec_error,
                            "Failed to encode an error reply",
                        );
                        MessageResult::DeadLetter
                    }
                }
            }

            HandlerStyle::FireAndForget => {
                error!(
                    agent = self.agent_name.as_ref(),
                    message_id = ctx.envelope.message_id(),
                    message_type = ctx.envelope.message_type(),
                    code = fault.code().as_str(),
                    error_message = %fault,
                    "Handler fault on a fire-and-forget delivery",
                );

                if fault.is_retryable() {
                    MessageResult::Retry
                } else {
                    MessageResult::DeadLetter
                }
            }
        }
    }

    /// Publishes a reply to the request's `reply_to` (or the reply's
    /// fallback topic), carrying the request's correlation id.
    async fn publish_reply(&self, ctx: &HandlerContext, reply: OutboundReply) -> MessageResult {
        let request = &ctx.envelope;

        let Some(topic) = request
            .reply_to()
            .cloned()
            .or_else(|| reply.fallback_topic.clone())
        else {
            warn!(
                agent = self.agent_name.as_ref(),
                message_id = request.message_id(),
                reply_type = reply.message_type.as_ref(),
                "Dropping a reply: the request names no reply topic",
            );
            return MessageResult::Ack;
        };

        let mut builder = Envelope::builder()
            .with_message_type(reply.message_type.as_ref())
            .with_body(reply.body)
            .with_source(self.agent_name.as_ref());

        if let Some(correlation_id) = request.correlation_id() {
            builder = builder.with_correlation_id(correlation_id);
        }

        let envelope = match builder.build() {
            Ok(envelope) => envelope,
            Err(error) => {
                error!(
                    alert = true,
                    agent = self.agent_name.as_ref(),
                    error_message = %error,
                    "Failed to assemble a reply envelope",
                );
                return MessageResult::DeadLetter;
            }
        };

        match self.publisher.publish(&topic, envelope).await {
            Ok(()) => MessageResult::Ack,

            // The request stays unacknowledged, so the reply is attempted
            // again on redelivery
            Err(error) => {
                warn!(
                    agent = self.agent_name.as_ref(),
                    message_id = request.message_id(),
                    topic = topic.as_str(),
                    error_message = %error,
                    "Failed to publish a reply; retrying the delivery",
                );
                MessageResult::Retry
            }
        }
    }
}
