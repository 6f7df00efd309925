use crate::{Envelope, MessageHandler, Subscription, Topic, TopicPattern};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// The outbound half of the broker abstraction.
///
/// A published envelope is delivered **at least once** to every distinct
/// subscription whose pattern matches the topic. Ordering between distinct
/// topics is unspecified; within one `(topic, subscription name)` tuple the
/// order is best-effort FIFO and is preserved as long as a single broker
/// connection is used.
#[async_trait]
pub trait Publish: Send + Sync {
    /// Publishes the given envelope on the given topic.
    ///
    /// The call suspends while the transport hands the message over (e.g.
    /// while re-establishing a broker connection), but never blocks a worker
    /// thread.
    async fn publish(&self, topic: &Topic, envelope: Envelope) -> Result<(), PublishError>;
}

/// The inbound half of the broker abstraction.
#[async_trait]
pub trait Subscribe: Send + Sync {
    /// Registers a durable consumer group under the given subscription name.
    ///
    /// Two subscriptions sharing a name compete for messages; different
    /// names each receive every matching message (fan-out). The returned
    /// [`Subscription`] handle owns the consumer lifetime:
    /// [dispose](Subscription::dispose) unregisters the consumer and drains
    /// in-flight work, idempotently.
    async fn subscribe(
        &self,
        pattern: TopicPattern,
        subscription_name: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, SubscribeError>;
}

/// Represents failure to publish an envelope.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The fabric has entered its spindown phase; no further messages are
    /// accepted.
    #[error("refused to publish a message: the fabric is shutting down")]
    ShuttingDown,
    /// The transport could not hand the message to the broker.
    #[error("failed to hand a message to the broker: {0}")]
    Transport(String),
}

/// Represents failure to register a subscription.
#[derive(Error, Debug)]
pub enum SubscribeError {
    /// The fabric has entered its spindown phase; no further subscriptions
    /// are accepted.
    #[error("refused to register a subscription: the fabric is shutting down")]
    ShuttingDown,
    /// The transport could not set up the broker-side consumer.
    #[error("failed to register a broker consumer: {0}")]
    Transport(String),
}
