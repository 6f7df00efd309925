use crate::connector::{Connector, Gateway};
use crate::{finalize, props, AmqpConfig};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{
    Channel, Consumer as LapinConsumer, ExchangeKind, Result as LapinResult,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::select;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use weft_bus::{
    Envelope, MessageHandler, MessageResult, Publish, PublishError, Subscribe, SubscribeError,
    Subscription, Topic, TopicPattern,
};
use weft_core::{FabricContext, FabricSpindown};
use weft_util::RetryPacer;

/// The AMQP-backed transport of the fabric.
///
/// # Topology
///
/// All messages travel through a single topic exchange; a companion topic
/// dead-letter exchange receives every delivery rejected without requeue,
/// with the original routing key preserved. Each subscription declares a
/// durable queue named after its subscription name and binds it with its
/// pattern (`*`/`#` map one-to-one onto the broker's topic-match operators),
/// so subscriptions sharing a name form a competing-consumer group and
/// differently named subscriptions fan out.
///
/// # Channels
///
/// The process holds one connection (via [`Connector`]); the transport keeps
/// one channel for publishing and gives each subscription pump a channel of
/// its own. Publishing and consuming roles never share a channel.
///
/// # Recovery
///
/// When a channel faults, in-flight deliveries are abandoned (the broker
/// redelivers them), a fresh channel is fetched, queue and bindings are
/// re-declared, and consumption resumes.
pub struct AmqpTransport {
    name: Arc<str>,
    config: AmqpConfig,
    gateway: Gateway,
    /// The channel reserved for the publishing role.
    publish_channel: AsyncMutex<Option<Channel>>,
    /// Paces publishing retries when the broker is unreachable.
    publish_pacer: RetryPacer,
}

impl AmqpTransport {
    /// Creates a transport on top of an already running [`Connector`]'s
    /// [`Gateway`].
    pub fn new(gateway: Gateway, config: impl AsRef<AmqpConfig>) -> Self {
        let config = config.as_ref().clone();

        Self {
            name: Self::compose_name(&config),
            publish_pacer: RetryPacer::new(config.handle.backoff()),
            config,
            gateway,
            publish_channel: AsyncMutex::new(None),
        }
    }

    /// Starts a new [`Connector`] for the configured handle and creates a
    /// transport on top of it.
    pub fn start(config: impl AsRef<AmqpConfig>) -> Self {
        let config = config.as_ref();
        let gateway = Connector::start(&config.handle);

        Self::new(gateway, config)
    }

    /// Composes a globally unique, human-readable name for this transport.
    fn compose_name(config: &AmqpConfig) -> Arc<str> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        Arc::from(format!(
            "amqp:transport:{}:{}",
            config.exchange,
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ))
    }

    /// Reports the name of this transport.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AmqpTransport {
    /// Declares the main exchange and the dead-letter exchange. Declarations
    /// are repeatable as long as the configuration does not change.
    async fn declare_exchanges(config: &AmqpConfig, channel: &Channel) -> LapinResult<()> {
        for exchange in [config.exchange.as_str(), config.dlx.as_str()] {
            channel
                .exchange_declare(
                    exchange,
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions {
                        passive: false,
                        durable: config.durable,
                        auto_delete: false,
                        internal: false,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        Ok(())
    }

    /// Waits for a fresh channel suitable for publishing: topology declared,
    /// ready for `basic_publish`. Watches the global context so a shutdown
    /// does not leave the caller waiting forever.
    async fn prepare_publish_channel(&self) -> Result<Channel, PublishError> {
        loop {
            let channel = select! {
                biased;
                _ = FabricContext::terminated() => return Err(PublishError::ShuttingDown),
                channel = self.gateway.channel() => channel,
            };

            match Self::declare_exchanges(&self.config, &channel).await {
                Ok(()) => return Ok(channel),
                Err(error) => {
                    warn!(
                        alert = true,
                        transport = self.name.as_ref(),
                        ?error,
                        error_message = %error,
                        "Failed to declare the AMQP exchanges",
                    );

                    self.publish_pacer.pause().await;
                }
            }
        }
    }
}

#[async_trait]
impl Publish for AmqpTransport {
    async fn publish(&self, topic: &Topic, envelope: Envelope) -> Result<(), PublishError> {
        let properties = props::properties_for(&envelope, self.config.durable);

        // The publishing channel is exclusive to this role; the lock also
        // preserves FIFO between concurrent publishers of this transport
        let mut channel_guard = self.publish_channel.lock().await;

        loop {
            if FabricContext::is_terminated() {
                return Err(PublishError::ShuttingDown);
            }

            let channel = match channel_guard.take() {
                Some(channel) => channel,
                None => self.prepare_publish_channel().await?,
            };

            let transmission = channel
                .basic_publish(
                    &self.config.exchange,
                    topic.as_str(),
                    BasicPublishOptions::default(),
                    envelope.body(),
                    properties.clone(),
                )
                .await;

            // The first await transmits; the second resolves the broker
            // confirmation (a no-op unless confirms are enabled)
            let confirmation = match transmission {
                Ok(confirm) => confirm.await,
                Err(error) => Err(error),
            };

            match confirmation {
                Ok(_) => {
                    self.publish_pacer.settle();
                    *channel_guard = Some(channel);

                    return Ok(());
                }

                // The channel has gone bad: drop it, wait a bit, retry with
                // a fresh one
                Err(error) => {
                    warn!(
                        alert = true,
                        transport = self.name.as_ref(),
                        topic = topic.as_str(),
                        message_id = envelope.message_id(),
                        ?error,
                        error_message = %error,
                        "Failed to publish an AMQP message; retrying on a fresh channel",
                    );

                    drop(channel);
                    self.publish_pacer.pause().await;
                }
            }
        }
    }
}

#[async_trait]
impl Subscribe for AmqpTransport {
    async fn subscribe(
        &self,
        pattern: TopicPattern,
        subscription_name: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, SubscribeError> {
        if FabricContext::is_terminated() {
            return Err(SubscribeError::ShuttingDown);
        }

        let consumer_id = ConsumerPump::compose_consumer_id(subscription_name);
        let cancel = FabricContext::child_token();

        let pump = ConsumerPump {
            consumer_id: Arc::clone(&consumer_id),
            config: self.config.clone(),
            gateway: self.gateway.clone(),
            queue_name: Arc::from(subscription_name),
            pattern: pattern.clone(),
            handler,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(pump.run());

        Ok(Subscription::new(
            consumer_id.as_ref(),
            pattern,
            subscription_name,
            cancel,
            handle,
        ))
    }
}

/// The cooperative consumer loop behind one AMQP subscription.
struct ConsumerPump {
    consumer_id: Arc<str>,
    config: AmqpConfig,
    gateway: Gateway,
    queue_name: Arc<str>,
    pattern: TopicPattern,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
}

impl ConsumerPump {
    /// Composes a globally unique, human-readable consumer identifier, which
    /// doubles as the broker-side consumer tag.
    fn compose_consumer_id(subscription_name: &str) -> Arc<str> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        Arc::from(format!(
            "amqp:sub:{}:{}",
            subscription_name,
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ))
    }

    /// Runs the pump until the subscription is disposed or the fabric is
    /// terminated: build a consumer, drain its deliveries, rebuild on any
    /// channel fault.
    async fn run(self) {
        let _spindown_token = FabricSpindown::register(self.consumer_id.as_ref());
        let pacer = RetryPacer::new(self.config.handle.backoff());

        let mut current_channel: Option<Channel> = None;

        'rebuild: loop {
            let (channel, mut consumer) = select! {
                biased;
                _ = self.cancel.cancelled() => break,
                built = self.build_consumer(&pacer) => built,
            };
            pacer.settle();
            current_channel = Some(channel);

            loop {
                let delivery = select! {
                    biased;
                    _ = self.cancel.cancelled() => break 'rebuild,
                    delivery = consumer.next() => delivery,
                };

                match delivery {
                    // The consumer is permanently out of deliveries, which
                    // means the channel is gone: rebuild from scratch
                    None => {
                        debug!(
                            consumer_id = self.consumer_id.as_ref(),
                            "AMQP consumer ran out of deliveries; rebuilding",
                        );
                        continue 'rebuild;
                    }

                    Some(Err(error)) => {
                        warn!(
                            alert = true,
                            consumer_id = self.consumer_id.as_ref(),
                            ?error,
                            error_message = %error,
                            "Received an error from the AMQP consumer; rebuilding",
                        );
                        continue 'rebuild;
                    }

                    Some(Ok(delivery)) => self.process(delivery).await,
                }
            }
        }

        // Best-effort consumer de-registration on the way out
        if let Some(channel) = current_channel.take() {
            let _ = channel
                .basic_cancel(&self.consumer_id, BasicCancelOptions::default())
                .await;
        }
    }

    /// Builds a broker consumer on a fresh channel, retrying with backoff
    /// for as long as it takes. Declaration failures usually need an
    /// operator fix on the broker side, so the pump keeps spinning (and
    /// alerting) until the declarations go through.
    async fn build_consumer(&self, pacer: &RetryPacer) -> (Channel, LapinConsumer) {
        loop {
            let channel = self.gateway.channel().await;

            match self.try_build_consumer(&channel).await {
                Ok(consumer) => return (channel, consumer),

                Err(error) => {
                    warn!(
                        alert = true,
                        consumer_id = self.consumer_id.as_ref(),
                        attempt = pacer.attempt(),
                        ?error,
                        error_message = %error,
                        "Failed to build an AMQP consumer",
                    );

                    pacer.pause().await;
                }
            }
        }
    }

    /// Issues the declarations and starts consuming: prefetch, exchanges,
    /// the durable group queue with its dead-letter argument, the pattern
    /// binding.
    async fn try_build_consumer(&self, channel: &Channel) -> LapinResult<LapinConsumer> {
        channel
            .basic_qos(self.config.prefetch, BasicQosOptions { global: false })
            .await?;

        AmqpTransport::declare_exchanges(&self.config, channel).await?;

        // Rejected-without-requeue deliveries go to the dead-letter
        // exchange; the routing key is preserved by not overriding it
        let mut queue_args = FieldTable::default();
        queue_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.config.dlx.as_bytes().into()),
        );

        let queue = channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions {
                    passive: false,
                    durable: self.config.durable,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                queue_args,
            )
            .await?;

        channel
            .queue_bind(
                queue.name().as_str(),
                &self.config.exchange,
                self.pattern.as_str(),
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await?;

        channel
            .basic_consume(
                queue.name().as_str(),
                &self.consumer_id,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
    }

    /// Processes a single delivery: reconstruct the envelope, run the
    /// handler under the subscription-scoped token, translate the result
    /// into the broker acknowledgement.
    async fn process(&self, delivery: Delivery) {
        let Delivery {
            properties,
            data,
            acker,
            ..
        } = delivery;

        let envelope = match props::envelope_from_parts(&properties, data) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(
                    alert = true,
                    consumer_id = self.consumer_id.as_ref(),
                    ?error,
                    error_message = %error,
                    "Dead-lettering a delivery that does not reconstruct into an envelope",
                );
                finalize::deadletter_delivery(&self.consumer_id, &acker, "<malformed>").await;

                return;
            }
        };
        let message_id = envelope.message_id().to_string();

        let result = select! {
            biased;
            _ = self.cancel.cancelled() => {
                // Abandon the in-flight delivery; the broker will redeliver
                // it to a surviving consumer
                finalize::requeue_delivery(&self.consumer_id, &acker, &message_id).await;

                return;
            }
            result = self.handler.handle(envelope, &self.cancel) => result,
        };

        match result {
            MessageResult::Ack => {
                finalize::ack_delivery(&self.consumer_id, &acker, &message_id).await;
            }
            MessageResult::Retry => {
                finalize::requeue_delivery(&self.consumer_id, &acker, &message_id).await;
            }
            MessageResult::DeadLetter => {
                finalize::deadletter_delivery(&self.consumer_id, &acker, &message_id).await;
            }
        }
    }
}
