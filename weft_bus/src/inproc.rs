use crate::{
    Envelope, MessageHandler, MessageResult, Publish, PublishError, Subscribe, SubscribeError,
    Subscription, Topic, TopicPattern,
};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::select;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use weft_core::{FabricContext, FabricSpindown};
use tracing::{debug, warn};

/// Configuration of the [`InProcessBus`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InProcessConfig {
    /// Capacity of each consumer-group queue. [`None`] (the default) makes
    /// the queues unbounded, which suits tests; a bounded capacity exerts
    /// backpressure on publishers.
    pub queue_capacity: Option<usize>,
    /// How many times a message may be redelivered after a
    /// [`Retry`](MessageResult::Retry) before it is treated as a
    /// [`DeadLetter`](MessageResult::DeadLetter) and discarded.
    pub max_redeliveries: u32,
}

impl Default for InProcessConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            max_redeliveries: 3,
        }
    }
}

/// An in-memory transport with the same contract as the AMQP transport:
/// topic-routed fan-out across consumer groups, competing consumers within a
/// group, and the full [`MessageResult`] state machine with an in-band retry
/// count.
///
/// There is no cross-process durability; queues evaporate on process exit.
/// Intended for tests and single-process deployments.
#[derive(Clone)]
pub struct InProcessBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    config: InProcessConfig,
    /// Live consumer groups. Delivery takes a snapshot under the lock and
    /// fans out outside of it, so no handler ever runs under this mutex.
    groups: SyncMutex<Vec<Arc<Group>>>,
}

/// One durable consumer group: a single queue shared by every subscription
/// registered under the same name, plus the set of binding patterns.
struct Group {
    name: Arc<str>,
    bindings: SyncMutex<Vec<TopicPattern>>,
    sender: QueueSender,
    receiver: Arc<AsyncMutex<QueueReceiver>>,
    members: AtomicUsize,
}

enum QueueSender {
    Bounded(mpsc::Sender<Envelope>),
    Unbounded(mpsc::UnboundedSender<Envelope>),
}

enum QueueReceiver {
    Bounded(mpsc::Receiver<Envelope>),
    Unbounded(mpsc::UnboundedReceiver<Envelope>),
}

impl InProcessBus {
    /// Creates a bus with the given configuration.
    pub fn new(config: InProcessConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                groups: SyncMutex::new(Vec::new()),
            }),
        }
    }

    /// Composes a globally unique, human-readable consumer identifier.
    fn compose_consumer_id(subscription_name: &str) -> Arc<str> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        Arc::from(format!(
            "inproc:sub:{}:{}",
            subscription_name,
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ))
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(InProcessConfig::default())
    }
}

#[async_trait]
impl Publish for InProcessBus {
    async fn publish(&self, topic: &Topic, envelope: Envelope) -> Result<(), PublishError> {
        // Snapshot the live groups before fanning out, so no handler or
        // queue send ever happens under the registry lock
        let groups = self.inner.groups.lock().clone();

        for group in groups {
            if !group.matches(topic) {
                continue;
            }

            // One copy per group; competing consumers share the queue.
            // A send error means the group died mid-fan-out, which is
            // indistinguishable from it being disposed a moment earlier.
            if group.sender.send(envelope.clone()).await.is_err() {
                debug!(
                    group = group.name.as_ref(),
                    topic = topic.as_str(),
                    "Skipped delivery to a consumer group that is gone",
                );
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Subscribe for InProcessBus {
    async fn subscribe(
        &self,
        pattern: TopicPattern,
        subscription_name: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, SubscribeError> {
        let group = self.inner.join_group(&pattern, subscription_name);

        // The pump token is a child of the global context: fabric
        // termination stops every pump, disposal stops just this one
        let cancel = FabricContext::child_token();
        let consumer_id = Self::compose_consumer_id(subscription_name);

        let pump = spawn_pump(
            Arc::clone(&self.inner),
            Arc::clone(&group),
            Arc::clone(&handler),
            cancel.clone(),
            Arc::clone(&consumer_id),
        );

        Ok(Subscription::new(
            consumer_id.as_ref(),
            pattern,
            subscription_name,
            cancel,
            pump,
        ))
    }
}

impl BusInner {
    /// Finds the consumer group with the given name, creating it if needed,
    /// registers the given binding on it, and counts the caller in as a
    /// member.
    fn join_group(&self, pattern: &TopicPattern, name: &str) -> Arc<Group> {
        let mut groups = self.groups.lock();

        if let Some(group) = groups.iter().find(|group| group.name.as_ref() == name) {
            group.add_binding(pattern);
            group.members.fetch_add(1, Ordering::Relaxed);

            return Arc::clone(group);
        }

        let group = Arc::new(Group::new(name, pattern, &self.config));
        groups.push(Arc::clone(&group));

        group
    }

    /// Counts a pump out of its group; the last member takes the group out
    /// of the registry, so future publishes stop queueing onto it.
    fn leave_group(&self, group: &Arc<Group>) {
        let mut groups = self.groups.lock();

        if group.members.fetch_sub(1, Ordering::Relaxed) == 1 {
            groups.retain(|candidate| !Arc::ptr_eq(candidate, group));
        }
    }
}

impl Group {
    fn new(name: &str, pattern: &TopicPattern, config: &InProcessConfig) -> Self {
        let (sender, receiver) = match config.queue_capacity {
            Some(capacity) => {
                let (sender, receiver) = mpsc::channel(capacity.max(1));
                (
                    QueueSender::Bounded(sender),
                    QueueReceiver::Bounded(receiver),
                )
            }
            None => {
                let (sender, receiver) = mpsc::unbounded_channel();
                (
                    QueueSender::Unbounded(sender),
                    QueueReceiver::Unbounded(receiver),
                )
            }
        };

        Self {
            name: Arc::from(name),
            bindings: SyncMutex::new(vec![pattern.clone()]),
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
            members: AtomicUsize::new(1),
        }
    }

    /// Registers an additional binding pattern, mirroring how a broker queue
    /// accumulates bindings. Bindings are never removed while the group
    /// lives.
    fn add_binding(&self, pattern: &TopicPattern) {
        let mut bindings = self.bindings.lock();

        if !bindings
            .iter()
            .any(|existing| existing.as_str() == pattern.as_str())
        {
            bindings.push(pattern.clone());
        }
    }

    /// Reports whether any binding of this group matches the given topic.
    fn matches(&self, topic: &Topic) -> bool {
        self.bindings
            .lock()
            .iter()
            .any(|pattern| pattern.matches(topic))
    }
}

impl QueueSender {
    async fn send(&self, envelope: Envelope) -> Result<(), ()> {
        match self {
            QueueSender::Bounded(sender) => sender.send(envelope).await.map_err(|_| ()),
            QueueSender::Unbounded(sender) => sender.send(envelope).map_err(|_| ()),
        }
    }

    fn try_send(&self, envelope: Envelope) -> Result<(), ()> {
        match self {
            QueueSender::Bounded(sender) => sender.try_send(envelope).map_err(|_| ()),
            QueueSender::Unbounded(sender) => sender.send(envelope).map_err(|_| ()),
        }
    }
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<Envelope> {
        match self {
            QueueReceiver::Bounded(receiver) => receiver.recv().await,
            QueueReceiver::Unbounded(receiver) => receiver.recv().await,
        }
    }
}

/// Spawns the consumer pump for one subscription.
fn spawn_pump(
    inner: Arc<BusInner>,
    group: Arc<Group>,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
    consumer_id: Arc<str>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _spindown_token = FabricSpindown::register(consumer_id.as_ref());

        pump(&inner, &group, handler.as_ref(), &cancel, &consumer_id).await;

        inner.leave_group(&group);
    })
}

/// The cooperative consumer loop: receive, invoke the handler under the
/// subscription-scoped token, translate the result into the queue operation.
async fn pump(
    inner: &BusInner,
    group: &Group,
    handler: &dyn MessageHandler,
    cancel: &CancellationToken,
    consumer_id: &str,
) {
    loop {
        // Competing consumers take turns on the single group receiver; the
        // lock is held only across the receive, never across the handler
        let envelope = {
            let mut receiver = select! {
                biased;
                _ = cancel.cancelled() => break,
                receiver = group.receiver.lock() => receiver,
            };

            select! {
                biased;
                _ = cancel.cancelled() => break,
                received = receiver.recv() => match received {
                    Some(envelope) => envelope,
                    None => break,
                },
            }
        };

        // Invoke the handler, still watching for disposal
        let result = select! {
            biased;
            _ = cancel.cancelled() => {
                // Abandoned mid-handler: put the message back for the
                // remaining members, best effort
                if group.try_requeue(envelope).is_err() {
                    warn!(
                        consumer_id,
                        "Dropped an in-flight message while disposing a subscription",
                    );
                }
                break;
            }
            result = handler.handle(envelope.clone(), cancel) => result,
        };

        match result {
            MessageResult::Ack => {}
            MessageResult::Retry => retry(inner, group, envelope, consumer_id).await,
            MessageResult::DeadLetter => {
                warn!(
                    alert = true,
                    consumer_id,
                    message_id = envelope.message_id(),
                    message_type = envelope.message_type(),
                    "Dead-lettered a message; the in-process transport discards it",
                );
            }
        }
    }
}

/// Requeues a message after a [`Retry`](MessageResult::Retry), honoring the
/// redelivery cap.
async fn retry(inner: &BusInner, group: &Group, envelope: Envelope, consumer_id: &str) {
    let attempt = envelope.attempt() + 1;

    if attempt > inner.config.max_redeliveries {
        warn!(
            alert = true,
            consumer_id,
            message_id = envelope.message_id(),
            message_type = envelope.message_type(),
            attempt,
            "Exhausted redeliveries; discarding the message",
        );
        return;
    }

    // Requeueing places the message behind newer arrivals; per-group FIFO
    // is only promised for messages that are never retried
    if group.sender.send(envelope.with_attempt(attempt)).await.is_err() {
        warn!(
            consumer_id,
            "Failed to requeue a message on a consumer group that is gone",
        );
    }
}

impl Group {
    fn try_requeue(&self, envelope: Envelope) -> Result<(), ()> {
        self.sender.try_send(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn config_defaults_from_empty() {
        // Given
        let input = "{}";
        let expected_output = InProcessConfig::default();

        // When
        let actual_output = serde_yml::from_str::<InProcessConfig>(input).unwrap();

        // Then
        assert_eq!(expected_output, actual_output);
        assert_eq!(actual_output.queue_capacity, None);
        assert_eq!(actual_output.max_redeliveries, 3);
    }

    #[test]
    fn config_deserialize_from_full() {
        // Given
        let input = "queue_capacity: 64\nmax_redeliveries: 5\n";

        // When
        let actual_output = serde_yml::from_str::<InProcessConfig>(input).unwrap();

        // Then
        assert_eq!(actual_output.queue_capacity, Some(64));
        assert_eq!(actual_output.max_redeliveries, 5);
    }

    #[test]
    fn groups_accumulate_bindings() {
        // Given
        let bus = InProcessBus::default();
        let pattern_a = TopicPattern::parse("agent.*").unwrap();
        let pattern_b = TopicPattern::parse("tool.#").unwrap();

        // When
        let group_one = bus.inner.join_group(&pattern_a, "workers");
        let group_two = bus.inner.join_group(&pattern_b, "workers");

        // Then
        assert!(Arc::ptr_eq(&group_one, &group_two));
        assert_eq!(group_one.members.load(Ordering::Relaxed), 2);
        assert!(group_one.matches(&Topic::parse("agent.task").unwrap()));
        assert!(group_one.matches(&Topic::parse("tool.invoke").unwrap()));
        assert!(!group_one.matches(&Topic::parse("user.message").unwrap()));
    }

    #[test]
    fn last_member_removes_the_group() {
        // Given
        let bus = InProcessBus::default();
        let pattern = TopicPattern::parse("agent.*").unwrap();
        let group = bus.inner.join_group(&pattern, "workers");

        // When
        bus.inner.leave_group(&group);

        // Then
        assert!(bus.inner.groups.lock().is_empty());
    }
}
