use crate::TopicPattern;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A live consumer registration returned by
/// [`Subscribe::subscribe`](crate::Subscribe::subscribe).
///
/// The handle ties together the binding pattern, the durable subscription
/// (consumer-group) name, the transport-side consumer identifier, and the
/// consumer pump task. [`dispose`](Subscription::dispose) terminates the
/// registration: it cancels the pump's scoped token, waits for the pump to
/// drain its in-flight delivery, and runs the transport's cleanup exactly
/// once. Disposal is idempotent; repeated calls are no-ops.
pub struct Subscription {
    consumer_id: Arc<str>,
    pattern: TopicPattern,
    subscription_name: Arc<str>,
    cancel: CancellationToken,
    pump: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Creates a new subscription handle. Intended for transport
    /// implementations; application code receives handles from
    /// [`Subscribe::subscribe`](crate::Subscribe::subscribe).
    pub fn new(
        consumer_id: impl AsRef<str>,
        pattern: TopicPattern,
        subscription_name: impl AsRef<str>,
        cancel: CancellationToken,
        pump: JoinHandle<()>,
    ) -> Self {
        Self {
            consumer_id: Arc::from(consumer_id.as_ref()),
            pattern,
            subscription_name: Arc::from(subscription_name.as_ref()),
            cancel,
            pump: AsyncMutex::new(Some(pump)),
        }
    }

    /// Exposes the transport-side consumer identifier, useful for logging.
    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    /// Exposes the binding pattern of this subscription.
    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    /// Exposes the durable consumer-group name of this subscription.
    pub fn subscription_name(&self) -> &str {
        &self.subscription_name
    }

    /// Reports whether this subscription has been disposed (or is currently
    /// being disposed).
    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Terminates this subscription: unregisters the transport consumer and
    /// drains in-flight work. After this method returns, the handler
    /// receives zero further deliveries. Idempotent.
    pub async fn dispose(&self) {
        // Signal the pump first, so it stops picking up new deliveries
        self.cancel.cancel();

        // Await the pump exactly once; concurrent/repeated calls find `None`
        let handle = self.pump.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            // The pump stays parked on its token; nothing drains it anymore
            debug!(
                consumer_id = self.consumer_id.as_ref(),
                "Dropped a subscription handle without disposing it",
            );
            self.cancel.cancel();
        }
    }
}
