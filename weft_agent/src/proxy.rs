use crate::protocol::{topics, HistoryRequest, HistoryResponse, UserMessage, UserResponse, WireMessage};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;
use weft_bus::{
    CodecError, Envelope, EnvelopeError, MessageHandler, MessageResult, Publish, PublishError,
    Subscribe, SubscribeError, Subscription, Topic, TopicPattern, TraceContext,
};
use weft_core::{FabricContext, FabricSpindown};
use weft_util::human_duration;

/// Configuration of a [`RequestProxy`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// The identity of this proxy instance. Generated fresh when absent, so
    /// that every instance receives only its own replies.
    pub proxy_id: Option<String>,
    /// How long [`send`](RequestProxy::send) waits for a final reply when
    /// the caller does not say otherwise.
    #[serde(deserialize_with = "human_duration::deserialize")]
    pub default_reply_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy_id: None,
            default_reply_timeout: Duration::from_secs(30),
        }
    }
}

/// Receives streamed intermediate replies while a request is pending; the
/// final reply resolves the [`send`](RequestProxy::send) call itself.
pub type ProgressSink = mpsc::UnboundedSender<UserResponse>;

/// The front-end collaborator that receives replies matching no pending
/// request. Injected into the proxy as an interface; the proxy never
/// constructs one.
#[async_trait]
pub trait UnsolicitedDisplay: Send + Sync {
    /// Presents a reply that arrived without a matching pending request
    /// (including late replies whose request already timed out).
    async fn show_unsolicited(&self, envelope: &Envelope, response: UserResponse);
}

/// Represents failure of a proxied request.
#[derive(Error, Debug)]
pub enum SendError {
    /// No final reply arrived within the timeout. The timeout is local: the
    /// broker never sees it, and a reply arriving later is treated as
    /// unsolicited.
    #[error("no reply arrived within the timeout")]
    NoReply,
    /// The proxy was disposed — explicitly, or because the fabric shut
    /// down — while the request was outstanding.
    #[error("the request was cancelled")]
    Cancelled,
    /// The request never left: publishing failed.
    #[error("failed to publish the request: {0}")]
    Publish(#[from] PublishError),
    /// The request payload did not encode.
    #[error("failed to encode the request payload: {0}")]
    Codec(#[from] CodecError),
    /// The request envelope did not assemble.
    #[error("failed to assemble the request envelope: {0}")]
    Envelope(#[from] EnvelopeError),
    /// The lazy history subscription could not be registered.
    #[error("failed to register the history subscription: {0}")]
    Subscribe(#[from] SubscribeError),
}

/// Turns the stateless publish/subscribe fabric into awaitable request/reply
/// interactions with streamed progress.
///
/// On [`start`](RequestProxy::start) the proxy subscribes to the well-known
/// user-reply topic under a subscription name that embeds its own
/// identifier, so each proxy instance receives only its own fan-out copy of
/// the replies. Every [`send`](RequestProxy::send) allocates a fresh
/// correlation id and parks in the pending table until the *final* reply
/// arrives; intermediate replies flow to the caller's progress sink without
/// resolving the request.
///
/// A second, structurally identical table serves history lookups on a
/// per-proxy reply topic that is subscribed lazily on first use.
///
/// The proxy is wired into the fabric lifecycle: termination of the global
/// [`FabricContext`] disposes it, so callers of [`send`](RequestProxy::send)
/// observe [`SendError::Cancelled`] within the shutdown budget instead of
/// hanging on replies that will never come.
pub struct RequestProxy {
    proxy_id: Arc<str>,
    publisher: Arc<dyn Publish>,
    subscriber: Arc<dyn Subscribe>,
    default_timeout: Duration,
    /// Outstanding requests by correlation id. Insert-then-remove is
    /// atomic; the one-shot completion guarantees at-most-one resolution.
    pending: Arc<DashMap<Arc<str>, PendingReply>>,
    /// Outstanding history lookups by correlation id.
    history_pending: Arc<DashMap<Arc<str>, oneshot::Sender<HistoryResponse>>>,
    reply_subscription: Subscription,
    /// Lazily registered on the first history lookup; the flag is the fast
    /// path of the double-checked locking, the mutex is the single-writer
    /// guard.
    history_subscribed: AtomicBool,
    history_subscription: AsyncMutex<Option<Subscription>>,
    disposed: AtomicBool,
}

/// One row of the pending table.
struct PendingReply {
    completion: oneshot::Sender<UserResponse>,
    progress: Option<ProgressSink>,
}

impl RequestProxy {
    /// Subscribes to the user-reply topic and returns a running proxy.
    pub async fn start(
        publisher: Arc<dyn Publish>,
        subscriber: Arc<dyn Subscribe>,
        display: Arc<dyn UnsolicitedDisplay>,
        config: ProxyConfig,
    ) -> Result<Arc<Self>, SubscribeError> {
        let proxy_id: Arc<str> = match config.proxy_id {
            Some(proxy_id) => Arc::from(proxy_id.as_str()),
            None => Arc::from(Uuid::new_v4().to_string()),
        };

        let pending: Arc<DashMap<Arc<str>, PendingReply>> = Arc::new(DashMap::new());

        let handler = Arc::new(ReplyHandler {
            pending: Arc::clone(&pending),
            display,
        });
        let reply_subscription = subscriber
            .subscribe(
                TopicPattern::from(&literal_topic(topics::USER_RESPONSE)),
                &format!("user-response.{}", proxy_id),
                handler,
            )
            .await?;

        let proxy = Arc::new(Self {
            proxy_id,
            publisher,
            subscriber,
            default_timeout: config.default_reply_timeout,
            pending,
            history_pending: Arc::new(DashMap::new()),
            reply_subscription,
            history_subscribed: AtomicBool::new(false),
            history_subscription: AsyncMutex::new(None),
            disposed: AtomicBool::new(false),
        });

        // Fabric termination disposes the proxy, so every outstanding
        // completion is cancelled within the shutdown budget; the spindown
        // token keeps the budget window open while that happens
        let watched = Arc::downgrade(&proxy);
        let workload = format!("proxy:{}", proxy.proxy_id);
        tokio::spawn(async move {
            let _spindown_token = FabricSpindown::register(&workload);

            FabricContext::terminated().await;

            if let Some(proxy) = watched.upgrade() {
                proxy.dispose().await;
            }
        });

        Ok(proxy)
    }

    /// Reports the identity of this proxy instance.
    pub fn proxy_id(&self) -> &str {
        &self.proxy_id
    }

    /// Sends a user message and awaits its final reply.
    ///
    /// Intermediate replies sharing the correlation id are forwarded to the
    /// given `progress` sink, leaving the request pending; the reply flagged
    /// final resolves it. When no final reply arrives within `timeout`
    /// (falling back to the configured default), the pending entry is
    /// removed and [`SendError::NoReply`] is returned.
    pub async fn send(
        &self,
        message: UserMessage,
        progress: Option<ProgressSink>,
        timeout: Option<Duration>,
    ) -> Result<UserResponse, SendError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SendError::Cancelled);
        }

        let correlation_id: Arc<str> = Arc::from(Uuid::new_v4().to_string());
        let (completion, completion_rx) = oneshot::channel();

        self.pending.insert(
            Arc::clone(&correlation_id),
            PendingReply {
                completion,
                progress,
            },
        );

        let mut builder = Envelope::builder()
            .with_payload(UserMessage::MESSAGE_TYPE, &message)?
            .with_correlation_id(correlation_id.as_ref())
            .with_reply_to(literal_topic(topics::USER_RESPONSE))
            .with_source(self.proxy_id.as_ref());
        if let Some(target) = &message.target {
            builder = builder.with_destination(target);
        }
        let envelope = builder.build()?.with_trace(&TraceContext::generate());

        if let Err(error) = self
            .publisher
            .publish(&literal_topic(topics::USER_MESSAGE), envelope)
            .await
        {
            self.pending.remove(&correlation_id);
            return Err(SendError::Publish(error));
        }

        self.await_completion(completion_rx, &correlation_id, timeout)
            .await
    }

    /// Requests the conversation history and awaits the reply.
    ///
    /// The per-proxy history reply topic is subscribed on first use.
    pub async fn history(
        &self,
        request: HistoryRequest,
        timeout: Option<Duration>,
    ) -> Result<HistoryResponse, SendError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SendError::Cancelled);
        }

        let reply_topic = self.ensure_history_subscription().await?;

        let correlation_id: Arc<str> = Arc::from(Uuid::new_v4().to_string());
        let (completion, completion_rx) = oneshot::channel();
        self.history_pending
            .insert(Arc::clone(&correlation_id), completion);

        let envelope = Envelope::builder()
            .with_payload(HistoryRequest::MESSAGE_TYPE, &request)?
            .with_correlation_id(correlation_id.as_ref())
            .with_reply_to(reply_topic)
            .with_source(self.proxy_id.as_ref())
            .build()?;

        if let Err(error) = self
            .publisher
            .publish(&literal_topic(topics::USER_HISTORY_REQUEST), envelope)
            .await
        {
            self.history_pending.remove(&correlation_id);
            return Err(SendError::Publish(error));
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(timeout, completion_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_closed)) => {
                self.history_pending.remove(&correlation_id);
                Err(SendError::Cancelled)
            }
            Err(_elapsed) => {
                self.history_pending.remove(&correlation_id);
                Err(SendError::NoReply)
            }
        }
    }

    /// Cancels every outstanding request (callers observe
    /// [`SendError::Cancelled`] rather than hanging) and disposes the
    /// proxy's subscriptions. Idempotent; also invoked automatically when
    /// the global [`FabricContext`] terminates.
    pub async fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);

        self.reply_subscription.dispose().await;
        if let Some(subscription) = self.history_subscription.lock().await.take() {
            subscription.dispose().await;
        }

        // Dropping the pending rows drops their one-shot senders, which
        // wakes every awaiting caller with a cancellation
        self.pending.clear();
        self.history_pending.clear();
    }

    /// Awaits the one-shot completion against the deadline.
    async fn await_completion(
        &self,
        completion_rx: oneshot::Receiver<UserResponse>,
        correlation_id: &Arc<str>,
        timeout: Option<Duration>,
    ) -> Result<UserResponse, SendError> {
        let timeout = timeout.unwrap_or(self.default_timeout);

        match tokio::time::timeout(timeout, completion_rx).await {
            Ok(Ok(response)) => Ok(response),

            // The sender was dropped without resolving: the proxy was
            // disposed while the request was pending
            Ok(Err(_closed)) => {
                self.pending.remove(correlation_id);
                Err(SendError::Cancelled)
            }

            // Deadline elapsed: remove the entry so a late reply is
            // treated as unsolicited
            Err(_elapsed) => {
                self.pending.remove(correlation_id);
                Err(SendError::NoReply)
            }
        }
    }

    /// Registers the per-proxy history reply subscription on first use,
    /// with double-checked locking under a single-writer guard.
    async fn ensure_history_subscription(&self) -> Result<Topic, SendError> {
        let reply_topic = topics::user_history_response(&self.proxy_id)
            .map_err(|error| SendError::Subscribe(SubscribeError::Transport(error.to_string())))?;

        if self.history_subscribed.load(Ordering::Acquire) {
            return Ok(reply_topic);
        }

        let mut guard = self.history_subscription.lock().await;
        if guard.is_some() {
            return Ok(reply_topic);
        }

        let handler = Arc::new(HistoryReplyHandler {
            pending: Arc::clone(&self.history_pending),
        });
        let subscription = self
            .subscriber
            .subscribe(
                TopicPattern::from(&reply_topic),
                &format!("history-response.{}", self.proxy_id),
                handler,
            )
            .await?;

        *guard = Some(subscription);
        self.history_subscribed.store(true, Ordering::Release);

        Ok(reply_topic)
    }
}

/// Parses a reserved topic literal.
fn literal_topic(input: &str) -> Topic {
    Topic::parse(input).expect("reserved topic literals are syntactically valid")
}

/// The bus-facing handler behind the proxy's user-reply subscription.
struct ReplyHandler {
    pending: Arc<DashMap<Arc<str>, PendingReply>>,
    display: Arc<dyn UnsolicitedDisplay>,
}

#[async_trait]
impl MessageHandler for ReplyHandler {
    async fn handle(&self, envelope: Envelope, _cancel: &CancellationToken) -> MessageResult {
        let response = match envelope.decode::<UserResponse>() {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    message_id = envelope.message_id(),
                    error_message = %error,
                    "Dead-lettering a reply that does not decode",
                );
                return MessageResult::DeadLetter;
            }
        };

        let Some(correlation_id) = envelope.correlation_id() else {
            // A reply without a correlation id cannot match anything
            self.display.show_unsolicited(&envelope, response).await;
            return MessageResult::Ack;
        };

        if response.is_final {
            // Atomic remove-and-resolve: at most one of final reply,
            // timeout, and disposal wins the entry
            match self.pending.remove(correlation_id) {
                Some((_key, entry)) => {
                    let _ = entry.completion.send(response);
                }
                None => self.display.show_unsolicited(&envelope, response).await,
            }
        } else {
            // Progress never resolves: the entry stays pending
            let forwarded = match self.pending.get(correlation_id) {
                Some(entry) => {
                    if let Some(progress) = &entry.progress {
                        let _ = progress.send(response.clone());
                    } else {
                        debug!(
                            correlation_id,
                            "Dropping a progress update for a request without a progress sink",
                        );
                    }
                    true
                }
                None => false,
            };

            if !forwarded {
                self.display.show_unsolicited(&envelope, response).await;
            }
        }

        MessageResult::Ack
    }
}

/// The bus-facing handler behind the proxy's lazy history subscription.
struct HistoryReplyHandler {
    pending: Arc<DashMap<Arc<str>, oneshot::Sender<HistoryResponse>>>,
}

#[async_trait]
impl MessageHandler for HistoryReplyHandler {
    async fn handle(&self, envelope: Envelope, _cancel: &CancellationToken) -> MessageResult {
        let response = match envelope.decode::<HistoryResponse>() {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    message_id = envelope.message_id(),
                    error_message = %error,
                    "Dead-lettering a history reply that does not decode",
                );
                return MessageResult::DeadLetter;
            }
        };

        let Some(correlation_id) = envelope.correlation_id() else {
            debug!(
                message_id = envelope.message_id(),
                "Ignoring a history reply without a correlation id",
            );
            return MessageResult::Ack;
        };

        match self.pending.remove(correlation_id) {
            Some((_key, completion)) => {
                let _ = completion.send(response);
            }
            None => {
                debug!(
                    correlation_id,
                    "Ignoring a history reply that matches no pending lookup",
                );
            }
        }

        MessageResult::Ack
    }
}
