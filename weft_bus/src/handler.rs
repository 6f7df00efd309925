use crate::{Envelope, MessageResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The seam between a transport and the application: every subscription is
/// registered with a handler, and the transport's consumer pump invokes it
/// once per delivery.
///
/// The `cancel` token is scoped to the subscription lifetime. A handler that
/// observes cancellation mid-flight should return promptly with
/// [`MessageResult::Retry`] so the delivery is requeued rather than lost; it
/// must never convert a shutdown into a reply.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes a single delivered envelope and reports the disposition.
    async fn handle(&self, envelope: Envelope, cancel: &CancellationToken) -> MessageResult;
}

/// Wraps an async closure into a [`MessageHandler`], for subscriptions that
/// have no use for the cancellation token (tests, simple sinks).
pub fn handler_fn<F, Fut>(function: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MessageResult> + Send + 'static,
{
    Arc::new(FnHandler { function })
}

struct FnHandler<F> {
    function: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = MessageResult> + Send,
{
    async fn handle(&self, envelope: Envelope, _cancel: &CancellationToken) -> MessageResult {
        (self.function)(envelope).await
    }
}
