#![allow(dead_code)] // not every test binary uses every helper

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use weft_agent::protocol::UserResponse;
use weft_agent::{SubscriptionSpec, UnsolicitedDisplay};
use weft_bus::{handler_fn, Envelope, MessageHandler, MessageResult, TopicPattern};

/// Builds a handler that acknowledges every delivery and forwards the
/// envelope into the returned channel for assertions.
pub fn collector() -> (
    Arc<dyn MessageHandler>,
    mpsc::UnboundedReceiver<Envelope>,
) {
    let (sender, receiver) = mpsc::unbounded_channel();

    let handler = handler_fn(move |envelope| {
        let sender = sender.clone();
        async move {
            let _ = sender.send(envelope);
            MessageResult::Ack
        }
    });

    (handler, receiver)
}

/// Awaits the next collected envelope, within one second.
pub async fn next(receiver: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("expected a delivery within one second")
        .expect("collector channel closed")
}

/// Builds a subscription spec out of string literals.
pub fn spec(pattern: &str, name: &str) -> SubscriptionSpec {
    SubscriptionSpec {
        topic_pattern: TopicPattern::parse(pattern).unwrap(),
        subscription_name: name.to_string(),
    }
}

/// A display collaborator that records unsolicited replies for assertions.
pub struct RecordingDisplay {
    sender: mpsc::UnboundedSender<UserResponse>,
}

impl RecordingDisplay {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<UserResponse>) {
        let (sender, receiver) = mpsc::unbounded_channel();

        (Arc::new(Self { sender }), receiver)
    }
}

#[async_trait]
impl UnsolicitedDisplay for RecordingDisplay {
    async fn show_unsolicited(&self, _envelope: &Envelope, response: UserResponse) {
        let _ = self.sender.send(response);
    }
}
