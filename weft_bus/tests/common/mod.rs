use std::sync::Arc;
use tokio::sync::mpsc;
use weft_bus::{handler_fn, Envelope, MessageHandler, MessageResult};

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
