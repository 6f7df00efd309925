use lapin::acker::Acker;
use lapin::options::{BasicAckOptions, BasicRejectOptions};
use tracing::{error, warn};

/// **Acknowledges** an incoming delivery, removing it from the queue. A
/// delivery must be finalized exactly once; failing to do so here points at
/// a broken channel, so it is logged at the error level.
pub(crate) async fn ack_delivery(consumer_id: &str, acker: &Acker, message_id: &str) {
    if let Err(error) = acker.ack(BasicAckOptions { multiple: false }).await {
        error!(
            alert = true,
            consumer_id,
            message_id,
            ?error,
            error_message = %error,
            "Failed to acknowledge an incoming AMQP message",
        );
    }
}

/// **Requeues** an incoming delivery by rejecting it with requeue; the
/// broker will redeliver it. Semantically close to just dropping the
/// delivery unacknowledged, so a failure here is only a warning.
pub(crate) async fn requeue_delivery(consumer_id: &str, acker: &Acker, message_id: &str) {
    if let Err(error) = acker.reject(BasicRejectOptions { requeue: true }).await {
        warn!(
            consumer_id,
            message_id,
            ?error,
            error_message = %error,
            "Failed to requeue an incoming AMQP message",
        );
    }
}

/// **Dead-letters** an incoming delivery by rejecting it without requeue;
/// the queue's dead-letter argument routes it to the dead-letter exchange
/// with its original routing key.
pub(crate) async fn deadletter_delivery(consumer_id: &str, acker: &Acker, message_id: &str) {
    if let Err(error) = acker.reject(BasicRejectOptions { requeue: false }).await {
        error!(
            alert = true,
            consumer_id,
            message_id,
            ?error,
            error_message = %error,
            "Failed to dead-letter an incoming AMQP message",
        );
    }
}
