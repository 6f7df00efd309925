/// The disposition a [handler](crate::MessageHandler) returns for every
/// delivered message. This is the transport's acknowledgement contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageResult {
    /// The message was processed; acknowledge it and remove it from the
    /// queue.
    Ack,
    /// Processing failed transiently; negatively acknowledge the message
    /// with requeue. A retried message may be reordered behind newer
    /// arrivals. The in-process transport converts a `Retry` into a
    /// [`DeadLetter`](MessageResult::DeadLetter) once the redelivery cap is
    /// exhausted.
    Retry,
    /// Processing failed permanently; negatively acknowledge without
    /// requeue. The AMQP transport routes such messages to the dead-letter
    /// exchange; the in-process transport discards them with a warning.
    DeadLetter,
}

impl MessageResult {
    /// Reports whether this result finalizes the message on this
    /// subscription (i.e. the message will not be delivered to it again).
    pub fn is_final(&self) -> bool {
        match self {
            MessageResult::Ack | MessageResult::DeadLetter => true,
            MessageResult::Retry => false,
        }
    }
}
