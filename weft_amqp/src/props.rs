use chrono::DateTime;
use lapin::protocol::basic::AMQPProperties;
use lapin::types::{AMQPValue, FieldTable};
use thiserror::Error;
use weft_bus::{Envelope, EnvelopeError, Topic, TopicError};

/// Broker-side header that carries the envelope's routing hint, which has no
/// native AMQP property.
pub(crate) const HEADER_DESTINATION: &str = "x-destination";

/// Represents an incoming delivery whose properties cannot be reconstructed
/// into a fabric [`Envelope`]. Such deliveries are rejected without requeue.
#[derive(Error, Debug)]
pub(crate) enum MalformedDelivery {
    /// The `type` property naming the logical payload type is absent.
    #[error("the delivery carries no message type")]
    MissingMessageType,
    /// The `app-id` property naming the publisher is absent.
    #[error("the delivery carries no source identity")]
    MissingSource,
    /// The `reply-to` property is not a syntactically valid topic.
    #[error("the delivery carries an invalid reply topic: {0}")]
    InvalidReplyTo(TopicError),
    /// The envelope could not be assembled from the extracted fields.
    #[error("the delivery does not assemble into an envelope: {0}")]
    InvalidEnvelope(#[from] EnvelopeError),
}

/// Maps a fabric [`Envelope`] onto the AMQP properties of an outgoing
/// message.
///
/// Native properties carry the identity fields (`message-id`, `type`,
/// `correlation-id`, `reply-to`, `app-id`, `timestamp`); the string headers
/// travel in the field table, with the destination hint under
/// [`HEADER_DESTINATION`].
pub(crate) fn properties_for(envelope: &Envelope, durable: bool) -> AMQPProperties {
    let mut headers = FieldTable::default();

    for (key, value) in envelope.headers() {
        headers.insert(
            key.as_str().into(),
            AMQPValue::LongString(value.as_bytes().into()),
        );
    }

    if let Some(destination) = envelope.destination() {
        headers.insert(
            HEADER_DESTINATION.into(),
            AMQPValue::LongString(destination.as_bytes().into()),
        );
    }

    let mut properties = AMQPProperties::default()
        .with_message_id(envelope.message_id().into())
        .with_type(envelope.message_type().into())
        .with_app_id(envelope.source().into())
        .with_timestamp(envelope.timestamp().timestamp().max(0) as u64)
        .with_headers(headers);

    if let Some(correlation_id) = envelope.correlation_id() {
        properties = properties.with_correlation_id(correlation_id.into());
    }

    if let Some(reply_to) = envelope.reply_to() {
        properties = properties.with_reply_to(reply_to.as_str().into());
    }

    if durable {
        // Delivery mode 2: persisted by the broker
        properties = properties.with_delivery_mode(2);
    }

    properties
}

/// Reconstructs a fabric [`Envelope`] from the properties and payload of an
/// incoming delivery.
///
/// The message type and the source identity are required; a delivery missing
/// either is malformed. A missing message id or timestamp is tolerated and
/// regenerated, so foreign publishers that skip them can still be consumed.
pub(crate) fn envelope_from_parts(
    properties: &AMQPProperties,
    body: Vec<u8>,
) -> Result<Envelope, MalformedDelivery> {
    let message_type = properties
        .kind()
        .as_ref()
        .map(|value| value.as_str())
        .ok_or(MalformedDelivery::MissingMessageType)?;

    let source = properties
        .app_id()
        .as_ref()
        .map(|value| value.as_str())
        .ok_or(MalformedDelivery::MissingSource)?;

    let mut builder = Envelope::builder()
        .with_message_type(message_type)
        .with_source(source)
        .with_body(body);

    if let Some(message_id) = properties.message_id().as_ref() {
        builder = builder.with_message_id(message_id.as_str());
    }

    if let Some(correlation_id) = properties.correlation_id().as_ref() {
        builder = builder.with_correlation_id(correlation_id.as_str());
    }

    if let Some(reply_to) = properties.reply_to().as_ref() {
        let topic = Topic::parse(reply_to.as_str()).map_err(MalformedDelivery::InvalidReplyTo)?;
        builder = builder.with_reply_to(topic);
    }

    if let Some(seconds) = *properties.timestamp() {
        if let Some(timestamp) = DateTime::from_timestamp(seconds as i64, 0) {
            builder = builder.with_timestamp(timestamp);
        }
    }

    if let Some(table) = properties.headers().as_ref() {
        for (key, value) in table.inner() {
            let value = match value {
                AMQPValue::LongString(value) => value.to_string(),
                AMQPValue::ShortString(value) => value.as_str().to_string(),
                // Non-string header values have no fabric counterpart
                _ => continue,
            };

            if key.as_str() == HEADER_DESTINATION {
                builder = builder.with_destination(value);
            } else {
                builder = builder.with_header(key.as_str(), value);
            }
        }
    }

    Ok(builder.build()?)
}
