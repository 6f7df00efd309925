use crate::headers::{HEADER_ATTEMPT, HEADER_CONTENT_TRUST, HEADER_TIMEOUT_MS};
use crate::{ContentTrust, Topic, TraceContext};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// The framing record around every message on the fabric, carrying routing,
/// correlation, trace, and payload fields.
///
/// Envelopes are immutable: every `with_…` method produces a new envelope and
/// leaves the original untouched. The payload is an opaque byte sequence; the
/// fabric's canonical encoding for typed payloads is string-keyed, camelCase
/// JSON (see [`EnvelopeBuilder::with_payload`] and [`Envelope::decode`]), but
/// any encoding may be carried as long as `message_type` allows the receiving
/// dispatcher to route without decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Opaque unique identifier of this message.
    message_id: Arc<str>,
    /// Stable logical name of the payload type, chosen by the publisher.
    message_type: Arc<str>,
    /// Identifier tying a reply to the request that spawned it.
    correlation_id: Option<Arc<str>>,
    /// The topic on which the publisher expects a reply, if any.
    reply_to: Option<Topic>,
    /// Identity of the publishing party.
    source: Arc<str>,
    /// Optional routing hint naming the intended receiver.
    destination: Option<Arc<str>>,
    /// The moment this envelope was created, in UTC.
    timestamp: DateTime<Utc>,
    /// The opaque payload bytes.
    body: Vec<u8>,
    /// String-to-string headers; insertion order is irrelevant.
    headers: HashMap<String, String>,
}

/// Builds an [`Envelope`] incrementally; see [`Envelope::builder`].
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    message_id: Option<Arc<str>>,
    message_type: Option<Arc<str>>,
    correlation_id: Option<Arc<str>>,
    reply_to: Option<Topic>,
    source: Option<Arc<str>>,
    destination: Option<Arc<str>>,
    timestamp: Option<DateTime<Utc>>,
    body: Vec<u8>,
    headers: HashMap<String, String>,
}

/// Represents failure to build an [`Envelope`] out of incomplete inputs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The builder was finalized without a message type.
    #[error("an envelope requires a message type")]
    MissingMessageType,
    /// The builder was finalized without a source identity.
    #[error("an envelope requires a source identity")]
    MissingSource,
}

/// Represents failure to encode or decode a typed payload with the fabric's
/// canonical JSON encoding.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A typed value could not be encoded into payload bytes.
    #[error("failed to encode a payload of message type '{message_type}': {source}")]
    Encode {
        /// The logical message type that was being encoded.
        message_type: String,
        /// The underlying serialization error.
        source: serde_json::Error,
    },
    /// Payload bytes could not be decoded into the requested type.
    #[error("malformed payload of message type '{message_type}': {source}")]
    Malformed {
        /// The logical message type carried by the envelope.
        message_type: String,
        /// The underlying deserialization error.
        source: serde_json::Error,
    },
}

impl Envelope {
    /// Creates a new [`EnvelopeBuilder`].
    ///
    /// The builder generates a fresh `message_id` and a current UTC
    /// `timestamp` unless they are provided explicitly.
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::default()
    }
}

impl Envelope {
    /// Exposes the unique identifier of this message.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Exposes the logical name of the payload type.
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Exposes the correlation identifier, if present.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Exposes the reply topic, if present.
    pub fn reply_to(&self) -> Option<&Topic> {
        self.reply_to.as_ref()
    }

    /// Exposes the identity of the publishing party.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Exposes the routing hint naming the intended receiver, if present.
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Exposes the creation timestamp of this envelope.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Exposes the opaque payload bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Exposes the header value under the given name, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Exposes the full header map.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }
}

impl Envelope {
    /// Decodes the payload bytes into the requested type using the fabric's
    /// canonical JSON encoding. Fails with a *malformed payload* error when
    /// the bytes cannot be decoded.
    pub fn decode<T>(&self) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|source| CodecError::Malformed {
            message_type: self.message_type.to_string(),
            source,
        })
    }

    /// Reports the processing attempt number carried in-band by this
    /// envelope. An envelope that has never been retried reports zero.
    pub fn attempt(&self) -> u32 {
        self.header(HEADER_ATTEMPT)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    /// Reports the caller-requested invocation deadline in milliseconds, if
    /// the header is present and parseable.
    pub fn timeout_ms(&self) -> Option<u64> {
        self.header(HEADER_TIMEOUT_MS)
            .and_then(|value| value.parse().ok())
    }

    /// Reports the content-trust classification of this envelope, if the
    /// header is present and recognized.
    pub fn content_trust(&self) -> Option<ContentTrust> {
        self.header(HEADER_CONTENT_TRUST)
            .and_then(|value| value.parse().ok())
    }

    /// Extracts the remote trace context propagated in this envelope's
    /// headers, if a well-formed one is present.
    pub fn trace_context(&self) -> Option<TraceContext> {
        TraceContext::extract(&self.headers)
    }
}

impl Envelope {
    /// Returns a new envelope with the given header added (or replaced). The
    /// original envelope is left untouched.
    pub fn with_header(&self, name: impl Into<String>, value: impl Into<String>) -> Envelope {
        let mut copy = self.clone();
        copy.headers.insert(name.into(), value.into());

        copy
    }

    /// Returns a new envelope with the attempt header set to the given value.
    pub fn with_attempt(&self, attempt: u32) -> Envelope {
        self.with_header(HEADER_ATTEMPT, attempt.to_string())
    }

    /// Returns a new envelope with the content-trust header set.
    pub fn with_content_trust(&self, trust: ContentTrust) -> Envelope {
        self.with_header(HEADER_CONTENT_TRUST, trust.as_str())
    }

    /// Returns a new envelope with the given trace context injected into the
    /// headers.
    pub fn with_trace(&self, context: &TraceContext) -> Envelope {
        let mut copy = self.clone();
        context.inject(&mut copy.headers);

        copy
    }
}

impl EnvelopeBuilder {
    /// Sets the unique message identifier. When absent, a fresh UUID is
    /// generated at [build](EnvelopeBuilder::build) time.
    pub fn with_message_id(mut self, message_id: impl AsRef<str>) -> Self {
        self.message_id = Some(Arc::from(message_id.as_ref()));

        self
    }

    /// Sets the logical name of the payload type. Required.
    pub fn with_message_type(mut self, message_type: impl AsRef<str>) -> Self {
        self.message_type = Some(Arc::from(message_type.as_ref()));

        self
    }

    /// Sets the correlation identifier.
    pub fn with_correlation_id(mut self, correlation_id: impl AsRef<str>) -> Self {
        self.correlation_id = Some(Arc::from(correlation_id.as_ref()));

        self
    }

    /// Sets the reply topic. The topic type guarantees syntactic validity.
    pub fn with_reply_to(mut self, reply_to: Topic) -> Self {
        self.reply_to = Some(reply_to);

        self
    }

    /// Sets the identity of the publishing party. Required.
    pub fn with_source(mut self, source: impl AsRef<str>) -> Self {
        self.source = Some(Arc::from(source.as_ref()));

        self
    }

    /// Sets the routing hint naming the intended receiver.
    pub fn with_destination(mut self, destination: impl AsRef<str>) -> Self {
        self.destination = Some(Arc::from(destination.as_ref()));

        self
    }

    /// Sets the creation timestamp. When absent, the current UTC time is
    /// recorded at [build](EnvelopeBuilder::build) time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);

        self
    }

    /// Sets the payload to the given raw bytes.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;

        self
    }

    /// Encodes the given typed value with the fabric's canonical JSON
    /// encoding and sets it as the payload, recording the given logical
    /// message type.
    pub fn with_payload<T>(
        self,
        message_type: impl AsRef<str>,
        payload: &T,
    ) -> Result<Self, CodecError>
    where
        T: Serialize,
    {
        let message_type = message_type.as_ref();
        let body = serde_json::to_vec(payload).map_err(|source| CodecError::Encode {
            message_type: message_type.to_string(),
            source,
        })?;

        Ok(self.with_message_type(message_type).with_body(body))
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());

        self
    }

    /// Finalizes the builder into an immutable [`Envelope`], generating the
    /// message identifier and the timestamp where absent.
    pub fn build(self) -> Result<Envelope, EnvelopeError> {
        let message_type = self.message_type.ok_or(EnvelopeError::MissingMessageType)?;
        let source = self.source.ok_or(EnvelopeError::MissingSource)?;

        let message_id = self
            .message_id
            .unwrap_or_else(|| Arc::from(Uuid::new_v4().to_string()));
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);

        Ok(Envelope {
            message_id,
            message_type,
            correlation_id: self.correlation_id,
            reply_to: self.reply_to,
            source,
            destination: self.destination,
            timestamp,
            body: self.body,
            headers: self.headers,
        })
    }
}
