//! Broker-agnostic messaging abstraction for the Weft fabric: the immutable
//! message [`Envelope`], the dot-separated [`Topic`] model with `*`/`#`
//! wildcard matching, the [`Publish`]/[`Subscribe`] traits that every
//! transport implements, and an [`InProcessBus`] transport for tests and
//! single-process deployments.
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Exposes the topic model and the wildcard matcher.
mod topic;
pub use self::topic::{Topic, TopicError, TopicPattern};

/// Exposes the reserved header names and typed header helpers.
mod headers;
pub use self::headers::{
    ContentTrust, HEADER_ATTEMPT, HEADER_CONTENT_TRUST, HEADER_TIMEOUT_MS, HEADER_TOOL_PROVIDER,
    HEADER_TRACEPARENT, HEADER_TRACESTATE,
};

/// Exposes the message envelope and its canonical payload codec.
mod envelope;
pub use self::envelope::{CodecError, Envelope, EnvelopeBuilder, EnvelopeError};

/// Exposes W3C trace-context propagation.
mod trace;
pub use self::trace::TraceContext;

/// Exposes the per-delivery disposition contract.
mod result;
pub use self::result::MessageResult;

/// Exposes the handler seam for incoming deliveries.
mod handler;
pub use self::handler::{handler_fn, MessageHandler};

/// Exposes the transport-facing traits.
mod fabric;
pub use self::fabric::{Publish, PublishError, Subscribe, SubscribeError};

/// Exposes the subscription handle.
mod subscription;
pub use self::subscription::Subscription;

/// Exposes the in-process transport.
mod inproc;
pub use self::inproc::{InProcessBus, InProcessConfig};
