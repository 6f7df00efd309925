//! AMQP 0-9-1 transport for the Weft messaging fabric, built on `lapin`.
//!
//! The transport maps the fabric's topics onto a durable topic exchange with
//! a companion dead-letter exchange, maintains a single self-healing
//! connection per process, and runs one consumer pump per subscription with
//! the fabric's retry/acknowledge/dead-letter semantics.
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Exposes the connection handle (credentials + DSN).
mod handle;
pub use self::handle::Handle;

/// Exposes the transport configuration section.
mod config;
pub use self::config::AmqpConfig;

/// Exposes machinery for maintaining a connection to the broker.
mod connector;
pub use self::connector::{Connector, Gateway};

/// Maps fabric envelopes onto AMQP properties and back.
mod props;

/// Finalizes incoming deliveries (ack / requeue / dead-letter).
mod finalize;

/// Exposes the transport itself.
mod transport;
pub use self::transport::AmqpTransport;
