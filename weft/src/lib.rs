//! Weft is an agent messaging fabric: independently deployed agent
//! processes exchange typed envelopes over a topic-routed broker, subscribe
//! with durable consumer groups, correlate asynchronous replies to
//! outstanding requests, and dispatch incoming messages to registered
//! per-type handlers.
//!
//! This crate is the family entrypoint: it re-exports the component crates
//! under one roof.
//!
//! - [`bus`]: the broker abstraction (envelope, topics, traits) and the
//!   in-process transport;
//! - [`amqp`]: the AMQP transport built on `lapin`;
//! - [`agent`]: typed dispatch, request correlation, the tool router, and
//!   the agent-to-agent task protocol;
//! - [`core`]: the global fabric context and graceful shutdown;
//! - [`sync`] and [`util`]: the supporting primitives.
//!
//! A process that uses any of the components should await [`weft_shutdown`]
//! as the last thing before returning from its main logic, giving the
//! background workloads (connections, consumer pumps, proxies) their window
//! to wind down.
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

pub use weft_core::{weft_shutdown, FabricContext, FabricSpindown, TerminationCause};

/// The broker abstraction and the in-process transport.
pub mod bus {
    pub use weft_bus::*;
}

/// The AMQP transport.
pub mod amqp {
    pub use weft_amqp::*;
}

/// Typed dispatch, correlation, tools, and the task protocol.
pub mod agent {
    pub use weft_agent::*;
}

/// The global context and spindown registry.
pub mod core {
    pub use weft_core::*;
}

/// Synchronization primitives.
pub mod sync {
    pub use weft_sync::*;
}

/// Utilities.
pub mod util {
    pub use weft_util::*;
}

/// The most commonly used items in one import.
pub mod prelude {
    pub use weft_agent::{
        AgentHost, Consume, HandlerContext, HandlerFault, HostConfig, OutboundReply, ProxyConfig,
        RequestProxy, Respond, ToolExecutor, ToolRegistry, ToolRouter,
    };
    pub use weft_amqp::{AmqpConfig, AmqpTransport};
    pub use weft_bus::{
        Envelope, InProcessBus, MessageHandler, MessageResult, Publish, Subscribe, Topic,
        TopicPattern,
    };
    pub use weft_core::{weft_shutdown, FabricContext};
}
