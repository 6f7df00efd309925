//! The agent-facing layer of the Weft messaging fabric: typed dispatch of
//! incoming envelopes ([`AgentHost`]), request/reply correlation with
//! streamed progress ([`RequestProxy`]), the tool-invocation router
//! ([`ToolRouter`]), and the agent-to-agent task protocol ([`TaskWorker`]).
//!
//! Everything here composes against the broker abstraction of `weft_bus`
//! only; any transport (AMQP or in-process) works underneath.
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Wire-level message shapes and the reserved topic conventions.
pub mod protocol;

/// Handler fault classification.
mod fault;
pub use self::fault::{ErrorCode, HandlerFault};

/// The typed dispatcher and its composition root.
mod host;
pub use self::host::{
    AgentHost, AgentHostBuilder, Consume, HandlerContext, HostBuildError, HostConfig,
    OutboundReply, Respond, SubscriptionSpec,
};

/// The correlation proxy.
mod proxy;
pub use self::proxy::{
    ProgressSink, ProxyConfig, RequestProxy, SendError, UnsolicitedDisplay,
};

/// The tool-invocation router and registry.
mod tool;
pub use self::tool::{
    ToolExecutor, ToolRegistration, ToolRegistry, ToolRegistryError, ToolRouter, ToolRouterConfig,
};

/// The agent-to-agent task protocol.
mod a2a;
pub use self::a2a::{announce, deregister, SkillExecutor, TaskConclusion, TaskUpdates, TaskWorker};
