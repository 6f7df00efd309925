use crate::host::{HandlerContext, OutboundReply, Respond};
use crate::protocol::{topics, ToolErrorReply, ToolInvocation, ToolResult};
use crate::{ErrorCode, HandlerFault};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use weft_bus::Topic;

/// Performs the work behind one registered tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Runs the tool for the given invocation. Returns the textual output
    /// (if any) on success; faults are classified by the router into the
    /// error reply.
    ///
    /// The `cancel` token signals host shutdown; an executor observing it
    /// should return promptly.
    async fn execute(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, HandlerFault>;
}

/// One registered tool: the metadata surfaced to discovery plus the
/// executor handle.
pub struct ToolRegistration {
    name: Arc<str>,
    description: Arc<str>,
    /// Opaque JSON-schema string describing the accepted arguments.
    parameters_schema: Arc<str>,
    /// Names the provider behind the tool (local, MCP bridge, …).
    source_tag: Arc<str>,
    executor: Arc<dyn ToolExecutor>,
    invocations: AtomicU64,
}

impl ToolRegistration {
    /// Creates a registration for the given executor.
    pub fn new(
        name: impl AsRef<str>,
        description: impl AsRef<str>,
        parameters_schema: impl AsRef<str>,
        source_tag: impl AsRef<str>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            description: Arc::from(description.as_ref()),
            parameters_schema: Arc::from(parameters_schema.as_ref()),
            source_tag: Arc::from(source_tag.as_ref()),
            executor,
            invocations: AtomicU64::new(0),
        }
    }

    /// Reports the unique tool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reports the human-readable tool description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Reports the opaque JSON-schema string for the tool arguments.
    pub fn parameters_schema(&self) -> &str {
        &self.parameters_schema
    }

    /// Reports the provider tag of the tool.
    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    /// Reports how many times this tool has been invoked in this process.
    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }
}

/// Represents failure to register a tool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolRegistryError {
    /// A tool under that name already exists. Registration is fail-closed:
    /// the collision must be resolved, not silently won.
    #[error("a tool named '{0}' is already registered")]
    Duplicate(String),
}

/// The thread-safe, unordered registry of named tools of one process.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<Arc<str>, Arc<ToolRegistration>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. Fails closed when the name is taken.
    pub fn register(&self, registration: ToolRegistration) -> Result<(), ToolRegistryError> {
        use dashmap::mapref::entry::Entry;

        let name = Arc::clone(&registration.name);

        match self.tools.entry(name) {
            Entry::Occupied(_) => Err(ToolRegistryError::Duplicate(
                registration.name.to_string(),
            )),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(registration));
                Ok(())
            }
        }
    }

    /// Removes a tool by name, returning its registration if it existed.
    pub fn unregister(&self, name: &str) -> Option<Arc<ToolRegistration>> {
        self.tools.remove(name).map(|(_key, registration)| registration)
    }

    /// Looks up a tool by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<ToolRegistration>> {
        self.tools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Reports the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Reports whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Snapshots the current registrations, e.g. for a discovery listing.
    /// The order is unspecified.
    pub fn registrations(&self) -> Vec<Arc<ToolRegistration>> {
        self.tools
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

/// Configuration of the [`ToolRouter`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolRouterConfig {
    /// Where results go when the invocation names no `reply_to`.
    pub default_result_topic: Topic,
    /// The ceiling on any invocation deadline, in milliseconds; a larger
    /// `timeout-ms` header is clamped down to this.
    pub max_timeout_ms: u64,
}

impl ToolRouterConfig {
    /// Exposes the deadline ceiling as a [`Duration`].
    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }
}

impl Default for ToolRouterConfig {
    fn default() -> Self {
        Self {
            default_result_topic: Topic::parse(topics::TOOL_RESULT)
                .expect("reserved topic literals are syntactically valid"),
            max_timeout_ms: 60_000,
        }
    }
}

/// The invocation-style handler behind the `tool.invoke` topic: looks up
/// the executor by tool name, runs it under a deadline, and replies with a
/// typed result or a classified error.
///
/// Invocation duration and count are recorded under the tool name; payload
/// contents are never recorded.
pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
    config: ToolRouterConfig,
}

impl ToolRouter {
    /// Creates a router over the given registry.
    pub fn new(registry: Arc<ToolRegistry>, config: ToolRouterConfig) -> Self {
        Self { registry, config }
    }

    /// Exposes the registry this router serves.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Resolves the effective deadline: the `timeout-ms` header clamped to
    /// the configured ceiling, or the ceiling itself when the header is
    /// absent.
    fn effective_deadline(&self, ctx: &HandlerContext) -> Duration {
        match ctx.envelope().timeout_ms() {
            Some(requested) => Duration::from_millis(requested.min(self.config.max_timeout_ms)),
            None => self.config.max_timeout(),
        }
    }

    /// Runs a looked-up tool under the deadline and shapes the reply.
    async fn run_tool(
        &self,
        registration: &ToolRegistration,
        invocation: &ToolInvocation,
        ctx: &HandlerContext,
    ) -> Result<OutboundReply, HandlerFault> {
        let deadline = self.effective_deadline(ctx);
        let started = Instant::now();

        let execution =
            tokio::time::timeout(deadline, registration.executor.execute(invocation, ctx.cancel()))
                .await;

        registration.invocations.fetch_add(1, Ordering::Relaxed);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let reply = match execution {
            // Deadline expired: a retryable timeout
            Err(_elapsed) => {
                warn!(
                    tool = registration.name(),
                    elapsed_ms,
                    deadline_ms = deadline.as_millis() as u64,
                    "Tool invocation timed out",
                );

                OutboundReply::encode(&ToolErrorReply {
                    tool_call_id: invocation.tool_call_id.clone(),
                    tool_name: invocation.tool_name.clone(),
                    code: ErrorCode::Timeout,
                    message: format!(
                        "tool '{}' exceeded its deadline of {}ms",
                        invocation.tool_name,
                        deadline.as_millis(),
                    ),
                    is_retryable: true,
                })?
            }

            Ok(Ok(content)) => {
                info!(
                    tool = registration.name(),
                    elapsed_ms,
                    invocations = registration.invocation_count(),
                    "Tool invocation completed",
                );

                OutboundReply::encode(&ToolResult {
                    tool_call_id: invocation.tool_call_id.clone(),
                    tool_name: invocation.tool_name.clone(),
                    content,
                    is_error: false,
                })?
            }

            Ok(Err(fault)) => {
                warn!(
                    tool = registration.name(),
                    elapsed_ms,
                    code = fault.code().as_str(),
                    "Tool invocation failed",
                );

                OutboundReply::encode(&ToolErrorReply {
                    tool_call_id: invocation.tool_call_id.clone(),
                    tool_name: invocation.tool_name.clone(),
                    code: fault.code(),
                    message: fault.to_string(),
                    is_retryable: fault.is_retryable(),
                })?
            }
        };

        Ok(reply)
    }
}

#[async_trait]
impl Respond<ToolInvocation> for ToolRouter {
    async fn respond(
        &self,
        invocation: ToolInvocation,
        ctx: &HandlerContext,
    ) -> Result<OutboundReply, HandlerFault> {
        let reply = match self.registry.lookup(&invocation.tool_name) {
            Some(registration) => self.run_tool(&registration, &invocation, ctx).await?,

            None => {
                warn!(
                    tool = invocation.tool_name.as_str(),
                    "Invocation of an unregistered tool",
                );

                OutboundReply::encode(&ToolErrorReply {
                    tool_call_id: invocation.tool_call_id.clone(),
                    tool_name: invocation.tool_name.clone(),
                    code: ErrorCode::ToolNotFound,
                    message: format!("no tool is registered under '{}'", invocation.tool_name),
                    is_retryable: false,
                })?
            }
        };

        Ok(reply.with_fallback_topic(self.config.default_result_topic.clone()))
    }
}
