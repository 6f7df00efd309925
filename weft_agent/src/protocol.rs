//! The wire-level message shapes exchanged over the fabric, and the reserved
//! topic conventions they travel on.
//!
//! Every payload is encoded with the fabric's canonical string-keyed,
//! camelCase JSON. The topic names are conventions only; no bytes on the
//! wire are special.

use crate::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use weft_bus::Topic;

/// A payload shape with a stable logical name, used by the dispatcher to
/// route envelopes to handlers without decoding them.
pub trait WireMessage {
    /// The stable logical name recorded as the envelope's `message_type`.
    const MESSAGE_TYPE: &'static str;
}

/// Reserved topic conventions of the fabric.
pub mod topics {
    use super::*;

    /// Agent cards are announced (and deregistered) here.
    pub const DISCOVERY_ANNOUNCE: &str = "discovery.announce";
    /// Tool invocation requests.
    pub const TOOL_INVOKE: &str = "tool.invoke";
    /// Default tool result topic, used when a request carries no `reply_to`.
    pub const TOOL_RESULT: &str = "tool.result";
    /// Messages submitted on behalf of a user.
    pub const USER_MESSAGE: &str = "user.message";
    /// Replies correlated to user messages.
    pub const USER_RESPONSE: &str = "user.response";
    /// Conversation history requests.
    pub const USER_HISTORY_REQUEST: &str = "user.history.request";
    /// Out-of-band user feedback.
    pub const USER_FEEDBACK: &str = "user.feedback";
    /// Requests towards the LLM gateway.
    pub const LLM_REQUEST: &str = "llm.request";
    /// Replies from the LLM gateway.
    pub const LLM_RESPONSE: &str = "llm.response";
    /// Script execution requests.
    pub const SCRIPT_INVOKE: &str = "script.invoke";

    /// The task topic of the named agent (`agent.task.<name>`).
    pub fn agent_task(agent: &str) -> Result<Topic, weft_bus::TopicError> {
        Topic::parse(format!("agent.task.{}", agent))
    }

    /// The per-agent tool result topic (`tool.result.<agent>`).
    pub fn tool_result(agent: &str) -> Result<Topic, weft_bus::TopicError> {
        Topic::parse(format!("tool.result.{}", agent))
    }

    /// The per-agent script result topic (`script.result.<agent>`).
    pub fn script_result(agent: &str) -> Result<Topic, weft_bus::TopicError> {
        Topic::parse(format!("script.result.{}", agent))
    }

    /// The per-proxy history reply topic
    /// (`user.history.response.<proxy id>`).
    pub fn user_history_response(proxy_id: &str) -> Result<Topic, weft_bus::TopicError> {
        Topic::parse(format!("user.history.response.{}", proxy_id))
    }
}

/// A message submitted on behalf of a user, the request side of the
/// correlation proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    /// The textual content of the message.
    pub content: String,
    /// Optional name of the agent this message is directed at; carried as
    /// the envelope's routing hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// A reply correlated to a [`UserMessage`]. Replies with `is_final = false`
/// are streamed progress updates; exactly one final reply completes the
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    /// The textual content of the reply.
    pub content: String,
    /// Whether this reply completes the request.
    pub is_final: bool,
}

/// A request for the conversation history visible to the serving agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    /// Optional session scope; absent means the current session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// One entry of a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Who authored the entry (e.g. `user`, `assistant`).
    pub role: String,
    /// The textual content of the entry.
    pub content: String,
}

/// The reply to a [`HistoryRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    /// The entries, oldest first.
    pub entries: Vec<HistoryEntry>,
}

/// A request to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Caller-chosen identifier echoed back in the reply.
    pub tool_call_id: String,
    /// The registered name of the tool to invoke.
    pub tool_name: String,
    /// Opaque JSON arguments, validated by the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    /// Optional session scope of the invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// The successful reply to a [`ToolInvocation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// The identifier from the invocation.
    pub tool_call_id: String,
    /// The name of the invoked tool.
    pub tool_name: String,
    /// The textual output of the tool, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Always `false` on this shape; failures travel as [`ToolErrorReply`].
    pub is_error: bool,
}

/// The classified failure reply to a [`ToolInvocation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolErrorReply {
    /// The identifier from the invocation.
    pub tool_call_id: String,
    /// The name of the tool the invocation asked for.
    pub tool_name: String,
    /// The classified error code.
    pub code: ErrorCode,
    /// Human-readable description of the failure.
    pub message: String,
    /// Whether retrying the invocation may help.
    pub is_retryable: bool,
}

/// A generic classified error reply, used by invocation-style handlers that
/// have no richer error shape of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    /// The classified error code.
    pub code: ErrorCode,
    /// Human-readable description of the failure.
    pub message: String,
    /// Whether retrying the request may help.
    pub is_retryable: bool,
}

/// A capability self-description, announced on
/// [`discovery.announce`](topics::DISCOVERY_ANNOUNCE) when an agent starts
/// and re-announced with `is_deregistering = true` on graceful stop.
///
/// The deregistration flag is authoritative: directories evict the card on
/// receipt and never infer liveness from message timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    /// The unique agent name.
    pub name: String,
    /// Human-readable description of the agent.
    pub description: String,
    /// The agent version string.
    pub version: String,
    /// The skills this agent serves.
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    /// Whether this card announces departure rather than availability.
    #[serde(default)]
    pub is_deregistering: bool,
}

/// One advertised skill of an [`AgentCard`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    /// The skill name, matched against task requests.
    pub name: String,
    /// Human-readable description of the skill.
    pub description: String,
}

/// The lifecycle state of an agent-to-agent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// The task has been received but not started.
    Submitted,
    /// The task is being worked on; progress may be streamed.
    Working,
    /// The task finished successfully.
    Completed,
    /// The task was cancelled before completion.
    Cancelled,
    /// The task failed.
    Failed,
}

impl TaskState {
    /// Reports whether this state terminates the task lifecycle.
    pub fn is_terminal(&self) -> bool {
        match self {
            TaskState::Submitted | TaskState::Working => false,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed => true,
        }
    }
}

impl Display for TaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Submitted => "submitted",
            TaskState::Working => "working",
            TaskState::Completed => "completed",
            TaskState::Cancelled => "cancelled",
            TaskState::Failed => "failed",
        };

        f.write_str(name)
    }
}

/// A request to run a long-running task, published to
/// [`agent.task.<target>`](topics::agent_task) with a `reply_to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTaskRequest {
    /// Submitter-chosen task identifier.
    pub task_id: String,
    /// Optional conversation context the task belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    /// The skill asked for; must be advertised by the serving agent.
    pub skill: String,
    /// The task input.
    pub message: String,
}

/// A request to cancel a task previously submitted to the serving agent,
/// published on the same `agent.task.<target>` topic with a `reply_to`.
///
/// The worker answers with either an [`AgentTaskResult`] in the
/// [`Cancelled`](TaskState::Cancelled) state (cancellation accepted) or an
/// [`AgentTaskError`] carrying `task_not_found` or `task_not_cancelable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTaskCancelRequest {
    /// The task to cancel.
    pub task_id: String,
}

/// A streamed status update for a task in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTaskStatusUpdate {
    /// The task this update belongs to.
    pub task_id: String,
    /// The state the task transitioned into.
    pub state: TaskState,
    /// Optional human-readable progress note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The terminal reply for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTaskResult {
    /// The task this result concludes.
    pub task_id: String,
    /// The terminal state: completed, cancelled, or failed.
    pub state: TaskState,
    /// The task output (or the reason for not completing).
    pub message: String,
}

/// The classified failure reply for a task that could not be run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTaskError {
    /// The task the failure refers to.
    pub task_id: String,
    /// The classified error code.
    pub code: ErrorCode,
    /// Human-readable description of the failure.
    pub message: String,
    /// Whether re-submitting the task may help.
    pub is_retryable: bool,
}

impl WireMessage for UserMessage {
    const MESSAGE_TYPE: &'static str = "user-message";
}

impl WireMessage for UserResponse {
    const MESSAGE_TYPE: &'static str = "user-response";
}

impl WireMessage for HistoryRequest {
    const MESSAGE_TYPE: &'static str = "history-request";
}

impl WireMessage for HistoryResponse {
    const MESSAGE_TYPE: &'static str = "history-response";
}

impl WireMessage for ToolInvocation {
    const MESSAGE_TYPE: &'static str = "tool-invocation";
}

impl WireMessage for ToolResult {
    const MESSAGE_TYPE: &'static str = "tool-result";
}

impl WireMessage for ToolErrorReply {
    const MESSAGE_TYPE: &'static str = "tool-error";
}

impl WireMessage for ErrorReply {
    const MESSAGE_TYPE: &'static str = "error";
}

impl WireMessage for AgentCard {
    const MESSAGE_TYPE: &'static str = "agent-card";
}

impl WireMessage for AgentTaskRequest {
    const MESSAGE_TYPE: &'static str = "agent-task-request";
}

impl WireMessage for AgentTaskCancelRequest {
    const MESSAGE_TYPE: &'static str = "agent-task-cancel";
}

impl WireMessage for AgentTaskStatusUpdate {
    const MESSAGE_TYPE: &'static str = "agent-task-status";
}

impl WireMessage for AgentTaskResult {
    const MESSAGE_TYPE: &'static str = "agent-task-result";
}

impl WireMessage for AgentTaskError {
    const MESSAGE_TYPE: &'static str = "agent-task-error";
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn payloads_serialize_camel_cased() {
        // Given
        let invocation = ToolInvocation {
            tool_call_id: "t1".to_string(),
            tool_name: "search".to_string(),
            arguments: None,
            session_id: None,
        };

        // When
        let json = serde_json::to_string(&invocation).unwrap();

        // Then
        assert_eq!(json, r#"{"toolCallId":"t1","toolName":"search"}"#);
    }

    #[test]
    fn task_states_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskState::Working).unwrap(),
            r#""working""#,
        );
        assert_eq!(
            serde_json::from_str::<TaskState>(r#""cancelled""#).unwrap(),
            TaskState::Cancelled,
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Submitted.is_terminal());
        assert!(!TaskState::Working.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Failed.is_terminal());
    }

    #[test]
    fn agent_card_tolerates_missing_deregistration_flag() {
        // Given: a card serialized by a peer that predates the flag
        let json = r#"{"name":"worker","description":"d","version":"1.0","skills":[]}"#;

        // When
        let card = serde_json::from_str::<AgentCard>(json).unwrap();

        // Then
        assert!(!card.is_deregistering);
    }

    #[test]
    fn dynamic_topics_compose() {
        assert_eq!(
            topics::agent_task("researcher").unwrap().as_str(),
            "agent.task.researcher",
        );
        assert_eq!(
            topics::user_history_response("p1").unwrap().as_str(),
            "user.history.response.p1",
        );
        assert!(topics::agent_task("bad name with spaces").is_ok()); // spaces are opaque to the topic model
        assert!(topics::agent_task("").is_err());
    }
}
