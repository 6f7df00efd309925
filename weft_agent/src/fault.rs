use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// A failure raised by a registered handler, executor, or skill.
///
/// Faults never cross a process or message boundary as raised errors; the
/// dispatcher classifies them into an [`ErrorCode`] and either publishes a
/// typed error reply (invocation-style handlers) or logs and reports the
/// delivery disposition (fire-and-forget handlers).
#[derive(Error, Debug)]
pub enum HandlerFault {
    /// The work did not finish within its deadline. Retryable.
    #[error("the operation timed out")]
    Timeout,
    /// The request arguments were rejected. Not retryable.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// Anything else that went wrong while executing. Not retryable.
    #[error("execution failed: {0}")]
    Execution(String),
}

impl HandlerFault {
    /// Shorthand for an [`Execution`](HandlerFault::Execution) fault with
    /// the given description.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Shorthand for an
    /// [`InvalidArguments`](HandlerFault::InvalidArguments) fault with the
    /// given description.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    /// Classifies this fault into a wire-level error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            HandlerFault::Timeout => ErrorCode::Timeout,
            HandlerFault::InvalidArguments(_) => ErrorCode::InvalidArguments,
            HandlerFault::Execution(_) => ErrorCode::ExecutionFailed,
        }
    }

    /// Reports whether retrying the operation may help.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// A failed payload encode inside a handler is an execution fault.
impl From<weft_bus::CodecError> for HandlerFault {
    fn from(error: weft_bus::CodecError) -> Self {
        HandlerFault::Execution(error.to_string())
    }
}

/// The wire-level error taxonomy shared by the tool router and the
/// agent-to-agent task protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The operation did not finish within its deadline.
    Timeout,
    /// The request arguments were rejected.
    InvalidArguments,
    /// The operation started but failed.
    ExecutionFailed,
    /// No tool is registered under the requested name.
    ToolNotFound,
    /// No task exists under the requested identifier.
    TaskNotFound,
    /// The task exists but can no longer be cancelled.
    TaskNotCancelable,
    /// The serving agent does not advertise the requested skill.
    SkillNotSupported,
    /// The request shape itself was invalid.
    InvalidRequest,
}

impl ErrorCode {
    /// Reports whether retrying an operation that failed with this code may
    /// help. Only timeouts are worth retrying; everything else fails the
    /// same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::Timeout)
    }

    /// Returns the wire value of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Timeout => "timeout",
            ErrorCode::InvalidArguments => "invalid_arguments",
            ErrorCode::ExecutionFailed => "execution_failed",
            ErrorCode::ToolNotFound => "tool_not_found",
            ErrorCode::TaskNotFound => "task_not_found",
            ErrorCode::TaskNotCancelable => "task_not_cancelable",
            ErrorCode::SkillNotSupported => "skill_not_supported",
            ErrorCode::InvalidRequest => "invalid_request",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
