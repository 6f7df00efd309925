use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Header carrying the W3C trace-context parent, in the
/// `00-<trace id>-<span id>-<flags>` form.
pub const HEADER_TRACEPARENT: &str = "traceparent";

/// Header carrying the optional W3C vendor trace state.
pub const HEADER_TRACESTATE: &str = "tracestate";

/// Header classifying the provenance of the message content; see
/// [`ContentTrust`].
pub const HEADER_CONTENT_TRUST: &str = "content-trust";

/// Header naming the provider behind a tool invocation.
pub const HEADER_TOOL_PROVIDER: &str = "tool-provider";

/// Header carrying the caller-requested invocation deadline, in whole
/// milliseconds.
pub const HEADER_TIMEOUT_MS: &str = "timeout-ms";

/// Header carrying the processing attempt number (how many times delivery of
/// this message has already been retried).
pub const HEADER_ATTEMPT: &str = "x-attempt";

/// The recognized values of the [`HEADER_CONTENT_TRUST`] header.
///
/// Consumers that feed message content into an LLM use this classification to
/// decide how much authority the content carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentTrust {
    /// Content authored by the system itself.
    System,
    /// Content produced by a tool; may embed untrusted third-party data.
    ToolOutput,
    /// Content authored by a human user.
    User,
}

impl ContentTrust {
    /// Returns the wire value of this trust level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ContentTrust::System => "system",
            ContentTrust::ToolOutput => "tool-output",
            ContentTrust::User => "user",
        }
    }
}

impl Display for ContentTrust {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentTrust {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "system" => Ok(ContentTrust::System),
            "tool-output" => Ok(ContentTrust::ToolOutput),
            "user" => Ok(ContentTrust::User),
            _ => Err(()),
        }
    }
}
