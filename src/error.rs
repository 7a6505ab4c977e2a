//! Error taxonomy for session invocation.
//!
//! Malformed frames are not errors: the decoder turns them into
//! [`StreamEvent::Malformed`](crate::stream::StreamEvent::Malformed) and the
//! stream continues. Everything that can end an attempt lands here.

use std::time::Duration;

use thiserror::Error;

/// Guidance appended to every terminal failure shown to a user.
pub const FAILURE_GUIDANCE: &str =
    "Check your network connection, or shorten the question and try again.";

/// Errors raised while discovering tools or invoking the upstream agent.
///
/// `Clone` so a single discovery outcome can be handed to every waiter of a
/// single-flight manifest fetch.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    /// An acquisition or an attempt ran past its deadline.
    #[error("timed out after {after:?} while {during}")]
    Timeout { during: &'static str, after: Duration },

    /// Connection refused, dropped mid-stream, or a transient upstream status.
    #[error("transport fault: {0}")]
    Transport(String),

    /// The upstream refused the request outright (4xx other than 429).
    #[error("upstream rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The tool manifest could not be fetched.
    #[error("tool discovery failed: {0}")]
    Discovery(String),

    /// The overall session ceiling was reached.
    #[error("session deadline of {0:?} exceeded")]
    SessionDeadline(Duration),

    /// Every attempt failed. `partial` is the text salvaged from the final attempt.
    #[error("gave up after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: u32,
        last: Box<InvokeError>,
        partial: String,
    },
}

impl InvokeError {
    /// Whether a fresh attempt may succeed where this one failed.
    ///
    /// Only transport faults and timeouts qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }

    /// Short classification used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Transport(_) => "transport",
            Self::Rejected { .. } => "rejected",
            Self::Discovery(_) => "discovery",
            Self::SessionDeadline(_) => "session_deadline",
            Self::ExhaustedRetries { .. } => "exhausted_retries",
        }
    }

    /// Map a reqwest failure onto the taxonomy.
    pub fn from_reqwest(err: reqwest::Error, during: &'static str) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("{during}: request timed out ({err})"))
        } else {
            Self::Transport(format!("{during}: {err}"))
        }
    }

    /// Classify a non-success HTTP status.
    ///
    /// 429 and 5xx are transient; any other status is a rejection.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::Transport(format!("upstream returned {status}: {body}"))
        } else {
            Self::Rejected {
                status: status.as_u16(),
                body,
            }
        }
    }

    /// User-facing message for a terminal failure.
    pub fn user_message(&self) -> String {
        format!("Agent execution failed: {self}. {FAILURE_GUIDANCE}")
    }
}
