use serde::{Deserialize, Serialize};

/// One decoded frame of the upstream event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental text belonging to the segment in progress.
    TextDelta { text: String },
    /// The remote agent is about to call a tool.
    ToolInvocationStart { tool_name: String },
    /// Explicit end-of-stream marker, or the stream closed.
    StreamEnd,
    /// A data frame whose payload could not be parsed.
    Malformed { raw: String },
}

/// Events delivered to the consumer of a session, in order.
///
/// Serializes as `{"type": "text", "data": "..."}`,
/// `{"type": "tool_status", "name": "..."}` and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A completed text segment.
    Text { data: String },
    /// A tool is being used.
    ToolStatus { name: String },
    /// Recoverable problem, e.g. a failed attempt about to be retried.
    Warning { data: String },
    /// Terminal failure.
    Error { data: String },
}

impl ClientEvent {
    pub fn text(data: impl Into<String>) -> Self {
        Self::Text { data: data.into() }
    }

    pub fn tool_status(name: impl Into<String>) -> Self {
        Self::ToolStatus { name: name.into() }
    }

    pub fn warning(data: impl Into<String>) -> Self {
        Self::Warning { data: data.into() }
    }

    pub fn error(data: impl Into<String>) -> Self {
        Self::Error { data: data.into() }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_use_type_tag() {
        assert_eq!(
            serde_json::to_value(ClientEvent::text("hi")).unwrap(),
            json!({"type": "text", "data": "hi"})
        );
        assert_eq!(
            serde_json::to_value(ClientEvent::tool_status("search")).unwrap(),
            json!({"type": "tool_status", "name": "search"})
        );
        assert_eq!(
            serde_json::to_value(ClientEvent::error("boom")).unwrap(),
            json!({"type": "error", "data": "boom"})
        );
    }
}
