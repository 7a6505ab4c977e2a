//! Frame decoding for the upstream agent stream.
//!
//! Each line of the response body is one frame. Data frames carry a prefix
//! (`data: ` by default) followed by either a bare string literal, which is a
//! framing artifact and ignored, or a JSON object in the agent runtime's
//! event format:
//!
//! ```text
//! data: {"event": {"contentBlockStart": {"start": {"toolUse": {"name": "search"}}}}}
//! data: {"event": {"contentBlockDelta": {"delta": {"text": "Hel"}}}}
//! data: {"data": "lo"}
//! data: [DONE]
//! ```

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use super::events::StreamEvent;

/// Payload that marks the end of the stream explicitly.
pub const END_OF_STREAM_MARKER: &str = "[DONE]";

// ── Wire types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(default)]
    event: Option<FrameEvent>,
    /// Plain-text shortcut some runtimes emit alongside the raw event.
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameEvent {
    #[serde(default)]
    content_block_start: Option<ContentBlockStart>,
    #[serde(default)]
    content_block_delta: Option<ContentBlockDelta>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStart {
    #[serde(default)]
    start: Option<BlockStart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockStart {
    #[serde(default)]
    tool_use: Option<ToolUseStart>,
}

#[derive(Debug, Deserialize)]
struct ToolUseStart {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    text: Option<String>,
}

// ── Decoder ───────────────────────────────────────────────────────

/// Turns raw lines into [`StreamEvent`]s. Stateless.
#[derive(Debug, Clone)]
pub struct EventFrameDecoder {
    data_prefix: String,
}

impl Default for EventFrameDecoder {
    fn default() -> Self {
        Self::new("data: ")
    }
}

impl EventFrameDecoder {
    pub fn new(data_prefix: impl Into<String>) -> Self {
        Self {
            data_prefix: data_prefix.into(),
        }
    }

    /// Decode one line. Returns `None` for frames with no semantic content
    /// (heartbeats, comments, string literals, unrelated events).
    ///
    /// Never fails: unparseable payloads become [`StreamEvent::Malformed`].
    pub fn decode(&self, line: &str) -> Option<StreamEvent> {
        let line = line.trim_end_matches(['\r', '\n']);
        let payload = line.strip_prefix(self.data_prefix.as_str())?.trim();

        if payload.is_empty() || payload.starts_with('"') || payload.starts_with('\'') {
            return None;
        }
        if payload == END_OF_STREAM_MARKER {
            return Some(StreamEvent::StreamEnd);
        }

        let frame: Frame = match serde_json::from_str(payload) {
            Ok(frame) => frame,
            Err(e) => {
                trace!(error = %e, "Unparseable data frame");
                return Some(StreamEvent::Malformed {
                    raw: payload.to_string(),
                });
            }
        };

        let event = frame.event.unwrap_or_default();

        // A tool marker wins over any text carried in the same frame.
        if let Some(tool_use) = event
            .content_block_start
            .and_then(|block| block.start)
            .and_then(|start| start.tool_use)
        {
            return Some(StreamEvent::ToolInvocationStart {
                tool_name: tool_use.name.unwrap_or_else(|| "unknown".to_string()),
            });
        }

        let text = match frame.data {
            Some(Value::String(text)) => Some(text),
            _ => event
                .content_block_delta
                .and_then(|block| block.delta)
                .and_then(|delta| delta.text),
        };

        text.filter(|t| !t.is_empty())
            .map(|text| StreamEvent::TextDelta { text })
    }
}
