//! Segment accumulation over decoded stream events.

use tracing::debug;

use super::events::{ClientEvent, StreamEvent};
use crate::observer::SharedObserver;

/// Longest excerpt of a malformed frame included in a warning.
const MALFORMED_EXCERPT_LEN: usize = 120;

/// Buffers text deltas into segments, splitting at tool boundaries.
///
/// Events must be pushed in arrival order. The buffer in progress is always
/// available through [`current_text`](Self::current_text), which is what gets
/// salvaged when a stream is cut short.
pub struct ResponseAccumulator {
    buffer: String,
    segments: Vec<String>,
    finished: bool,
    malformed: usize,
    observer: SharedObserver,
}

impl ResponseAccumulator {
    pub fn new(observer: SharedObserver) -> Self {
        Self {
            buffer: String::new(),
            segments: Vec::new(),
            finished: false,
            malformed: 0,
            observer,
        }
    }

    /// Consume one event and return what the consumer should see because of it.
    pub fn push(&mut self, event: StreamEvent) -> Vec<ClientEvent> {
        if self.finished {
            debug!(?event, "Ignoring event after end of stream");
            return Vec::new();
        }

        let mut out = Vec::new();
        match event {
            StreamEvent::TextDelta { text } => {
                self.buffer.push_str(&text);
            }
            StreamEvent::ToolInvocationStart { tool_name } => {
                if let Some(segment) = self.flush() {
                    out.push(ClientEvent::text(segment));
                }
                out.push(ClientEvent::tool_status(tool_name));
            }
            StreamEvent::Malformed { raw } => {
                self.malformed += 1;
                self.observer.warning(&format!(
                    "Skipping malformed stream frame: {}",
                    excerpt(&raw)
                ));
            }
            StreamEvent::StreamEnd => {
                self.finished = true;
                if !self.buffer.is_empty() {
                    // The final segment stays readable through current_text().
                    self.segments.push(self.buffer.clone());
                    out.push(ClientEvent::text(self.buffer.clone()));
                }
            }
        }
        out
    }

    /// The segment in progress, or the final segment once the stream ended.
    pub fn current_text(&self) -> &str {
        &self.buffer
    }

    /// Every piece of text seen so far, flushed or not, in order.
    pub fn transcript(&self) -> String {
        let mut text: String = self.segments.concat();
        if !self.finished {
            text.push_str(&self.buffer);
        }
        text
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let segment = std::mem::take(&mut self.buffer);
        self.segments.push(segment.clone());
        Some(segment)
    }
}

fn excerpt(raw: &str) -> String {
    if raw.chars().count() <= MALFORMED_EXCERPT_LEN {
        raw.to_string()
    } else {
        let cut: String = raw.chars().take(MALFORMED_EXCERPT_LEN).collect();
        format!("{}... [truncated]", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingObserver;
    use std::sync::Arc;

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::TextDelta { text: text.into() }
    }

    fn tool(name: &str) -> StreamEvent {
        StreamEvent::ToolInvocationStart {
            tool_name: name.into(),
        }
    }

    fn malformed() -> StreamEvent {
        StreamEvent::Malformed {
            raw: "{oops".into(),
        }
    }

    fn run(events: Vec<StreamEvent>) -> (Vec<ClientEvent>, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let mut acc = ResponseAccumulator::new(observer.clone());
        let out = events.into_iter().flat_map(|e| acc.push(e)).collect();
        (out, observer)
    }

    #[test]
    fn flushes_on_tool_boundary() {
        let (out, _) = run(vec![
            delta("A"),
            delta("B"),
            tool("search"),
            delta("C"),
            StreamEvent::StreamEnd,
        ]);
        assert_eq!(
            out,
            vec![
                ClientEvent::text("AB"),
                ClientEvent::tool_status("search"),
                ClientEvent::text("C"),
            ]
        );
    }

    #[test]
    fn malformed_frames_anywhere_change_nothing_but_the_log() {
        let base = vec![
            delta("A"),
            delta("B"),
            tool("search"),
            delta("C"),
            StreamEvent::StreamEnd,
        ];
        let (expected, _) = run(base.clone());

        for position in 0..base.len() {
            let mut events = base.clone();
            events.insert(position, malformed());
            let (out, observer) = run(events);
            assert_eq!(out, expected, "malformed frame at {position}");
            assert_eq!(observer.warnings().len(), 1);
        }
    }

    #[test]
    fn tool_boundary_with_empty_buffer_emits_only_status() {
        let (out, _) = run(vec![tool("search"), tool("fetch")]);
        assert_eq!(
            out,
            vec![ClientEvent::tool_status("search"), ClientEvent::tool_status("fetch")]
        );
    }

    #[test]
    fn current_text_tracks_buffer_and_is_idempotent() {
        let observer = Arc::new(RecordingObserver::default());
        let mut acc = ResponseAccumulator::new(observer);
        acc.push(delta("par"));
        acc.push(delta("tial"));
        assert_eq!(acc.current_text(), "partial");
        assert_eq!(acc.current_text(), "partial");

        acc.push(tool("search"));
        assert_eq!(acc.current_text(), "");
        acc.push(delta("more"));
        assert_eq!(acc.transcript(), "partialmore");
    }

    #[test]
    fn stream_end_is_terminal() {
        let observer = Arc::new(RecordingObserver::default());
        let mut acc = ResponseAccumulator::new(observer);
        acc.push(delta("done"));
        assert_eq!(acc.push(StreamEvent::StreamEnd), vec![ClientEvent::text("done")]);
        assert!(acc.is_finished());
        assert!(acc.push(delta("late")).is_empty());
        assert_eq!(acc.current_text(), "done");
        assert_eq!(acc.transcript(), "done");
    }

    #[test]
    fn long_malformed_frames_are_truncated_in_warnings() {
        let observer = Arc::new(RecordingObserver::default());
        let mut acc = ResponseAccumulator::new(observer.clone());
        acc.push(StreamEvent::Malformed { raw: "x".repeat(500) });
        let warnings = observer.warnings();
        assert!(warnings[0].ends_with("[truncated]"));
        assert_eq!(acc.malformed_count(), 1);
    }
}
