use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::stream::ClientEvent;

/// One end-to-end user request.
///
/// Owned by the invocation driving it; dropped when the invocation ends.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    prompt: String,
    ceiling: Duration,
    deadline: Instant,
    attempt_count: u32,
    accumulated_text: String,
}

impl Session {
    /// Start a session that must finish within `ceiling` from now.
    pub fn new(prompt: impl Into<String>, ceiling: Duration) -> Self {
        Self::with_id(Uuid::new_v4(), prompt, ceiling)
    }

    /// Like [`new`](Self::new), for an id handed out before the session starts.
    pub fn with_id(id: Uuid, prompt: impl Into<String>, ceiling: Duration) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            ceiling,
            deadline: Instant::now() + ceiling,
            attempt_count: 0,
            accumulated_text: String::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Text seen during the current attempt.
    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    /// Start a new attempt and return its 1-based number.
    ///
    /// Text from the previous attempt is discarded, not merged.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.accumulated_text.clear();
        self.attempt_count
    }

    /// Append text seen during the current attempt.
    pub fn append_text(&mut self, text: &str) {
        self.accumulated_text.push_str(text);
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// The consumer's view of a running session.
///
/// `events` is the authoritative ordered output; `preview` always holds the
/// text segment in progress for live rendering. Dropping the stream cancels
/// the session and releases any tool channel it holds.
pub struct SessionStream {
    pub id: Uuid,
    pub events: BoxStream<'static, ClientEvent>,
    pub preview: watch::Receiver<String>,
}

impl SessionStream {
    /// A session that ended before any attempt started.
    pub fn failed(id: Uuid, event: ClientEvent) -> Self {
        let (_, preview) = watch::channel(String::new());
        Self {
            id,
            events: futures::stream::iter([event]).boxed(),
            preview,
        }
    }
}

impl Stream for SessionStream {
    type Item = ClientEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn attempts_start_with_empty_text() {
        let mut session = Session::new("hello", Duration::from_secs(300));
        assert_eq!(session.begin_attempt(), 1);
        session.append_text("partial");
        assert_eq!(session.accumulated_text(), "partial");

        assert_eq!(session.begin_attempt(), 2);
        assert_eq!(session.accumulated_text(), "");
        assert_eq!(session.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_counts_down() {
        let session = Session::new("hello", Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(session.remaining(), Duration::from_secs(6));
        assert!(!session.is_expired());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(session.is_expired());
        assert_eq!(session.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn failed_stream_yields_single_event() {
        let stream = SessionStream::failed(Uuid::new_v4(), ClientEvent::error("boom"));
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events, vec![ClientEvent::error("boom")]);
    }
}
