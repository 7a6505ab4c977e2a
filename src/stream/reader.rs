//! Deadline-bounded consumption of one attempt's frame stream.

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::accumulator::ResponseAccumulator;
use super::decoder::EventFrameDecoder;
use super::events::{ClientEvent, StreamEvent};
use crate::error::InvokeError;
use crate::observer::SharedObserver;

/// How a read ended.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    /// The accumulator's current text when reading stopped.
    pub text: String,
    /// All text seen during the read, flushed or not.
    pub transcript: String,
    /// True only when the end of the stream was observed.
    pub completed: bool,
    /// Transport fault that cut the stream short, if any.
    pub fault: Option<InvokeError>,
}

/// One unit of progress from [`TimeBoundedStreamReader::step`].
#[derive(Debug)]
pub enum ReadStep {
    /// Events for the consumer; reading continues on the next call.
    Emit(Vec<ClientEvent>),
    /// Reading stopped.
    Done(ReadOutcome),
}

/// Drives decoder and accumulator over a stream of lines until the stream
/// ends, faults, or the deadline passes.
///
/// The deadline is checked at frame boundaries: while waiting for the next
/// frame and again before processing it. Whatever was accumulated is
/// returned when it fires.
pub struct TimeBoundedStreamReader {
    decoder: EventFrameDecoder,
    accumulator: ResponseAccumulator,
    deadline: Instant,
    preview: Option<watch::Sender<String>>,
}

impl TimeBoundedStreamReader {
    pub fn new(decoder: EventFrameDecoder, observer: SharedObserver, deadline: Instant) -> Self {
        Self {
            decoder,
            accumulator: ResponseAccumulator::new(observer),
            deadline,
            preview: None,
        }
    }

    /// Publish the accumulator's current text to `preview` as it changes.
    pub fn with_preview(mut self, preview: watch::Sender<String>) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn current_text(&self) -> &str {
        self.accumulator.current_text()
    }

    /// Read until there is something to emit or reading stops.
    ///
    /// Once `Done` has been returned, further calls return `Done` again
    /// without touching `frames`.
    pub async fn step<S>(&mut self, frames: &mut S) -> ReadStep
    where
        S: Stream<Item = Result<String, InvokeError>> + Unpin,
    {
        loop {
            if self.accumulator.is_finished() {
                return ReadStep::Done(self.outcome(None));
            }
            if Instant::now() >= self.deadline {
                debug!("Read deadline reached before next frame");
                return ReadStep::Done(self.outcome(None));
            }

            let next = match tokio::time::timeout_at(self.deadline, frames.next()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!("Read deadline reached while waiting for a frame");
                    return ReadStep::Done(self.outcome(None));
                }
            };

            let event = match next {
                None => StreamEvent::StreamEnd,
                Some(Err(fault)) => {
                    debug!(error = %fault, "Stream faulted mid-read");
                    return ReadStep::Done(self.outcome(Some(fault)));
                }
                Some(Ok(line)) => {
                    if Instant::now() >= self.deadline {
                        return ReadStep::Done(self.outcome(None));
                    }
                    match self.decoder.decode(&line) {
                        Some(event) => event,
                        None => continue,
                    }
                }
            };

            let emitted = self.accumulator.push(event);
            self.publish_preview();
            if !emitted.is_empty() {
                return ReadStep::Emit(emitted);
            }
        }
    }

    /// Read `frames` to the end, collecting every emitted event.
    pub async fn read<S>(mut self, mut frames: S) -> (ReadOutcome, Vec<ClientEvent>)
    where
        S: Stream<Item = Result<String, InvokeError>> + Unpin,
    {
        let mut events = Vec::new();
        loop {
            match self.step(&mut frames).await {
                ReadStep::Emit(emitted) => events.extend(emitted),
                ReadStep::Done(outcome) => return (outcome, events),
            }
        }
    }

    fn outcome(&self, fault: Option<InvokeError>) -> ReadOutcome {
        ReadOutcome {
            text: self.accumulator.current_text().to_string(),
            transcript: self.accumulator.transcript(),
            completed: fault.is_none() && self.accumulator.is_finished(),
            fault,
        }
    }

    fn publish_preview(&self) {
        if let Some(preview) = &self.preview {
            let current = self.accumulator.current_text();
            preview.send_if_modified(|shown| {
                if shown.as_str() != current {
                    current.clone_into(shown);
                    true
                } else {
                    false
                }
            });
        }
    }
}
