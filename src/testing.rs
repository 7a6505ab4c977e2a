//! Shared fakes for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::json;
use tokio::time::Instant;

use crate::error::InvokeError;
use crate::mcp::{Connector, ToolChannel, ToolDescriptor, ToolManifest};
use crate::observer::Observer;
use crate::upstream::{FrameStream, InvocationRequest, Upstream};

// ── Observer ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    warnings: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub(crate) fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl Observer for RecordingObserver {
    fn warning(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

// ── Frames ────────────────────────────────────────────────────────

pub(crate) fn delta_line(text: &str) -> String {
    format!(
        "data: {}",
        json!({"event": {"contentBlockDelta": {"delta": {"text": text}}}})
    )
}

pub(crate) fn tool_line(name: &str) -> String {
    format!(
        "data: {}",
        json!({"event": {"contentBlockStart": {"start": {"toolUse": {"name": name}}}}})
    )
}

// ── Tool server ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ConnectorState {
    opened: AtomicUsize,
    closed: AtomicUsize,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
    list_calls: AtomicUsize,
    fail_connect: AtomicBool,
    fail_listing: AtomicBool,
    connect_delay: Mutex<Duration>,
    list_delay: Mutex<Duration>,
    close_delay: Mutex<Duration>,
}

/// Counts every channel it opens and closes.
#[derive(Debug, Default)]
pub(crate) struct FakeConnector {
    state: Arc<ConnectorState>,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Most channels ever open at the same time.
    pub(crate) fn max_open(&self) -> usize {
        self.state.max_open.load(Ordering::SeqCst)
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_listing(&self, fail: bool) {
        self.state.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock().unwrap() = delay;
    }

    pub(crate) fn set_list_delay(&self, delay: Duration) {
        *self.state.list_delay.lock().unwrap() = delay;
    }

    pub(crate) fn set_close_delay(&self, delay: Duration) {
        *self.state.close_delay.lock().unwrap() = delay;
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn ToolChannel>, InvokeError> {
        let delay = *self.state.connect_delay.lock().unwrap();
        pause(delay).await;
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(InvokeError::Transport("connection refused".to_string()));
        }

        let n = self.state.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let open = self.state.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_open.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(FakeChannel {
            state: Arc::clone(&self.state),
            session_id: format!("session-{n}"),
            closed: false,
        }))
    }
}

struct FakeChannel {
    state: Arc<ConnectorState>,
    session_id: String,
    closed: bool,
}

#[async_trait]
impl ToolChannel for FakeChannel {
    fn session_id(&self) -> Option<&str> {
        Some(&self.session_id)
    }

    async fn list_tools(&mut self) -> Result<ToolManifest, InvokeError> {
        self.state.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.list_delay.lock().unwrap();
        pause(delay).await;
        if self.state.fail_listing.load(Ordering::SeqCst) {
            return Err(InvokeError::Transport("tools/list failed".to_string()));
        }
        Ok(ToolManifest::new(vec![ToolDescriptor {
            name: "search".to_string(),
            description: Some("Web search".to_string()),
            input_schema: json!({"type": "object"}),
        }]))
    }

    async fn close(&mut self) -> Result<(), InvokeError> {
        let delay = *self.state.close_delay.lock().unwrap();
        pause(delay).await;
        if !self.closed {
            self.closed = true;
            self.state.closed.fetch_add(1, Ordering::SeqCst);
            self.state.open_now.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ── Upstream ──────────────────────────────────────────────────────

/// What one scripted attempt does.
pub(crate) enum Script {
    /// The invocation itself fails before any frame.
    Fail(InvokeError),
    /// Frames are yielded in order, then the stream ends, faults or stalls.
    Frames {
        lines: Vec<String>,
        fault: Option<InvokeError>,
        stall: bool,
    },
}

impl Script {
    pub(crate) fn completes(lines: Vec<String>) -> Self {
        Self::Frames {
            lines,
            fault: None,
            stall: false,
        }
    }

    pub(crate) fn faults(lines: Vec<String>, fault: InvokeError) -> Self {
        Self::Frames {
            lines,
            fault: Some(fault),
            stall: false,
        }
    }

    pub(crate) fn stalls(lines: Vec<String>) -> Self {
        Self::Frames {
            lines,
            fault: None,
            stall: true,
        }
    }
}

/// Replays one [`Script`] per invocation, in order.
#[derive(Default)]
pub(crate) struct ScriptedUpstream {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<(Instant, InvocationRequest)>>,
}

impl ScriptedUpstream {
    pub(crate) fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    pub(crate) fn requests(&self) -> Vec<InvocationRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn invoke(&self, request: InvocationRequest) -> Result<FrameStream, InvokeError> {
        self.calls.lock().unwrap().push((Instant::now(), request));
        let script = self.scripts.lock().unwrap().pop_front();

        match script {
            None => Err(InvokeError::Transport("no scripted attempt left".to_string())),
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Frames {
                lines,
                fault,
                stall,
            }) => {
                let mut items: Vec<Result<String, InvokeError>> =
                    lines.into_iter().map(Ok).collect();
                if let Some(fault) = fault {
                    items.push(Err(fault));
                }
                let frames = stream::iter(items);
                if stall {
                    Ok(frames.chain(stream::pending()).boxed())
                } else {
                    Ok(frames.boxed())
                }
            }
        }
    }
}
