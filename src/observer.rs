//! Observability collaborator injected into the streaming pipeline.
//!
//! Components report recoverable problems (malformed frames, failed attempts)
//! and terminal failures here instead of configuring logging themselves.

use std::sync::Arc;

/// Sink for warnings and errors raised while a session runs.
pub trait Observer: Send + Sync {
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn warning(&self, message: &str) {
        tracing::warn!(target: "agent_relay::session", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "agent_relay::session", "{}", message);
    }
}

/// Shared observer type.
pub type SharedObserver = Arc<dyn Observer>;

/// The default observer.
pub fn tracing_observer() -> SharedObserver {
    Arc::new(TracingObserver)
}
