//! Scoped, timeout-bounded leases on the MCP tool channel.
//!
//! Every lease is built fresh from a [`Connector`] and closed when its scope
//! ends, whether that is a normal return, an error, a timeout, or the owning
//! future being dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::manifest::ToolManifest;
use crate::error::InvokeError;

/// An open channel to the tool server.
#[async_trait]
pub trait ToolChannel: Send {
    /// Server-assigned session id, if the transport has one.
    fn session_id(&self) -> Option<&str>;

    async fn list_tools(&mut self) -> Result<ToolManifest, InvokeError>;

    async fn close(&mut self) -> Result<(), InvokeError>;
}

/// Builds a fresh [`ToolChannel`] on every call.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ToolChannel>, InvokeError>;
}

/// What a lease is held for. Discovery and execution never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeasePurpose {
    Discovery,
    Execution,
}

impl fmt::Display for LeasePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery"),
            Self::Execution => write!(f, "execution"),
        }
    }
}

/// Exclusive ownership of one tool channel.
///
/// Call [`release`](Self::release) to close it. A lease that is dropped
/// instead (cancellation) closes its channel on a background task.
pub struct ConnectionLease {
    channel: Option<Box<dyn ToolChannel>>,
    purpose: LeasePurpose,
    acquired_at: Instant,
}

impl ConnectionLease {
    pub fn purpose(&self) -> LeasePurpose {
        self.purpose
    }

    pub fn session_id(&self) -> Option<String> {
        self.channel
            .as_ref()
            .and_then(|c| c.session_id())
            .map(str::to_string)
    }

    pub async fn list_tools(&mut self) -> Result<ToolManifest, InvokeError> {
        match self.channel.as_mut() {
            Some(channel) => channel.list_tools().await,
            None => Err(InvokeError::Transport("lease already released".to_string())),
        }
    }

    /// Close the channel and end the lease.
    ///
    /// The channel stays owned by the lease until `close` returns, so a
    /// release that is itself cancelled still falls back to `Drop`.
    pub async fn release(mut self) {
        if let Some(channel) = self.channel.as_mut() {
            if let Err(e) = channel.close().await {
                warn!(purpose = %self.purpose, error = %e, "Failed to close tool channel");
            }
            self.channel = None;
            debug!(
                purpose = %self.purpose,
                held_ms = self.acquired_at.elapsed().as_millis() as u64,
                "Tool channel released"
            );
        }
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        let Some(mut channel) = self.channel.take() else {
            return;
        };
        let purpose = self.purpose;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(purpose = %purpose, "Lease dropped without release; closing in background");
                handle.spawn(async move {
                    if let Err(e) = channel.close().await {
                        warn!(purpose = %purpose, error = %e, "Failed to close abandoned tool channel");
                    }
                });
            }
            Err(_) => {
                warn!(purpose = %purpose, "Lease dropped outside a runtime; channel not closed");
            }
        }
    }
}

/// Hands out short-lived leases for one purpose.
#[derive(Clone)]
pub struct ScopedConnection {
    connector: Arc<dyn Connector>,
    purpose: LeasePurpose,
}

impl ScopedConnection {
    pub fn new(connector: Arc<dyn Connector>, purpose: LeasePurpose) -> Self {
        Self { connector, purpose }
    }

    pub fn purpose(&self) -> LeasePurpose {
        self.purpose
    }

    /// Open a new lease, failing if the connection is not up within `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> Result<ConnectionLease, InvokeError> {
        let channel = match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                warn!(purpose = %self.purpose, error = %e, "Tool channel connection failed");
                return Err(e);
            }
            Err(_) => {
                warn!(
                    purpose = %self.purpose,
                    timeout_secs = timeout.as_secs_f64(),
                    "Tool channel connection timed out"
                );
                return Err(InvokeError::Timeout {
                    during: "connecting to the tool server",
                    after: timeout,
                });
            }
        };

        Ok(ConnectionLease {
            channel: Some(channel),
            purpose: self.purpose,
            acquired_at: Instant::now(),
        })
    }

    /// Run `f` with a lease, bounding acquisition and `f` together by `timeout`.
    ///
    /// The lease is released on every exit path. `f` never runs if
    /// acquisition times out.
    pub async fn with_connection<T, F>(&self, timeout: Duration, f: F) -> Result<T, InvokeError>
    where
        F: for<'l> FnOnce(&'l mut ConnectionLease) -> BoxFuture<'l, Result<T, InvokeError>>,
    {
        let deadline = Instant::now() + timeout;
        let mut lease = self.acquire(timeout).await?;

        let result = match tokio::time::timeout_at(deadline, f(&mut lease)).await {
            Ok(result) => result,
            Err(_) => Err(InvokeError::Timeout {
                during: match self.purpose {
                    LeasePurpose::Discovery => "discovering tools",
                    LeasePurpose::Execution => "using the tool channel",
                },
                after: timeout,
            }),
        };

        lease.release().await;
        result
    }
}
