use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::retry::RetryingInvoker;
use super::session::{Session, SessionStream};
use crate::config::Config;
use crate::error::InvokeError;
use crate::mcp::{Connector, LeasePurpose, McpHttpConnector, ScopedConnection, ToolManifestCache};
use crate::observer::{tracing_observer, SharedObserver};
use crate::stream::{ClientEvent, EventFrameDecoder};
use crate::upstream::{HttpUpstream, Upstream};

/// Entry point for running prompts against the remote agent.
///
/// Cheap to clone. Clones share the tool manifest cache, which is the only
/// state shared between sessions.
#[derive(Clone)]
pub struct Agent {
    manifests: ToolManifestCache,
    invoker: RetryingInvoker,
    manifest_ttl: Duration,
    session_deadline: Duration,
    observer: SharedObserver,
}

impl Agent {
    /// Build an agent from explicit collaborators.
    ///
    /// Discovery and execution draw separate leases from `connector`.
    pub fn new(
        upstream: Arc<dyn Upstream>,
        connector: Arc<dyn Connector>,
        config: &Config,
        observer: SharedObserver,
    ) -> Self {
        let manifests = ToolManifestCache::new(
            ScopedConnection::new(connector.clone(), LeasePurpose::Discovery),
            config.discovery_timeout,
        );
        let invoker = RetryingInvoker::new(
            upstream,
            ScopedConnection::new(connector, LeasePurpose::Execution),
            config.retry_policy(),
            observer.clone(),
        )
        .with_decoder(EventFrameDecoder::new(config.frame_data_prefix.clone()));

        Self {
            manifests,
            invoker,
            manifest_ttl: config.manifest_ttl,
            session_deadline: config.session_deadline,
            observer,
        }
    }

    /// Build an agent that talks HTTP to the configured endpoints.
    pub fn from_config(config: &Config) -> Result<Self, InvokeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| InvokeError::Transport(format!("failed to build HTTP client: {e}")))?;

        let upstream = HttpUpstream::new(
            client.clone(),
            config.agent_endpoint.clone(),
            config.agent_auth_token.clone(),
        );
        let connector = McpHttpConnector::new(
            client,
            config.mcp_server_url.clone(),
            config.mcp_auth_token.clone(),
        );

        Ok(Self::new(
            Arc::new(upstream),
            Arc::new(connector),
            config,
            tracing_observer(),
        ))
    }

    pub fn manifests(&self) -> &ToolManifestCache {
        &self.manifests
    }

    /// Start a session for `prompt`.
    ///
    /// Consults the manifest cache first; a discovery failure ends the
    /// session with a single error event and no upstream call.
    pub fn run(&self, prompt: impl Into<String>) -> SessionStream {
        let id = Uuid::new_v4();
        let prompt = prompt.into();
        let (preview_tx, preview) = watch::channel(String::new());
        let agent = self.clone();

        let events = stream! {
            // The deadline starts at the first poll, not at construction.
            let session = Session::with_id(id, prompt, agent.session_deadline);
            info!(session_id = %id, "Session started");
            let manifest = match agent.manifests.get_manifest(agent.manifest_ttl).await {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Session aborted before first attempt");
                    let message = e.user_message();
                    agent.observer.error(&message);
                    yield ClientEvent::error(message);
                    return;
                }
            };

            let mut attempts = agent.invoker.attempts(session, manifest, preview_tx);
            while let Some(event) = attempts.next().await {
                yield event;
            }
        }
        .boxed();

        SessionStream { id, events, preview }
    }
}
