//! Tool manifest and its single-flight TTL cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::connection::ScopedConnection;
use crate::error::InvokeError;

/// One tool as advertised by the tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// The tools available to the remote agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolManifest {
    pub tools: Vec<ToolDescriptor>,
}

impl ToolManifest {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }
}

#[derive(Debug, Clone)]
struct ToolManifestCacheEntry {
    manifest: ToolManifest,
    expires_at: Instant,
}

type Discovery = Shared<BoxFuture<'static, Result<ToolManifest, InvokeError>>>;

#[derive(Default)]
struct CacheState {
    entry: Option<ToolManifestCacheEntry>,
    in_flight: Option<Discovery>,
}

/// Caches the tool manifest for a TTL.
///
/// On a miss, exactly one discovery call runs on its own task; concurrent
/// callers await its result. Expired entries are never served, even when a
/// refresh fails.
#[derive(Clone)]
pub struct ToolManifestCache {
    connection: ScopedConnection,
    discovery_timeout: Duration,
    state: Arc<Mutex<CacheState>>,
}

impl ToolManifestCache {
    pub fn new(connection: ScopedConnection, discovery_timeout: Duration) -> Self {
        Self {
            connection,
            discovery_timeout,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Return the cached manifest if still valid, otherwise discover it and
    /// cache the result for `ttl`.
    pub async fn get_manifest(&self, ttl: Duration) -> Result<ToolManifest, InvokeError> {
        let discovery = {
            let mut state = self.state.lock().await;

            if let Some(entry) = &state.entry {
                if Instant::now() < entry.expires_at {
                    debug!(tools = entry.manifest.len(), "Tool manifest served from cache");
                    return Ok(entry.manifest.clone());
                }
                debug!("Tool manifest expired");
                state.entry = None;
            }

            match &state.in_flight {
                Some(discovery) => discovery.clone(),
                None => {
                    // Runs to completion on its own, so a cancelled caller
                    // cannot strand the discovery lease.
                    let discovery = tokio::spawn(self.discover(ttl))
                        .map(|joined| {
                            joined.unwrap_or_else(|e| {
                                Err(InvokeError::Discovery(format!("discovery task failed: {e}")))
                            })
                        })
                        .boxed()
                        .shared();
                    state.in_flight = Some(discovery.clone());
                    discovery
                }
            }
        };

        discovery.await
    }

    /// Drop the cached entry so the next call rediscovers.
    pub async fn invalidate(&self) {
        self.state.lock().await.entry = None;
    }

    fn discover(
        &self,
        ttl: Duration,
    ) -> impl Future<Output = Result<ToolManifest, InvokeError>> + Send + 'static {
        let connection = self.connection.clone();
        let timeout = self.discovery_timeout;
        let state = Arc::clone(&self.state);

        async move {
            let result = connection
                .with_connection(timeout, |lease| lease.list_tools().boxed())
                .await
                .map_err(|e| match e {
                    InvokeError::Discovery(_) => e,
                    other => InvokeError::Discovery(other.to_string()),
                });

            let mut state = state.lock().await;
            state.in_flight = None;
            match &result {
                Ok(manifest) => {
                    info!(
                        tools = manifest.len(),
                        ttl_secs = ttl.as_secs(),
                        "Tool manifest refreshed"
                    );
                    state.entry = Some(ToolManifestCacheEntry {
                        manifest: manifest.clone(),
                        expires_at: Instant::now() + ttl,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Tool discovery failed");
                }
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::connection::LeasePurpose;
    use crate::testing::FakeConnector;
    use futures::future::join_all;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready};

    const TTL: Duration = Duration::from_secs(300);

    fn cache(connector: &Arc<FakeConnector>) -> ToolManifestCache {
        ToolManifestCache::new(
            ScopedConnection::new(connector.clone(), LeasePurpose::Discovery),
            Duration::from_secs(10),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_discovery() {
        let connector = FakeConnector::new();
        connector.set_list_delay(Duration::from_millis(50));
        let cache = cache(&connector);

        let results = join_all((0..8).map(|_| cache.get_manifest(TTL))).await;

        assert_eq!(connector.list_calls(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert_eq!(result.as_ref().unwrap(), first);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_stay_pending_until_discovery_finishes() {
        let connector = FakeConnector::new();
        connector.set_list_delay(Duration::from_secs(1));
        let cache = cache(&connector);

        let mut leader = tokio_test::task::spawn(cache.get_manifest(TTL));
        let mut follower = tokio_test::task::spawn(cache.get_manifest(TTL));
        assert_pending!(leader.poll());
        assert_pending!(follower.poll());

        tokio::time::sleep(Duration::from_secs(2)).await;

        let _ = assert_ready!(leader.poll());
        let _ = assert_ready!(follower.poll());
        assert_eq!(connector.list_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_caller_does_not_strand_the_lease() {
        let connector = FakeConnector::new();
        connector.set_list_delay(Duration::from_secs(5));
        let cache = cache(&connector);

        let mut caller = tokio_test::task::spawn(cache.get_manifest(TTL));
        assert_pending!(caller.poll());
        drop(caller);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.opened(), 1);
        assert_eq!(connector.closed(), 1);

        // The abandoned discovery still filled the cache.
        cache.get_manifest(TTL).await.unwrap();
        assert_eq!(connector.list_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn serves_cache_until_expiry() {
        let connector = FakeConnector::new();
        let cache = cache(&connector);

        cache.get_manifest(TTL).await.unwrap();
        assert_eq!(connector.list_calls(), 1);

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        cache.get_manifest(TTL).await.unwrap();
        assert_eq!(connector.list_calls(), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        cache.get_manifest(TTL).await.unwrap();
        assert_eq!(connector.list_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_never_serves_stale_entry() {
        let connector = FakeConnector::new();
        let cache = cache(&connector);

        cache.get_manifest(TTL).await.unwrap();
        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        connector.fail_listing(true);

        let err = cache.get_manifest(TTL).await.unwrap_err();
        assert!(matches!(err, InvokeError::Discovery(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_timeout_is_a_discovery_fault() {
        let connector = FakeConnector::new();
        connector.set_list_delay(Duration::from_secs(30));
        let cache = cache(&connector);

        let err = cache.get_manifest(TTL).await.unwrap_err();
        assert!(matches!(err, InvokeError::Discovery(_)));
        assert_eq!(connector.closed(), 1);

        // A later call starts a new discovery rather than awaiting the failed one.
        connector.set_list_delay(Duration::ZERO);
        assert!(cache.get_manifest(TTL).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_rediscovery() {
        let connector = FakeConnector::new();
        let cache = cache(&connector);
        cache.get_manifest(TTL).await.unwrap();
        cache.invalidate().await;
        cache.get_manifest(TTL).await.unwrap();
        assert_eq!(connector.list_calls(), 2);
    }

    #[test]
    fn descriptors_use_mcp_field_names() {
        let manifest: ToolManifest = serde_json::from_value(json!([
            {"name": "tavily_search", "description": "Search", "inputSchema": {"type": "object"}}
        ]))
        .unwrap();
        assert_eq!(manifest.names().collect::<Vec<_>>(), vec!["tavily_search"]);
        assert_eq!(manifest.tools[0].input_schema, json!({"type": "object"}));
    }
}
