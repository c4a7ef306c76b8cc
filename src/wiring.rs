//! Wiring Module
//!
//! Builds the process-wide last-commit cache from configuration. The result
//! is constructed once at startup and handed to every consumer explicitly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fred::clients::Pool;
use fred::interfaces::ClientLike;
use fred::types::config::{Config as FredConfig, ReconnectPolicy, ServerConfig};
use fred::types::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapter::{Commit, CommitEntryKey, GitAdapter};
use crate::cache::{Cache, CacheKey, CacheStats, SharedStore, StoreError, MIN_TTL};
use crate::config::{CacheConfig, CacheMode, Config};
use crate::error::GitError;

const POOL_SIZE: usize = 4;

/// Upper bound on one last-commit computation. A stalled load would otherwise
/// hold its key's flight forever.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(60);

// == Backend Selection ==
/// Picks the cache backend for `config`.
///
/// A TTL below [`MIN_TTL`] disables caching whatever mode was asked for, and
/// shared mode without a store handle falls back to the local backend.
pub fn select_cache_backend<K, V, E>(
    config: &CacheConfig,
    store: Option<Arc<dyn SharedStore>>,
) -> Cache<K, V, E>
where
    K: CacheKey,
    V: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
    E: Clone + From<StoreError> + Send + Sync + 'static,
{
    let ttl = config.ttl();

    if config.mode == CacheMode::Disabled || ttl < MIN_TTL {
        info!(requested = %config.mode, ttl_secs = ttl.as_secs(), "cache disabled");
        return Cache::disabled();
    }

    match (config.mode, store) {
        (CacheMode::Shared, Some(store)) => {
            info!(ttl_secs = ttl.as_secs(), "using shared cache");
            Cache::shared(store, ttl)
        }
        (CacheMode::Shared, None) => {
            warn!("shared cache requested but no store is available, using local cache");
            Cache::local(ttl)
        }
        _ => {
            info!(ttl_secs = ttl.as_secs(), "using local cache");
            Cache::local(ttl)
        }
    }
}

// == Last Commit Cache ==
/// The last-commit cache bound to the adapter that computes its values.
pub struct LastCommitCache {
    cache: Cache<CommitEntryKey, Commit, GitError>,
    adapter: Arc<dyn GitAdapter>,
    load_timeout: Duration,
}

impl LastCommitCache {
    pub fn new(cache: Cache<CommitEntryKey, Commit, GitError>, adapter: Arc<dyn GitAdapter>) -> Self {
        Self {
            cache,
            adapter,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    pub fn with_load_timeout(mut self, load_timeout: Duration) -> Self {
        self.load_timeout = load_timeout;
        self
    }

    /// Returns the cached commit for `key`, asking the adapter on a miss.
    ///
    /// The load itself is not tied to `ctx`: other callers may be waiting on
    /// it. Cancelling `ctx` only stops this caller from waiting. A load that
    /// outlives the load timeout is dropped and fails for every waiter, and
    /// the next caller starts a fresh one.
    pub async fn get(&self, ctx: &CancellationToken, key: CommitEntryKey) -> Result<Commit, GitError> {
        let adapter = Arc::clone(&self.adapter);
        let load_timeout = self.load_timeout;
        let load_key = key.clone();
        let lookup = self.cache.get(key, move || async move {
            let load_ctx = CancellationToken::new();
            let load = adapter.get_latest_commit(
                &load_ctx,
                &load_key.repo_path,
                &load_key.commit_sha,
                &load_key.path,
            );
            match tokio::time::timeout(load_timeout, load).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        timeout_secs = load_timeout.as_secs(),
                        path = %load_key.path,
                        "last commit load timed out"
                    );
                    Err(GitError::Upstream(format!(
                        "last commit lookup timed out after {}s",
                        load_timeout.as_secs()
                    )))
                }
            }
        });

        tokio::select! {
            _ = ctx.cancelled() => Err(GitError::Cancelled),
            result = lookup => result,
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.cache.mode()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }
}

// == Shared Store ==
/// Connects to KeyDB / Redis at `endpoint` (`host:port`, optionally with a
/// `redis://` scheme) and verifies the connection with a PING.
pub async fn connect_shared_store(endpoint: &str) -> Result<Pool> {
    let endpoint = endpoint
        .trim_start_matches("rediss://")
        .trim_start_matches("redis://");
    let (host, port) = parse_host_port(endpoint)?;

    let config = FredConfig {
        server: ServerConfig::new_centralized(host, port),
        ..FredConfig::default()
    };

    let mut builder = Builder::from_config(config);
    builder.set_policy(ReconnectPolicy::new_exponential(0, 100, 30_000, 2));

    let pool = builder
        .build_pool(POOL_SIZE)
        .context("failed to build shared cache connection pool")?;
    pool.init()
        .await
        .context("failed to connect to shared cache store")?;

    let _: String = pool
        .ping(None)
        .await
        .context("shared cache store PING failed after connect")?;

    info!(host, port, pool_size = POOL_SIZE, "shared cache store connected");
    Ok(pool)
}

/// Parses a `host:port` string. If the port is omitted, defaults to `6379`.
pub fn parse_host_port(endpoint: &str) -> Result<(&str, u16)> {
    let endpoint = endpoint.split('/').next().unwrap_or(endpoint);

    if let Some((host, port_str)) = endpoint.rsplit_once(':') {
        let port: u16 = port_str
            .parse()
            .with_context(|| format!("invalid port in endpoint: {endpoint}"))?;
        Ok((host, port))
    } else {
        Ok((endpoint, 6379))
    }
}

/// Connects the shared store when the configuration asks for one.
///
/// Failure is not fatal: it is logged and the selection policy falls back to
/// the local backend.
pub async fn provide_shared_store(config: &Config) -> Option<Arc<dyn SharedStore>> {
    if config.last_commit_cache.mode != CacheMode::Shared {
        return None;
    }
    let Some(endpoint) = config.redis_endpoint.as_deref() else {
        warn!("shared cache mode set without GITRPC_REDIS_ENDPOINT");
        return None;
    };

    match connect_shared_store(endpoint).await {
        Ok(pool) => Some(Arc::new(pool)),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "shared cache store unavailable");
            None
        }
    }
}

/// Builds the last-commit cache for this process.
pub fn provide_last_commit_cache(
    config: &Config,
    store: Option<Arc<dyn SharedStore>>,
    adapter: Arc<dyn GitAdapter>,
) -> LastCommitCache {
    let cache = select_cache_backend(&config.last_commit_cache, store);
    LastCommitCache::new(cache, adapter)
}
