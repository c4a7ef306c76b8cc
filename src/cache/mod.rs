//! Cache Module
//!
//! Load-on-miss caching with TTL expiration and per-key single-flight
//! deduplication. Three interchangeable backends sit behind [`Cache`]:
//! disabled, local (in-process) and shared (external expiring store).

mod entry;
mod flight;
mod local;
mod shared;
mod stats;


use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::config::CacheMode;

// Re-export public types
pub use entry::CacheEntry;
pub use flight::SingleFlight;
pub use local::LocalCache;
pub use shared::{SharedCache, SharedStore, StoreError};
pub use stats::CacheStats;

// == Public Constants ==
/// Entries living shorter than this are not worth caching.
pub const MIN_TTL: Duration = Duration::from_secs(1);

// == Cache Key ==
/// Identifies one cacheable computation.
///
/// Equal logical inputs must produce equal keys, and equal keys must produce
/// the same [`CacheKey::store_key`].
pub trait CacheKey: Hash + Eq + Clone + Send + Sync + 'static {
    /// Key under which the value is kept in a shared store.
    fn store_key(&self) -> String;
}

// == Cache ==
/// A load-on-miss cache, one of a closed set of backends chosen at startup.
pub enum Cache<K, V, E> {
    /// Stores nothing, every call runs its loader
    Disabled(DisabledCache),
    /// In-process table
    Local(LocalCache<K, V, E>),
    /// External expiring store with in-process deduplication
    Shared(SharedCache<K, V, E>),
}

impl<K, V, E> Cache<K, V, E>
where
    K: CacheKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    E: Clone + From<StoreError> + Send + Sync + 'static,
{
    pub fn disabled() -> Self {
        Cache::Disabled(DisabledCache::default())
    }

    pub fn local(ttl: Duration) -> Self {
        Cache::Local(LocalCache::new(ttl))
    }

    pub fn shared(store: std::sync::Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Cache::Shared(SharedCache::new(store, ttl))
    }

    // == Get ==
    /// Returns the value for `key`, running `loader` on a miss.
    ///
    /// Among callers racing on the same missing key, `loader` runs at most
    /// once per process and every caller receives its outcome. Errors are
    /// never cached.
    pub async fn get<F, Fut>(&self, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        match self {
            Cache::Disabled(cache) => cache.get(loader).await,
            Cache::Local(cache) => cache.get(key, loader).await,
            Cache::Shared(cache) => cache.get(key, loader).await,
        }
    }

    pub fn mode(&self) -> CacheMode {
        match self {
            Cache::Disabled(_) => CacheMode::Disabled,
            Cache::Local(_) => CacheMode::Local,
            Cache::Shared(_) => CacheMode::Shared,
        }
    }

    /// Drops expired entries held in process. Only the local backend holds any.
    pub fn purge_expired(&self) -> usize {
        match self {
            Cache::Local(cache) => cache.purge_expired(),
            Cache::Disabled(_) | Cache::Shared(_) => 0,
        }
    }

    pub fn stats(&self) -> CacheStats {
        match self {
            Cache::Disabled(cache) => cache.stats(),
            Cache::Local(cache) => cache.stats(),
            Cache::Shared(cache) => cache.stats(),
        }
    }
}

// == Disabled Cache ==
/// Backend that stores nothing and never deduplicates.
#[derive(Debug, Default)]
pub struct DisabledCache {
    stats: Mutex<CacheStats>,
}

impl DisabledCache {
    pub async fn get<V, E, F, Fut>(&self, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let result = loader().await;
        lock(&self.stats).record_load(result.is_err());
        result
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.stats).clone()
    }
}

/// Locks a mutex, ignoring poisoning. Critical sections in this module never
/// leave shared state half-updated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
