//! Local Cache Module
//!
//! In-process backend: a TTL table plus single-flight loading per key.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, trace};

use super::{lock, CacheEntry, CacheStats, SingleFlight};

#[derive(Debug)]
struct LocalState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    stats: CacheStats,
}

// == Local Cache ==
/// In-process cache with lazy expiry.
///
/// The table lock is only held for map operations, never while a loader runs.
pub struct LocalCache<K, V, E> {
    ttl: Duration,
    state: Arc<Mutex<LocalState<K, V>>>,
    flight: SingleFlight<K, Result<V, E>>,
}

impl<K, V, E> LocalCache<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Arc::new(Mutex::new(LocalState {
                entries: HashMap::new(),
                stats: CacheStats::new(),
            })),
            flight: SingleFlight::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // == Get ==
    /// Returns the cached value for `key` or loads it.
    pub async fn get<F, Fut>(&self, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(value) = self.lookup(&key) {
            return Ok(value);
        }

        let state = Arc::clone(&self.state);
        let ttl = self.ttl;
        let entry_key = key.clone();
        self.flight
            .run(key, move || async move {
                // A flight that finished after our lookup may already have
                // stored the value.
                let stored = lock(&state)
                    .entries
                    .get(&entry_key)
                    .filter(|entry| entry.is_valid())
                    .map(|entry| entry.value.clone());
                if let Some(value) = stored {
                    return Ok(value);
                }

                let result = loader().await;

                {
                    let mut guard = lock(&state);
                    let state = &mut *guard;
                    state.stats.record_load(result.is_err());
                    if let Ok(value) = &result {
                        state
                            .entries
                            .insert(entry_key, CacheEntry::new(value.clone(), ttl));
                        state.stats.set_total_entries(state.entries.len());
                    }
                }
                debug!(ok = result.is_ok(), "local cache load finished");
                result
            })
            .await
    }

    // == Lookup ==
    /// Serves a valid entry, evicting it instead if it has expired.
    fn lookup(&self, key: &K) -> Option<V> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        match state.entries.get(key) {
            Some(entry) if entry.is_valid() => {
                let value = entry.value.clone();
                state.stats.record_hit();
                trace!("local cache hit");
                Some(value)
            }
            Some(_) => {
                state.entries.remove(key);
                state.stats.record_evictions(1);
                state.stats.set_total_entries(state.entries.len());
                state.stats.record_miss();
                trace!("local cache entry expired");
                None
            }
            None => {
                state.stats.record_miss();
                trace!("local cache miss");
                None
            }
        }
    }

    // == Purge Expired ==
    /// Removes every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_valid());
        let removed = before - state.entries.len();

        state.stats.record_evictions(removed);
        state.stats.set_total_entries(state.entries.len());
        removed
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.state).stats.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
