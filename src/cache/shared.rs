//! Shared Cache Module
//!
//! Backend keeping values in an external expiring key/value store so several
//! server processes can reuse each other's results.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fred::interfaces::KeysInterface;
use fred::types::Expiration;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::{lock, CacheKey, CacheStats, SingleFlight};

// == Store Error ==
/// Failure talking to the shared store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("shared store read failed: {0}")]
    Read(String),

    #[error("shared store write failed: {0}")]
    Write(String),
}

// == Shared Store ==
/// External store holding expiring string values.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;
}

#[async_trait]
impl SharedStore for fred::clients::Pool {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = KeysInterface::get(self, key)
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let seconds = ttl.as_secs().max(1) as i64;
        let _: () = KeysInterface::set(self, key, value, Some(Expiration::EX(seconds)), None, false)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(())
    }
}

// == Shared Cache ==
/// Cache backed by a [`SharedStore`].
///
/// Exclusivity across processes is best effort: two processes may both load
/// a key, and the last write wins. Within one process, loads are deduplicated
/// per key.
pub struct SharedCache<K, V, E> {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
    flight: SingleFlight<K, Result<V, E>>,
    stats: Arc<Mutex<CacheStats>>,
}

impl<K, V, E> SharedCache<K, V, E>
where
    K: CacheKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    E: Clone + From<StoreError> + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            flight: SingleFlight::new(),
            stats: Arc::new(Mutex::new(CacheStats::new())),
        }
    }

    // == Get ==
    /// Reads `key` from the store, loading and writing it back on a miss.
    ///
    /// A store read failure is returned to the caller. A store write failure
    /// is only logged since the loaded value is still good.
    pub async fn get<F, Fut>(&self, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let stats = Arc::clone(&self.stats);
        let ttl = self.ttl;
        let store_key = key.store_key();

        self.flight
            .run(key, move || async move {
                match store.get(&store_key).await {
                    Ok(Some(raw)) => match serde_json::from_str::<V>(&raw) {
                        Ok(value) => {
                            lock(&stats).record_hit();
                            trace!(key = %store_key, "shared cache hit");
                            return Ok(value);
                        }
                        Err(err) => {
                            warn!(key = %store_key, error = %err, "discarding undecodable shared cache value");
                        }
                    },
                    Ok(None) => {}
                    Err(err) => {
                        warn!(key = %store_key, error = %err, "shared cache unavailable");
                        return Err(E::from(err));
                    }
                }
                lock(&stats).record_miss();

                let result = loader().await;
                lock(&stats).record_load(result.is_err());

                if let Ok(value) = &result {
                    match serde_json::to_string(value) {
                        Ok(raw) => {
                            if let Err(err) = store.set(&store_key, raw, ttl).await {
                                warn!(key = %store_key, error = %err, "failed to store shared cache value");
                            } else {
                                debug!(key = %store_key, ttl_secs = ttl.as_secs(), "shared cache value stored");
                            }
                        }
                        Err(err) => {
                            warn!(key = %store_key, error = %err, "failed to encode shared cache value");
                        }
                    }
                }
                result
            })
            .await
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.stats).clone()
    }
}
