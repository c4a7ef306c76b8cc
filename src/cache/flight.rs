//! Single-flight Module
//!
//! Collapses concurrent computations for the same key into one shared future.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::trace;

use super::lock;

type Call<T> = Shared<BoxFuture<'static, T>>;

// == Single Flight ==
/// Per-key registry of in-flight computations.
///
/// A computation removes itself from the registry when it completes. If every
/// caller awaiting it goes away first, the half-run computation stays
/// registered and the next caller for that key resumes it.
pub struct SingleFlight<K, T> {
    calls: Arc<Mutex<HashMap<K, Call<T>>>>,
}

impl<K, T> SingleFlight<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    // == Run ==
    /// Awaits the computation registered for `key`, starting one from `work`
    /// if none is in flight.
    ///
    /// `work` is only invoked to build the future; it must not touch this
    /// registry synchronously.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let call = {
            let mut calls = lock(&self.calls);
            match calls.get(&key) {
                Some(call) => {
                    trace!("joining in-flight computation");
                    call.clone()
                }
                None => {
                    let registry = Arc::clone(&self.calls);
                    let owned_key = key.clone();
                    let computation = work();
                    let call = async move {
                        let output = computation.await;
                        lock(&registry).remove(&owned_key);
                        output
                    }
                    .boxed()
                    .shared();
                    calls.insert(key, call.clone());
                    call
                }
            }
        };

        call.await
    }

    /// Number of keys with a computation in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.calls).len()
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
