//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use tokio::time::Instant;

// == Cache Entry ==
/// A computed value together with the time it was stored and its TTL.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// When the value was stored
    pub stored_at: Instant,
    /// How long the value stays valid
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry stored now.
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
            ttl,
        }
    }

    // == Is Valid ==
    /// Checks whether the entry can still be served.
    ///
    /// Boundary condition: an entry is valid iff `now < stored_at + ttl`, so
    /// once the TTL has fully elapsed the entry is immediately stale.
    pub fn is_valid(&self) -> bool {
        Instant::now() < self.stored_at + self.ttl
    }

    // == Time To Live ==
    /// Returns the remaining lifetime, zero once the entry is stale.
    pub fn ttl_remaining(&self) -> Duration {
        (self.stored_at + self.ttl).saturating_duration_since(Instant::now())
    }
}
