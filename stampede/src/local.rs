//! In-process first-tier cache.
//!
//! A bounded, TTL'd Moka cache keyed by the fully-qualified data key.
//! This is the fast path checked before any network I/O; eviction accuracy
//! is a performance concern only, so Moka's approximate LRU is fine.

use std::time::Duration;

use bytes::Bytes;
use moka::future::Cache;
use smol_str::SmolStr;

/// Bounded TTL-based local cache.
#[derive(Clone, Debug)]
pub struct LocalCache {
    cache: Cache<SmolStr, Bytes>,
}

impl LocalCache {
    /// Creates a local cache bounded to `capacity` entries, each living for
    /// `ttl` after insertion.
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Returns the cached payload for `key`, if present and fresh.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.cache.get(key).await
    }

    /// Stores `payload` under `key`.
    pub async fn insert(&self, key: SmolStr, payload: Bytes) {
        self.cache.insert(key, payload).await;
    }

    /// Number of entries currently held. Approximate until Moka's
    /// maintenance has run.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
