//! Lease renewal for locks this process currently leads.
//!
//! The keeper is a long-lived task ticking at half the lock TTL (or a
//! configured interval). Each tick snapshots the leader set and issues one
//! batched renewal. Renewal failure is logged and absorbed: a lock that
//! fails to renew expires naturally and another node takes over.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use smol_str::SmolStr;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::backend::RemoteBackend;

/// Keys this process is currently computing (holds the distributed lock
/// for). Registration returns an RAII guard so deregistration happens on
/// every exit path of the leader, including unwinds.
#[derive(Debug, Default)]
pub struct LeaderSet {
    keys: DashMap<SmolStr, ()>,
}

impl LeaderSet {
    /// Creates an empty leader set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` as led by this process until the guard drops.
    pub fn register(self: &Arc<Self>, key: SmolStr) -> LeaderGuard {
        self.keys.insert(key.clone(), ());
        LeaderGuard {
            set: Arc::clone(self),
            key,
        }
    }

    /// Whether `key` is currently led by this process.
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    /// Number of keys currently led.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are currently led.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn snapshot(&self) -> Vec<SmolStr> {
        self.keys.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Removes its key from the [`LeaderSet`] on drop.
#[derive(Debug)]
pub struct LeaderGuard {
    set: Arc<LeaderSet>,
    key: SmolStr,
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.set.keys.remove(&self.key);
    }
}

/// Renewal loop. Runs until the shutdown signal flips.
pub(crate) async fn run<B: RemoteBackend>(
    backend: Arc<B>,
    leaders: Arc<LeaderSet>,
    lock_ttl: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick of a tokio interval fires immediately; skip it so the
    // first renewal happens one period after startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let keys = leaders.snapshot();
                if keys.is_empty() {
                    continue;
                }
                match backend.renew_locks(&keys, lock_ttl).await {
                    Ok(()) => debug!(count = keys.len(), "renewed lock leases"),
                    Err(error) => {
                        warn!(%error, count = keys.len(), "failed to renew lock leases");
                    }
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}
