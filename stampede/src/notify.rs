//! Per-process fan-out of cluster completion signals.
//!
//! The cluster layer is a single long-lived subscription owned by the
//! service (see [`CacheService`](crate::CacheService)); this module is the
//! local layer: a map of per-key wait groups. Waiters register a oneshot
//! channel under their key; when a completion signal for that key arrives,
//! the whole wait group is removed under the lock and every registered
//! channel is fired. The removal doubles as the one-shot guard — a second
//! broadcast for the same key finds no wait group and is a no-op, and a
//! wait that begins afterwards creates a fresh group.

use std::collections::HashMap;
use std::time::Duration;

use smol_str::SmolStr;
use tokio::sync::{Mutex, oneshot};
use tracing::debug;

use crate::error::CacheError;

/// Channels of the local tasks blocked on one key. Created on first
/// waiter, consumed exactly once by [`NotificationFabric::broadcast_local`],
/// never reused.
#[derive(Default)]
struct WaitGroupValue {
    waiters: Vec<oneshot::Sender<()>>,
}

/// Local waiter registry keyed by logical cache key.
#[derive(Default)]
pub struct NotificationFabric {
    waiters: Mutex<HashMap<SmolStr, WaitGroupValue>>,
}

impl NotificationFabric {
    /// Creates an empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the caller as a waiter for `key` and returns the channel
    /// that completes when the leader's result lands.
    pub async fn register(&self, key: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut map = self.waiters.lock().await;
        map.entry(SmolStr::new(key)).or_default().waiters.push(tx);
        rx
    }

    /// Wakes every waiter currently registered for `key`, exactly once.
    ///
    /// Returns the number of waiters woken; zero when nobody was waiting
    /// (the signal is dropped — a later reader finds the data in the
    /// distributed store instead).
    pub async fn broadcast_local(&self, key: &str) -> usize {
        let group = {
            let mut map = self.waiters.lock().await;
            map.remove(key)
        };
        match group {
            Some(group) => {
                let woken = group.waiters.len();
                for tx in group.waiters {
                    // A waiter that gave up already is fine to miss.
                    let _ = tx.send(());
                }
                woken
            }
            None => {
                debug!(key, "completion signal with no local waiters");
                0
            }
        }
    }

    /// Number of keys with at least one registered waiter.
    pub async fn pending_keys(&self) -> usize {
        self.waiters.lock().await.len()
    }
}

/// Blocks on the wait channel for at most `execute_ttl`.
///
/// Completes with `Ok(())` on a wake-up; the elapse of `execute_ttl` is
/// [`CacheError::NotifyTimeout`]. Caller cancellation is the third exit:
/// dropping the returned future abandons the wait and the fabric later
/// discards the dead channel during broadcast.
///
/// A closed channel (fabric dropped) counts as a wake; the re-read that
/// follows every wake decides whether data actually arrived.
pub async fn wait_for_notify(
    rx: oneshot::Receiver<()>,
    execute_ttl: Duration,
) -> Result<(), CacheError> {
    match tokio::time::timeout(execute_ttl, rx).await {
        Ok(_) => Ok(()),
        Err(_) => Err(CacheError::NotifyTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_wakes_every_waiter_once() {
        let fabric = NotificationFabric::new();
        let a = fabric.register("k").await;
        let b = fabric.register("k").await;
        let c = fabric.register("other").await;

        assert_eq!(fabric.broadcast_local("k").await, 2);
        assert!(a.await.is_ok());
        assert!(b.await.is_ok());

        // The wait group for "k" was consumed; a second broadcast is a no-op.
        assert_eq!(fabric.broadcast_local("k").await, 0);
        assert_eq!(fabric.pending_keys().await, 1);

        assert_eq!(fabric.broadcast_local("other").await, 1);
        assert!(c.await.is_ok());
    }

    #[tokio::test]
    async fn broadcast_without_waiters_is_noop() {
        let fabric = NotificationFabric::new();
        assert_eq!(fabric.broadcast_local("nobody").await, 0);
    }

    #[tokio::test]
    async fn wait_times_out_without_broadcast() {
        let fabric = NotificationFabric::new();
        let rx = fabric.register("k").await;
        let result = wait_for_notify(rx, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(CacheError::NotifyTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_no_later_than_execute_ttl() {
        let fabric = NotificationFabric::new();
        let rx = fabric.register("k").await;
        let started = tokio::time::Instant::now();
        let result = wait_for_notify(rx, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(CacheError::NotifyTimeout)));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn registration_after_broadcast_creates_fresh_group() {
        let fabric = NotificationFabric::new();
        let stale = fabric.register("k").await;
        fabric.broadcast_local("k").await;
        assert!(stale.await.is_ok());

        let fresh = fabric.register("k").await;
        assert_eq!(fabric.broadcast_local("k").await, 1);
        assert!(fresh.await.is_ok());
    }
}
