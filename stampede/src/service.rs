//! Service orchestrator: the public `get_or_compute` entry point.
//!
//! Composes the tiers in order: local cache, distributed store, leader
//! election. The election winner computes and publishes; losers block on
//! the notification fabric. The whole distributed phase runs under the
//! resilience manager, so a saturated or failing store degrades into fast
//! failures instead of pile-ups.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use smol_str::SmolStr;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use crate::backend::RemoteBackend;
use crate::config::CacheConfig;
use crate::error::{CacheError, UpstreamError};
use crate::keeper::{self, LeaderSet};
use crate::key::KeyScheme;
use crate::local::LocalCache;
use crate::metrics;
use crate::notify::{self, NotificationFabric};
use crate::resilience::{CircuitState, ResilienceManager};

/// Delay before re-opening a lost completion subscription.
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

/// Distributed, stampede-safe result cache.
///
/// Construction spawns the lock-renewal keeper and the completion
/// subscription loop; both stop when [`shutdown`](Self::shutdown) is called
/// (or, best-effort, when the service is dropped). Must be created inside
/// a Tokio runtime.
///
/// Share the service across tasks behind an `Arc`.
pub struct CacheService<B: RemoteBackend> {
    backend: Arc<B>,
    config: CacheConfig,
    scheme: KeyScheme,
    local: LocalCache,
    fabric: Arc<NotificationFabric>,
    leaders: Arc<LeaderSet>,
    resilience: ResilienceManager,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<B: RemoteBackend> CacheService<B> {
    /// Creates the service and starts its background tasks.
    pub fn new(backend: B, config: CacheConfig) -> Self {
        let backend = Arc::new(backend);
        let scheme = KeyScheme::new(config.prefix.clone());
        let local = LocalCache::new(config.local_capacity, config.payload_ttl);
        let fabric = Arc::new(NotificationFabric::new());
        let leaders = Arc::new(LeaderSet::new());
        let resilience = ResilienceManager::new(SmolStr::new(backend.name()), &config.resilience);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let keeper_task = tokio::spawn(
            keeper::run(
                Arc::clone(&backend),
                Arc::clone(&leaders),
                config.lock_ttl,
                config.renewal_period(),
                shutdown_rx.clone(),
            )
            .instrument(info_span!("lock_keeper")),
        );
        let subscription_task = tokio::spawn(
            run_subscription_loop(Arc::clone(&backend), Arc::clone(&fabric), shutdown_rx)
                .instrument(info_span!("completion_subscription")),
        );

        Self {
            backend,
            config,
            scheme,
            local,
            fabric,
            leaders,
            resilience,
            shutdown_tx,
            tasks: Mutex::new(vec![keeper_task, subscription_task]),
        }
    }

    /// Whether caching is enabled at all.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Whether the request identified by `method` and `path` should bypass
    /// the cache. For the caller to honor before deriving a key.
    pub fn should_skip(&self, method: &str, path: &str) -> bool {
        self.config.skip.matches(method, path)
    }

    /// Current breaker state of the distributed path, for observability.
    pub fn breaker_state(&self) -> CircuitState {
        self.resilience.breaker_state()
    }

    /// Returns the cached result for `key`, computing it via `fetch` only
    /// if no other node is already doing so.
    ///
    /// At most one caller cluster-wide executes `fetch` for a given key at
    /// a time; concurrent callers on any node receive the same payload.
    /// Losers never fall back to running `fetch` themselves — a timeout
    /// surfaces as [`CacheError::NotifyTimeout`] and the caller may retry.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, fetch: F) -> Result<Bytes, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, UpstreamError>>,
    {
        let started = Instant::now();
        let data_key = self.scheme.data_key(key);

        if let Some(payload) = self.local.get(&data_key).await {
            metrics::record_local_hit();
            metrics::record_do_duration(started.elapsed(), "local-hit");
            return Ok(payload);
        }

        let result = self
            .resilience
            .execute(|| self.distributed(key, &data_key, fetch))
            .await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::record_do_duration(started.elapsed(), outcome);
        result
    }

    async fn distributed<F, Fut>(
        &self,
        key: &str,
        data_key: &SmolStr,
        fetch: F,
    ) -> Result<Bytes, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, UpstreamError>>,
    {
        if let Some(payload) = self.backend.read(key).await? {
            metrics::record_remote_hit();
            self.local.insert(data_key.clone(), payload.clone()).await;
            return Ok(payload);
        }
        metrics::record_miss();

        let acquired = self
            .backend
            .try_lock(key, self.config.lock_ttl)
            .await
            .map_err(CacheError::LockUnavailable)?;

        if acquired {
            self.lead(key, data_key, fetch).await
        } else {
            self.wait(key, data_key).await
        }
    }

    /// Winner path: compute, write through the bounded store, announce.
    /// The lock itself is left to expire; the guard only stops renewal.
    async fn lead<F, Fut>(
        &self,
        key: &str,
        data_key: &SmolStr,
        fetch: F,
    ) -> Result<Bytes, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, UpstreamError>>,
    {
        metrics::record_election_won();
        let _guard = self.leaders.register(SmolStr::new(key));
        debug!(key, "won leader election, computing");

        let payload = fetch().await.map_err(CacheError::Upstream)?;
        self.backend
            .write_bounded(key, payload.clone(), self.config.payload_ttl)
            .await?;
        self.local.insert(data_key.clone(), payload.clone()).await;
        self.backend.publish_done(key).await?;
        Ok(payload)
    }

    /// Loser path: wait for the leader's announcement, then read its
    /// result. Never executes the computation.
    async fn wait(&self, key: &str, data_key: &SmolStr) -> Result<Bytes, CacheError> {
        let rx = self.fabric.register(key).await;

        // The leader may have published between our miss and the
        // registration above; one more read closes that window.
        if let Some(payload) = self.backend.read(key).await? {
            self.local.insert(data_key.clone(), payload.clone()).await;
            return Ok(payload);
        }

        debug!(key, "lost leader election, waiting for completion");
        if let Err(error) = notify::wait_for_notify(rx, self.config.execute_ttl).await {
            if matches!(error, CacheError::NotifyTimeout) {
                metrics::record_notify_timeout();
            }
            return Err(error);
        }

        match self.backend.read(key).await? {
            Some(payload) => {
                self.local.insert(data_key.clone(), payload.clone()).await;
                Ok(payload)
            }
            None => {
                // Woken but nothing readable: the entry was evicted before
                // we got to it. The remedy is the same as for a timeout.
                debug!(key, "woken without readable data");
                Err(CacheError::NotifyTimeout)
            }
        }
    }

    /// Stops the keeper and the subscription loop and waits for both.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl<B: RemoteBackend> Drop for CacheService<B> {
    fn drop(&mut self) {
        // Best-effort: tasks observe the closed channel and exit. Callers
        // that need the tasks joined use `shutdown`.
        let _ = self.shutdown_tx.send(true);
    }
}

/// Cluster layer of the notification fabric: one subscription per process,
/// fanning completion signals out to local waiters. Stream loss is logged
/// and followed by a resubscribe; the loop only exits on shutdown.
async fn run_subscription_loop<B: RemoteBackend>(
    backend: Arc<B>,
    fabric: Arc<NotificationFabric>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let mut stream = tokio::select! {
            result = backend.subscribe() => match result {
                Ok(stream) => stream,
                Err(error) => {
                    warn!(%error, "completion subscription failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(RESUBSCRIBE_BACKOFF) => continue,
                        _ = shutdown.changed() => return,
                    }
                }
            },
            _ = shutdown.changed() => return,
        };

        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(key) => {
                        let woken = fabric.broadcast_local(&key).await;
                        metrics::record_notify_wakeup(woken);
                        debug!(%key, woken, "completion signal received");
                    }
                    None => {
                        warn!("completion stream ended, resubscribing");
                        break;
                    }
                },
                _ = shutdown.changed() => return,
            }
        }
    }
}
