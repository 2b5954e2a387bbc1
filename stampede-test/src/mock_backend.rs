use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use smol_str::SmolStr;
use stampede::backend::{BackendError, BackendResult, CompletionStream, RemoteBackend};
use tokio::sync::broadcast;
use tokio::time::Instant;

const COMPLETION_CHANNEL_CAPACITY: usize = 64;

/// Error returned by every operation while fault injection is active.
#[derive(Debug, thiserror::Error)]
#[error("injected backend failure")]
pub struct InjectedFailure;

#[derive(Debug, Default)]
pub struct BackendCounters {
    pub read_count: AtomicUsize,
    pub read_hit_count: AtomicUsize,
    pub read_miss_count: AtomicUsize,
    pub write_count: AtomicUsize,
    pub lock_attempt_count: AtomicUsize,
    pub lock_won_count: AtomicUsize,
    pub renew_count: AtomicUsize,
    pub publish_count: AtomicUsize,
}

impl BackendCounters {
    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn read_hit_count(&self) -> usize {
        self.read_hit_count.load(Ordering::SeqCst)
    }

    pub fn read_miss_count(&self) -> usize {
        self.read_miss_count.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    pub fn lock_attempt_count(&self) -> usize {
        self.lock_attempt_count.load(Ordering::SeqCst)
    }

    pub fn lock_won_count(&self) -> usize {
        self.lock_won_count.load(Ordering::SeqCst)
    }

    pub fn renew_count(&self) -> usize {
        self.renew_count.load(Ordering::SeqCst)
    }

    pub fn publish_count(&self) -> usize {
        self.publish_count.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.read_count.store(0, Ordering::SeqCst);
        self.read_hit_count.store(0, Ordering::SeqCst);
        self.read_miss_count.store(0, Ordering::SeqCst);
        self.write_count.store(0, Ordering::SeqCst);
        self.lock_attempt_count.store(0, Ordering::SeqCst);
        self.lock_won_count.store(0, Ordering::SeqCst);
        self.renew_count.store(0, Ordering::SeqCst);
        self.publish_count.store(0, Ordering::SeqCst);
    }
}

#[derive(Clone, Debug)]
struct StoredValue {
    payload: Bytes,
    seq: u64,
}

/// In-memory [`RemoteBackend`] with the same observable semantics as the
/// Redis backend: capacity-bounded writes evicting oldest-first, expiring
/// lock leases, recorded renewals, and an in-process completion broadcast.
///
/// Clones share state, so tests keep a handle after handing a clone to the
/// service.
#[derive(Clone, Debug)]
pub struct MockBackend {
    store: Arc<DashMap<SmolStr, StoredValue>>,
    locks: Arc<DashMap<SmolStr, Instant>>,
    completions: broadcast::Sender<SmolStr>,
    renewals: Arc<Mutex<Vec<Vec<SmolStr>>>>,
    seq: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
    limit: usize,
    pub counters: Arc<BackendCounters>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// An unbounded backend.
    pub fn new() -> Self {
        Self::bounded(usize::MAX)
    }

    /// A backend evicting oldest entries beyond `limit`.
    pub fn bounded(limit: usize) -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            store: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            completions,
            renewals: Arc::new(Mutex::new(Vec::new())),
            seq: Arc::new(AtomicU64::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
            limit,
            counters: Arc::new(BackendCounters::default()),
        }
    }

    /// While set, every operation fails with a connection-class error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Takes the lock for `key` as if another process had won it.
    pub fn hold_lock(&self, key: &str, ttl: Duration) {
        self.locks.insert(SmolStr::new(key), Instant::now() + ttl);
    }

    /// Seeds a payload without touching counters or the eviction bound.
    pub fn insert_payload(&self, key: &str, payload: Bytes) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.store
            .insert(SmolStr::new(key), StoredValue { payload, seq });
    }

    pub fn entry_count(&self) -> usize {
        self.store.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    /// Every renewal batch issued so far, oldest first.
    pub fn renewals(&self) -> Vec<Vec<SmolStr>> {
        self.renewals.lock().unwrap().clone()
    }

    pub fn lock_won_count(&self) -> usize {
        self.counters.lock_won_count()
    }

    pub fn read_count(&self) -> usize {
        self.counters.read_count()
    }

    fn check_failure(&self) -> BackendResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::connection(InjectedFailure));
        }
        Ok(())
    }

    fn evict_past_limit(&self) {
        while self.store.len() > self.limit {
            let oldest = self
                .store
                .iter()
                .min_by_key(|entry| entry.value().seq)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.store.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl RemoteBackend for MockBackend {
    async fn read(&self, key: &str) -> BackendResult<Option<Bytes>> {
        self.check_failure()?;
        self.counters.read_count.fetch_add(1, Ordering::SeqCst);
        let result = self.store.get(key).map(|v| v.value().payload.clone());
        if result.is_some() {
            self.counters.read_hit_count.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.read_miss_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(result)
    }

    async fn write_bounded(&self, key: &str, payload: Bytes, _ttl: Duration) -> BackendResult<()> {
        self.check_failure()?;
        self.counters.write_count.fetch_add(1, Ordering::SeqCst);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.store
            .insert(SmolStr::new(key), StoredValue { payload, seq });
        self.evict_past_limit();
        Ok(())
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> BackendResult<bool> {
        self.check_failure()?;
        self.counters
            .lock_attempt_count
            .fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let deadline = now + ttl;
        let acquired = match self.locks.entry(SmolStr::new(key)) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() <= now {
                    occupied.insert(deadline);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(deadline);
                true
            }
        };
        if acquired {
            self.counters.lock_won_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(acquired)
    }

    async fn renew_locks(&self, keys: &[SmolStr], ttl: Duration) -> BackendResult<()> {
        self.check_failure()?;
        self.counters.renew_count.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + ttl;
        for key in keys {
            if let Some(mut lease) = self.locks.get_mut(key.as_str()) {
                *lease = deadline;
            }
        }
        self.renewals.lock().unwrap().push(keys.to_vec());
        Ok(())
    }

    async fn publish_done(&self, key: &str) -> BackendResult<()> {
        self.check_failure()?;
        self.counters.publish_count.fetch_add(1, Ordering::SeqCst);
        // No receivers is fine; nobody is waiting.
        let _ = self.completions.send(SmolStr::new(key));
        Ok(())
    }

    async fn subscribe(&self) -> BackendResult<CompletionStream> {
        self.check_failure()?;
        let receiver = self.completions.subscribe();
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(key) => return Some((key, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed();
        Ok(stream)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
