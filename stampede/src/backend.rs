//! The seam between cache orchestration and distributed storage.
//!
//! [`RemoteBackend`] is the only surface through which the service touches
//! the cluster: value reads, capacity-bounded writes, the non-blocking lock
//! attempt used for leader election, batched lease renewal, and the
//! completion broadcast. Implementations own the physical key naming (see
//! [`KeyScheme`](crate::key::KeyScheme)); all trait methods take the logical
//! cache key.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use smol_str::SmolStr;
use thiserror::Error;

/// Convenience alias for backend operation results.
pub type BackendResult<T> = Result<T, BackendError>;

/// Stream of logical cache keys whose computation completed somewhere in
/// the cluster. One long-lived stream per process.
pub type CompletionStream = BoxStream<'static, SmolStr>;

/// Error type for backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Internal backend error, state or computation error.
    ///
    /// Any error not related to network interaction.
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),

    /// Network interaction error.
    ///
    /// Errors occurring during communication with the remote store.
    #[error(transparent)]
    Connection(Box<dyn std::error::Error + Send + Sync>),
}

impl BackendError {
    /// Wraps an arbitrary error as an internal backend error.
    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(error))
    }

    /// Wraps an arbitrary error as a connection error.
    pub fn connection<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection(Box::new(error))
    }
}

/// Distributed storage, lock, and completion-broadcast operations.
///
/// Absence on read is `Ok(None)`, never an error: a cache miss is a normal
/// outcome and must be distinguishable from a failing backend.
#[async_trait]
pub trait RemoteBackend: Send + Sync + 'static {
    /// Reads the payload stored for `key`.
    async fn read(&self, key: &str) -> BackendResult<Option<Bytes>>;

    /// Writes `payload` under `key` with the given TTL, atomically updating
    /// the LRU index and evicting the oldest entries past the capacity
    /// bound. The write and the eviction bookkeeping must not be separable:
    /// after any successful call the index cardinality is within the bound.
    async fn write_bounded(&self, key: &str, payload: Bytes, ttl: Duration) -> BackendResult<()>;

    /// Non-blocking cluster-wide lock attempt for `key`.
    ///
    /// Exactly one concurrent caller across the cluster observes `true`;
    /// everyone else observes `false` immediately.
    async fn try_lock(&self, key: &str, ttl: Duration) -> BackendResult<bool>;

    /// Best-effort batched lease extension for locks this process holds.
    async fn renew_locks(&self, keys: &[SmolStr], ttl: Duration) -> BackendResult<()>;

    /// Announces cluster-wide that the computation for `key` completed and
    /// its result is readable.
    async fn publish_done(&self, key: &str) -> BackendResult<()>;

    /// Opens the single long-lived completion subscription for this
    /// process, yielding logical keys with the channel prefix stripped.
    async fn subscribe(&self) -> BackendResult<CompletionStream>;

    /// Backend name used in logs and breaker labels.
    fn name(&self) -> &str {
        "backend"
    }
}
