#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// The seam between cache orchestration and distributed storage.
///
/// Defines the [`RemoteBackend`](backend::RemoteBackend) trait — value
/// reads, capacity-bounded writes, the leader-election lock attempt,
/// batched lease renewal, and the completion broadcast — plus
/// [`BackendError`](backend::BackendError) for uniform error handling
/// across implementations.
pub mod backend;

/// Cache and resilience configuration with humantime durations and serde
/// defaults.
pub mod config;

/// Error types for cache operations.
///
/// Defines [`CacheError`] which distinguishes backend failures, an
/// unavailable distributed lock, waiter timeouts, resilience fast-fails,
/// and upstream computation failures. A cache miss is not an error.
pub mod error;

/// Lease renewal for locks this process currently leads.
pub mod keeper;

/// Redis key derivation for the cache's key classes.
pub mod key;

/// In-process first-tier cache backed by Moka.
pub mod local;

/// Metrics collection for cache observability.
///
/// When the `metrics` feature is enabled, this module provides counters
/// and histograms for:
/// - Local/distributed hits and misses
/// - Leader elections won, waiter wake-ups and timeouts
/// - Circuit breaker and flow controller rejections
pub mod metrics;

/// Per-process fan-out of cluster completion signals.
///
/// When a leader finishes a computation, every other caller blocked on the
/// same key — on this node or any other — must wake immediately instead of
/// polling. This module provides the local waiter registry; the cluster
/// subscription lives in the service.
pub mod notify;

/// Circuit breaker and flow control guarding the distributed path.
pub mod resilience;

/// Skip rules for requests that must bypass the cache.
pub mod skip;

/// Service orchestrator: the public `get_or_compute` entry point.
pub mod service;

pub use backend::{BackendError, BackendResult, CompletionStream, RemoteBackend};
pub use config::{CacheConfig, ResilienceConfig};
pub use error::{CacheError, UpstreamError};
pub use key::KeyScheme;
pub use service::CacheService;

/// The `stampede` prelude.
///
/// Provides convenient access to the most commonly used types:
///
/// ```rust
/// use stampede::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{CacheConfig, CacheError, CacheService, RemoteBackend};
}
