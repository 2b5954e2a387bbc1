//! Error types for cache operations.

use smol_str::SmolStr;
use thiserror::Error;

use crate::backend::BackendError;

/// Error returned by the upstream unit of work.
pub type UpstreamError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for [`CacheService::get_or_compute`](crate::CacheService::get_or_compute).
///
/// A cache miss is not an error: reads surface absence as `Ok(None)` at the
/// backend seam, and the service falls through to the next tier. Caller-side
/// cancellation is not an error kind either — dropping the future cancels
/// the call.
///
/// None of these are retried inside the cache; retry policy belongs to the
/// caller.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The distributed store failed (read, bounded write, renewal, or
    /// pub/sub).
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The distributed lock could not be queried. The call fails instead of
    /// falling back to unprotected execution.
    #[error("distributed lock unavailable")]
    LockUnavailable(#[source] BackendError),

    /// No completion signal arrived within the execute timeout. The caller
    /// may retry from scratch.
    #[error("timed out waiting for completion notification")]
    NotifyTimeout,

    /// The dependency's circuit breaker is open; the call failed fast
    /// without touching the dependency.
    #[error("circuit breaker open for {0}")]
    CircuitOpen(SmolStr),

    /// The concurrency bound for the distributed path is saturated.
    #[error("too many in-flight executions on the distributed path")]
    FlowLimitExceeded,

    /// The wrapped unit of work itself failed. Propagated unchanged, never
    /// cached.
    #[error(transparent)]
    Upstream(UpstreamError),
}

impl CacheError {
    /// Whether this failure should count against the dependency's circuit
    /// breaker. Upstream failures and waiter timeouts say nothing about the
    /// health of the store, so they must not latch the breaker open.
    pub(crate) fn is_dependency_failure(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::LockUnavailable(_))
    }
}
