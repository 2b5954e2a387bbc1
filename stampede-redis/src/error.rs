//! Error types for Redis backend operations.
//!
//! All errors convert to [`BackendError`] for uniform handling across
//! backends; transport-level failures map to the connection class so the
//! circuit breaker can distinguish a dead Redis from a bad command.
//!
//! [`BackendError`]: stampede::BackendError

use redis::RedisError;
use stampede::BackendError;

/// Error type for Redis backend operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error from the underlying Redis client.
    ///
    /// This includes connection failures, protocol errors, authentication
    /// failures, and command execution errors.
    #[error("Redis backend error: {0}")]
    Redis(#[from] RedisError),

    /// The system clock reported a time before the Unix epoch while
    /// deriving an LRU score.
    #[error("system clock is before the Unix epoch")]
    Clock(#[from] std::time::SystemTimeError),
}

impl From<Error> for BackendError {
    fn from(error: Error) -> Self {
        match &error {
            Error::Redis(e)
                if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() =>
            {
                BackendError::Connection(Box::new(error))
            }
            _ => BackendError::Internal(Box::new(error)),
        }
    }
}
