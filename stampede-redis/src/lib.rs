#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Redis backend for the stampede cache.
pub mod backend;

/// Error types for Redis backend operations.
pub mod error;

pub use crate::backend::{RedisBackend, RedisBackendBuilder};
pub use crate::error::Error;
