//! Cache and resilience configuration.
//!
//! All durations deserialize from humantime strings (`"5s"`, `"500ms"`,
//! `"1m"`). Every field has a serde default so partial configuration files
//! work; `CacheConfig::default()` yields a usable setup with the relation
//! `renewal period < execute TTL < lock TTL` already holding.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::key::DEFAULT_PREFIX;
use crate::skip::SkipRules;

/// Top-level cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; when false the caller should bypass the cache
    /// entirely.
    pub enabled: bool,
    /// Namespace prefix for all derived Redis keys.
    pub prefix: SmolStr,
    /// Upper bound on how long a waiter blocks for a completion signal.
    #[serde(with = "humantime_serde")]
    pub execute_ttl: Duration,
    /// TTL of cached payloads, both remote and in the local tier.
    #[serde(with = "humantime_serde")]
    pub payload_ttl: Duration,
    /// TTL of the leader-election lock. Must exceed `execute_ttl` so a
    /// healthy leader is not preempted mid-computation.
    #[serde(with = "humantime_serde")]
    pub lock_ttl: Duration,
    /// Lease-renewal interval; defaults to half the lock TTL when unset.
    #[serde(default, with = "humantime_serde")]
    pub renew_interval: Option<Duration>,
    /// Capacity bound applied when the cluster-wide limit key is unset.
    pub default_limit: i64,
    /// Maximum number of entries in the local in-process tier.
    pub local_capacity: u64,
    /// Methods and paths the caller should exclude from caching.
    pub skip: SkipRules,
    /// Circuit breaker and flow control for the distributed path.
    pub resilience: ResilienceConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: SmolStr::new_static(DEFAULT_PREFIX),
            execute_ttl: Duration::from_secs(30),
            payload_ttl: Duration::from_secs(30),
            lock_ttl: Duration::from_secs(60),
            renew_interval: None,
            default_limit: 1024,
            local_capacity: 10_000,
            skip: SkipRules::default(),
            resilience: ResilienceConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Effective renewal period: the configured interval, or half the lock
    /// TTL so at least one renewal lands before the lease can expire.
    pub fn renewal_period(&self) -> Duration {
        self.renew_interval.unwrap_or(self.lock_ttl / 2)
    }
}

/// Circuit breaker and flow controller settings for the distributed path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResilienceConfig {
    /// When false, calls pass through with no admission check.
    pub enabled: bool,
    /// Maximum concurrent executions contending for the distributed path.
    pub max_inflight: u32,
    /// Consecutive dependency failures before the breaker opens.
    pub max_failures: u32,
    /// Cooldown after which an open breaker admits a half-open probe.
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_inflight: 64,
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}
