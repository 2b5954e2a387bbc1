//! Redis key derivation for the cache's key classes.
//!
//! Every Redis-side name used by the cache is a deterministic function of a
//! logical cache key and a configurable namespace prefix:
//!
//! - `{prefix}:data:{key}` — the serialized result payload
//! - `{prefix}:lock:{key}` — the leader-election mutual-exclusion key
//! - `{prefix}:chan:{key}` — the pub/sub topic announcing completion
//! - `{prefix}:sys:index` — one cluster-wide ZSET ordering data keys by
//!   last-write time (the LRU index)
//! - `{prefix}:conf:limit` — one cluster-wide capacity bound
//!
//! Channel names are reversible: [`KeyScheme::key_from_channel`] recovers the
//! logical key from a received topic and rejects topics outside the namespace.

use smol_str::{SmolStr, format_smolstr};

/// Default namespace prefix for all derived keys.
pub const DEFAULT_PREFIX: &str = "dsg";

/// Derives the Redis key classes from a logical cache key.
///
/// Cloning is cheap; the scheme only holds the namespace prefix.
///
/// # Example
///
/// ```
/// use stampede::key::KeyScheme;
///
/// let scheme = KeyScheme::new("dsg");
/// assert_eq!(scheme.data_key("metrics:2024-01"), "dsg:data:metrics:2024-01");
/// assert_eq!(scheme.key_from_channel("dsg:chan:metrics:2024-01").as_deref(), Some("metrics:2024-01"));
/// assert_eq!(scheme.key_from_channel("other:chan:metrics:2024-01"), None);
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyScheme {
    prefix: SmolStr,
}

impl Default for KeyScheme {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl KeyScheme {
    /// Creates a scheme with the given namespace prefix.
    pub fn new(prefix: impl Into<SmolStr>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Returns the namespace prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key holding the serialized result for `key`.
    pub fn data_key(&self, key: &str) -> SmolStr {
        format_smolstr!("{}:data:{}", self.prefix, key)
    }

    /// Mutual-exclusion key held by the leader computing `key`.
    pub fn lock_key(&self, key: &str) -> SmolStr {
        format_smolstr!("{}:lock:{}", self.prefix, key)
    }

    /// Pub/sub topic announcing completion of `key`.
    pub fn channel_key(&self, key: &str) -> SmolStr {
        format_smolstr!("{}:chan:{}", self.prefix, key)
    }

    /// The single cluster-wide ZSET ordering data keys by last write.
    pub fn index_key(&self) -> SmolStr {
        format_smolstr!("{}:sys:index", self.prefix)
    }

    /// The single cluster-wide capacity bound key.
    pub fn limit_key(&self) -> SmolStr {
        format_smolstr!("{}:conf:limit", self.prefix)
    }

    /// Wildcard pattern covering every channel key, for one `PSUBSCRIBE`
    /// per process regardless of key cardinality.
    pub fn channel_pattern(&self) -> SmolStr {
        format_smolstr!("{}:chan:*", self.prefix)
    }

    /// Recovers the logical cache key from a received pub/sub topic.
    ///
    /// Returns `None` for topics that do not carry this scheme's channel
    /// prefix, so foreign traffic on a shared Redis is dropped instead of
    /// waking unrelated waiters.
    pub fn key_from_channel(&self, topic: &str) -> Option<SmolStr> {
        let rest = topic.strip_prefix(self.prefix.as_str())?;
        let key = rest.strip_prefix(":chan:")?;
        if key.is_empty() {
            return None;
        }
        Some(SmolStr::new(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_all_key_classes() {
        let scheme = KeyScheme::new("dsg");
        assert_eq!(scheme.data_key("k"), "dsg:data:k");
        assert_eq!(scheme.lock_key("k"), "dsg:lock:k");
        assert_eq!(scheme.channel_key("k"), "dsg:chan:k");
        assert_eq!(scheme.index_key(), "dsg:sys:index");
        assert_eq!(scheme.limit_key(), "dsg:conf:limit");
        assert_eq!(scheme.channel_pattern(), "dsg:chan:*");
    }

    #[test]
    fn distinct_keys_never_collide_within_a_class() {
        let scheme = KeyScheme::default();
        assert_ne!(scheme.data_key("a"), scheme.data_key("b"));
        assert_ne!(scheme.data_key("a"), scheme.lock_key("a"));
    }

    #[test]
    fn channel_round_trip() {
        let scheme = KeyScheme::new("dsg");
        let topic = scheme.channel_key("metrics:2024-01");
        assert_eq!(
            scheme.key_from_channel(&topic).as_deref(),
            Some("metrics:2024-01")
        );
    }

    #[test]
    fn foreign_topics_are_rejected() {
        let scheme = KeyScheme::new("dsg");
        assert_eq!(scheme.key_from_channel("other:chan:k"), None);
        assert_eq!(scheme.key_from_channel("dsg:data:k"), None);
        assert_eq!(scheme.key_from_channel("dsg:chan:"), None);
        assert_eq!(scheme.key_from_channel(""), None);
    }

    #[test]
    fn keys_embed_the_configured_prefix() {
        let scheme = KeyScheme::new("unify-query");
        assert_eq!(scheme.lock_key("q"), "unify-query:lock:q");
        assert_eq!(
            scheme.key_from_channel("unify-query:chan:q").as_deref(),
            Some("q")
        );
    }
}
