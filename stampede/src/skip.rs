//! Skip rules for requests that must bypass the cache.
//!
//! Honored by the caller of the orchestrator, not by the cache itself:
//! a skipped request never reaches [`get_or_compute`](crate::CacheService::get_or_compute).

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Methods and paths excluded from caching.
///
/// Paths match exactly or via `*` wildcards (`/query/ts/*` matches
/// `/query/ts/promql`); methods match exactly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SkipRules {
    /// Methods to bypass, e.g. `["HEAD", "OPTIONS"]`.
    pub methods: Vec<String>,
    /// Paths to bypass; `*` matches any run of characters.
    pub paths: Vec<String>,
}

impl SkipRules {
    /// Returns true when the request identified by `method` and `path`
    /// should bypass the cache.
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.skip_method(method) || self.skip_path(path)
    }

    fn skip_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }

    fn skip_path(&self, path: &str) -> bool {
        self.paths.iter().any(|pattern| {
            if pattern == path {
                return true;
            }
            if pattern.contains('*') {
                return wildcard_match(path, pattern);
            }
            false
        })
    }
}

fn wildcard_match(path: &str, pattern: &str) -> bool {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    let anchored = format!("^{escaped}$");
    match Regex::new(&anchored) {
        Ok(re) => re.is_match(path),
        Err(_) => false,
    }
}
