//! Caching policy: the options template and per-call resolution.

use std::time::Duration;

use serde::Deserialize;

use crate::hash::HashKind;

/// Default cache entry lifetime: one mean Gregorian month in seconds.
pub const DEFAULT_EXPIRE_SECONDS: u64 = 2_629_746;
/// Default key namespace.
pub const DEFAULT_KEY_PREFIX: &str = "sql.";

/// What the orchestrator does with the cache store for a given call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Primary first, best-effort write-through, cache fallback on failure.
    Cache,
    /// Primary only; the cache store is never touched.
    Skip,
    /// Primary only as source of truth, but repopulate the cache on success.
    Refresh,
}

/// Fully resolved caching policy.
///
/// Every field always carries a concrete value; a proxy instance owns one of
/// these as an immutable template and derives a fresh copy per call via
/// [`CacheOptions::resolve`]. The template is read-only and safe to share
/// across concurrent invocations.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    /// Cache entry lifetime in seconds; always positive.
    pub expire_seconds: u64,
    /// Namespacing prefix prepended to every derived key.
    pub key_prefix: String,
    /// Hash strategy for the key suffix.
    pub hash: HashKind,
    /// Orchestration mode.
    pub mode: CacheMode,
    /// Per-call escape hatch: use this key verbatim, skipping prefix and
    /// hashing. Never inherited from the instance template.
    pub literal_key: Option<String>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            expire_seconds: DEFAULT_EXPIRE_SECONDS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            hash: HashKind::Fast32,
            mode: CacheMode::Cache,
            literal_key: None,
        }
    }
}

/// Per-call overrides; `None` means "fall through to the instance default".
///
/// Absence is explicit rather than inferred from falsy values, so a
/// legitimate empty prefix override is distinguishable from "unset".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOverrides {
    pub expire_seconds: Option<u64>,
    pub key_prefix: Option<String>,
    pub hash: Option<HashKind>,
    pub mode: Option<CacheMode>,
    /// Literal cache key override.
    pub key: Option<String>,
}

impl CacheOptions {
    /// Merge per-call overrides on top of this template.
    ///
    /// Field-wise precedence: per-call value, then this template, then the
    /// system default. Produces a fresh copy; the template is never mutated.
    /// There are no error conditions: a zero expiry falls back to the system
    /// default to keep the positive-lifetime invariant.
    pub fn resolve(&self, overrides: &QueryOverrides) -> CacheOptions {
        let expire_seconds = overrides.expire_seconds.unwrap_or(self.expire_seconds);
        CacheOptions {
            expire_seconds: if expire_seconds == 0 {
                DEFAULT_EXPIRE_SECONDS
            } else {
                expire_seconds
            },
            key_prefix: overrides
                .key_prefix
                .clone()
                .unwrap_or_else(|| self.key_prefix.clone()),
            hash: overrides.hash.unwrap_or(self.hash),
            mode: overrides.mode.unwrap_or(self.mode),
            literal_key: overrides.key.clone(),
        }
    }

    /// Entry lifetime as a [`Duration`].
    pub fn expire(&self) -> Duration {
        Duration::from_secs(self.expire_seconds)
    }
}
