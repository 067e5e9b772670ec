//! In-process cache store with per-entry TTL.
//!
//! Bounded by an LRU capacity; expired entries are dropped lazily on read.
//! Useful for embedding the proxy without an external cache service and as
//! the reference store in tests.

use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;

use super::lock::{rw_read, rw_write};
use super::{CacheReadError, CacheStore, CacheWriteError};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

enum Lookup {
    Hit(String),
    Expired,
    Miss,
}

/// LRU-bounded, TTL-aware in-memory [`CacheStore`].
pub struct MemoryCacheStore {
    entries: RwLock<LruCache<String, Entry>>,
}

impl MemoryCacheStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Number of stored entries, including ones that expired but have not
    /// been read since.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries.
    pub fn clear(&self) {
        rw_write(&self.entries, "clear").clear();
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheReadError> {
        let now = Instant::now();
        let mut guard = rw_write(&self.entries, "get");
        let lookup = match guard.get(key) {
            Some(entry) if entry.expires_at > now => Lookup::Hit(entry.value.clone()),
            Some(_) => Lookup::Expired,
            None => Lookup::Miss,
        };
        match lookup {
            Lookup::Hit(value) => Ok(Some(value)),
            Lookup::Expired => {
                guard.pop(key);
                Ok(None)
            }
            Lookup::Miss => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, expire: Duration) -> Result<(), CacheWriteError> {
        let expires_at = Instant::now()
            .checked_add(expire)
            .ok_or_else(|| CacheWriteError::new("expiry overflows the monotonic clock"))?;
        rw_write(&self.entries, "set").put(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }
}
