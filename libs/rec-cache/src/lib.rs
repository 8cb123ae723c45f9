//! Trove caching layer
//!
//! In-process TTL cache for derived recommendation data (preference vectors,
//! finished recommendation lists). Entries are serialized through JSON so the
//! cache never hands out aliases of mutable engine state, and a stale entry
//! is treated exactly like a miss.
//!
//! The cache is an explicit service instance injected into its consumers;
//! construct it at startup, share it with `Arc`, clear it with
//! [`MemoryCache::clear`]. Concurrent writes to one key resolve last-write-wins,
//! which is acceptable because every entry is re-derivable.

mod error;
mod keys;

pub use error::{CacheError, CacheResult};
pub use keys::{CacheKey, CACHE_VERSION};

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default TTL values
pub mod ttl {
    use std::time::Duration;

    /// Preference vectors: 5 minutes
    pub const PREFERENCE: Duration = Duration::from_secs(300);
    /// Finished recommendation lists: 3 minutes
    pub const RECOMMENDATIONS: Duration = Duration::from_secs(180);
}

/// Default entry cap before oldest-first eviction kicks in.
pub const DEFAULT_MAX_ENTRIES: usize = 4096;

struct Entry {
    payload: String,
    stored_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_stale(&self) -> bool {
        self.stored_at.elapsed() > self.ttl
    }
}

/// Core cache operations
pub trait CacheOperations: Send + Sync {
    /// Get a value; a stale entry counts as a miss.
    fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>>;

    /// Set a value with TTL.
    fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()>;

    /// Delete a key. Returns whether it was present.
    fn del(&self, key: &str) -> bool;

    /// Check for a live (non-stale) entry.
    fn exists(&self, key: &str) -> bool;

    /// Remove entries matching a `*`-glob pattern, or everything when
    /// `pattern` is `None`. Returns the number of removed entries.
    fn clear(&self, pattern: Option<&str>) -> usize;
}

/// In-process TTL cache backed by a concurrent map.
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop stale entries, then the oldest live ones, until under the cap.
    fn evict_for_insert(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }
        self.entries.retain(|_, entry| !entry.is_stale());

        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().stored_at)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheOperations for MemoryCache {
    fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let stale = match self.entries.get(key) {
            Some(entry) if entry.is_stale() => true,
            Some(entry) => {
                let value = serde_json::from_str(&entry.payload)?;
                return Ok(Some(value));
            }
            None => return Ok(None),
        };
        if stale {
            self.entries.remove(key);
            debug!(key, "evicted stale cache entry");
        }
        Ok(None)
    }

    fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()> {
        let payload = serde_json::to_string(value)?;
        self.evict_for_insert();
        self.entries.insert(
            key.to_string(),
            Entry {
                payload,
                stored_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    fn del(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn exists(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(entry) => !entry.is_stale(),
            None => false,
        }
    }

    fn clear(&self, pattern: Option<&str>) -> usize {
        match pattern {
            None => {
                let removed = self.entries.len();
                self.entries.clear();
                debug!(removed, "cleared entire cache");
                removed
            }
            Some(pattern) => {
                let before = self.entries.len();
                self.entries.retain(|key, _| !glob_match(pattern, key));
                let removed = before - self.entries.len();
                debug!(pattern, removed, "cleared cache entries by pattern");
                removed
            }
        }
    }
}

/// Minimal `*`-only glob matcher, enough for the key schema's patterns.
fn glob_match(pattern: &str, key: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    // Pattern ended with '*', which matches any remainder.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_set_get_roundtrip() {
        let cache = MemoryCache::new();
        cache.set("k", &vec![1.0f32, 2.0, 3.0], ttl::PREFERENCE).unwrap();

        let value: Option<Vec<f32>> = cache.get("k").unwrap();
        assert_eq!(value, Some(vec![1.0, 2.0, 3.0]));
        assert!(cache.exists("k"));
    }

    #[test]
    fn test_stale_entry_is_a_miss() {
        let cache = MemoryCache::new();
        cache.set("k", &42u32, Duration::from_millis(0)).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let value: Option<u32> = cache.get("k").unwrap();
        assert_eq!(value, None);
        assert!(!cache.exists("k"));
        // The stale entry was evicted on read.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let cache = MemoryCache::new();
        cache.set("k", &1u32, ttl::PREFERENCE).unwrap();
        cache.set("k", &2u32, ttl::PREFERENCE).unwrap();
        assert_eq!(cache.get::<u32>("k").unwrap(), Some(2));
    }

    #[test]
    fn test_clear_pattern_removes_only_matches() {
        let cache = MemoryCache::new();
        let user_a = Uuid::from_u128(1);
        let user_b = Uuid::from_u128(2);

        cache
            .set(&CacheKey::preference(user_a, "p"), &1u32, ttl::PREFERENCE)
            .unwrap();
        cache
            .set(&CacheKey::recommendations(user_a, "r"), &2u32, ttl::RECOMMENDATIONS)
            .unwrap();
        cache
            .set(&CacheKey::preference(user_b, "p"), &3u32, ttl::PREFERENCE)
            .unwrap();

        let removed = cache.clear(Some(&CacheKey::user_pattern(user_a)));
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.exists(&CacheKey::preference(user_b, "p")));
    }

    #[test]
    fn test_clear_all() {
        let cache = MemoryCache::new();
        cache.set("a", &1u32, ttl::PREFERENCE).unwrap();
        cache.set("b", &2u32, ttl::PREFERENCE).unwrap();
        assert_eq!(cache.clear(None), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = MemoryCache::with_capacity(2);
        cache.set("a", &1u32, ttl::PREFERENCE).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        cache.set("b", &2u32, ttl::PREFERENCE).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        cache.set("c", &3u32, ttl::PREFERENCE).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!cache.exists("a"));
        assert!(cache.exists("b"));
        assert!(cache.exists("c"));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("v1:pref:*", "v1:pref:abc"));
        assert!(glob_match("v1:*:u1:*", "v1:recs:u1:params"));
        assert!(!glob_match("v1:*:u1:*", "v1:recs:u2:params"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
        assert!(glob_match("*", "anything"));
    }
}
