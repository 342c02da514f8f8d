//! LRU cache for query results.
//!
//! Eviction is strictly recency-based. Hits increment a per-entry access
//! counter that only feeds statistics. Entries are tagged with the graph
//! revision they were computed against so a commit can drop everything
//! computed from older snapshots.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::debug;

const MIN_CAPACITY: NonZeroUsize = NonZeroUsize::MIN;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    version: u64,
    created_at: Instant,
    access_count: u64,
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Sum of access counts over live entries.
    pub total_accesses: u64,
    /// Mean access count over live entries (0 when empty).
    pub average_access_count: f64,
}

/// Bounded LRU of query key -> result.
pub struct QueryCache<V> {
    entries: LruCache<String, CacheEntry<V>>,
    stale_after: Duration,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V: Clone> QueryCache<V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize, stale_after: Duration) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(MIN_CAPACITY)),
            stale_after,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Change capacity and staleness threshold. Shrinking evicts the least
    /// recently used entries.
    pub fn configure(&mut self, capacity: usize, stale_after: Duration) {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(MIN_CAPACITY);
        let before = self.entries.len();
        self.entries.resize(capacity);
        self.evictions += (before - self.entries.len()) as u64;
        self.stale_after = stale_after;
    }

    /// Look up a key, promoting it to most recently used.
    pub fn get(&mut self, key: &str) -> Option<V> {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.access_count += 1;
                self.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Look up a key only if it was computed against `version` and is
    /// younger than the staleness threshold.
    ///
    /// An entry from another version, or a stale one, is removed and
    /// counted as a miss.
    pub fn get_current(&mut self, key: &str, version: u64) -> Option<V> {
        if let Some(entry) = self.entries.peek(key) {
            let stale = entry.created_at.elapsed() >= self.stale_after;
            if entry.version != version || stale {
                self.entries.pop(key);
                self.misses += 1;
                if stale {
                    debug!(key, "Dropped stale cache entry");
                }
                return None;
            }
        }
        self.get(key)
    }

    /// Insert a value tagged with the graph version it was computed from.
    pub fn set(&mut self, key: impl Into<String>, value: V, version: u64) {
        let entry = CacheEntry {
            value,
            version,
            created_at: Instant::now(),
            access_count: 0,
        };
        if let Some((evicted_key, _)) = self.entries.push(key.into(), entry) {
            // push returns the replaced entry on key reuse, the LRU entry on overflow
            if !self.entries.contains(&evicted_key) {
                self.evictions += 1;
                debug!(key = %evicted_key, "Evicted least recently used cache entry");
            }
        }
    }

    /// Whether a key is present, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// Remove every entry tagged with a version other than `current`.
    /// Returns the number removed.
    pub fn invalidate_by_version(&mut self, current: u64) -> usize {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.version != current)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            self.entries.pop(key);
        }
        if !stale.is_empty() {
            debug!(removed = stale.len(), version = current, "Invalidated cache by version");
        }
        stale.len()
    }

    /// Remove entries older than the staleness threshold, regardless of version.
    pub fn invalidate_stale(&mut self) -> usize {
        let threshold = self.stale_after;
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.created_at.elapsed() >= threshold)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            self.entries.pop(key);
        }
        stale.len()
    }

    /// Drop every entry and reset statistics.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let size = self.entries.len();
        let total_accesses: u64 = self.entries.iter().map(|(_, e)| e.access_count).sum();
        CacheStats {
            size,
            capacity: self.entries.cap().get(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            total_accesses,
            average_access_count: if size == 0 {
                0.0
            } else {
                total_accesses as f64 / size as f64
            },
        }
    }
}
