//! Process-wide caches for the retrieval pipeline.
//!
//! Two caches live here:
//!
//! - [`EmbeddingCache`] - a bounded in-memory LRU for question embeddings.
//!   Keys are SHA-256 hashes of `normalized_text + model_id`, so repeated
//!   (or whitespace/case-variant) questions hit without re-calling the
//!   embedding provider. Entries are bounded in count and age.
//! - [`ShardListCache`] - the cached shard list with a TTL. Replacement is
//!   copy-on-write through an atomic swap: readers either see the previous
//!   complete list or the new complete list, never a partial one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::vectorstore::CollectionInfo;

// ============================================================================
// Cache Statistics
// ============================================================================

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently cached.
    pub entry_count: usize,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

// ============================================================================
// Embedding Cache
// ============================================================================

/// Default entry bound for the embedding cache.
pub const DEFAULT_EMBED_CACHE_ENTRIES: usize = 1024;

/// Default maximum age for a cached embedding.
pub const DEFAULT_EMBED_CACHE_MAX_AGE: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct CacheEntry {
    embedding: Vec<f32>,
    created_at: Instant,
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(embedding: Vec<f32>) -> Self {
        let now = Instant::now();
        Self {
            embedding,
            created_at: now,
            last_accessed: now,
        }
    }

    fn is_expired(&self, max_age: Duration) -> bool {
        self.created_at.elapsed() > max_age
    }
}

/// In-memory LRU cache for question embeddings.
///
/// Bounded in entry count and entry age. Thread-safe via
/// `parking_lot::RwLock`; writers replace entries wholesale so readers
/// never observe a partially written vector.
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_entries: usize,
    max_age: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl EmbeddingCache {
    /// Create a cache bounded to `max_entries` entries and `max_age` age.
    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            max_age,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a cache with the default bounds.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_EMBED_CACHE_ENTRIES, DEFAULT_EMBED_CACHE_MAX_AGE)
    }

    /// Compute the cache key for a normalized text and model id.
    pub fn compute_key(text: &str, model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(b"|");
        hasher.update(model.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Get an embedding from the cache.
    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(self.max_age) => {}
                _ => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Promote under the write lock; the entry may have expired in the gap.
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(self.max_age) => {
                entry.last_accessed = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.embedding.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store an embedding, evicting the least recently used entry when the
    /// cache is at capacity.
    pub fn put_if_absent(&self, key: &str, embedding: Vec<f32>) {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(key) {
            if !existing.is_expired(self.max_age) {
                return;
            }
        }

        while entries.len() >= self.max_entries {
            let lru_key = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(key, _)| key.clone());
            match lru_key {
                Some(key) => {
                    entries.remove(&key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        entries.insert(key.to_string(), CacheEntry::new(embedding));
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.entries.write().clear();
    }

    /// Current cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.read().len(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Shard List Cache
// ============================================================================

/// An immutable snapshot of the store's shard list.
#[derive(Debug, Clone)]
pub struct CachedShardList {
    /// The corpus shards, sorted by name.
    pub shards: Vec<CollectionInfo>,
    /// Monotonic fetch time, used for TTL checks.
    pub fetched_at: Instant,
    /// Wall-clock fetch time, for observability.
    pub fetched_at_utc: DateTime<Utc>,
}

/// TTL cache over the shard list with atomic whole-list replacement.
///
/// The shard set changes rarely (minutes), so a 60-minute TTL is the
/// default. `get_stale` ignores the TTL and is used as a fallback when the
/// store cannot be listed.
pub struct ShardListCache {
    inner: ArcSwapOption<CachedShardList>,
    ttl: Duration,
}

impl ShardListCache {
    /// Create a cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: ArcSwapOption::from(None),
            ttl,
        }
    }

    /// Get the cached list if it is still fresh.
    pub fn get(&self) -> Option<Arc<CachedShardList>> {
        self.inner
            .load_full()
            .filter(|cached| cached.fetched_at.elapsed() <= self.ttl)
    }

    /// Get the cached list regardless of age.
    pub fn get_stale(&self) -> Option<Arc<CachedShardList>> {
        self.inner.load_full()
    }

    /// Replace the cached list atomically.
    pub fn replace(&self, shards: Vec<CollectionInfo>) -> Arc<CachedShardList> {
        let cached = Arc::new(CachedShardList {
            shards,
            fetched_at: Instant::now(),
            fetched_at_utc: Utc::now(),
        });
        self.inner.store(Some(Arc::clone(&cached)));
        cached
    }

    /// Drop the cached list.
    pub fn invalidate_all(&self) {
        self.inner.store(None);
    }
}

// ============================================================================
// Tests
// ============================================================================
