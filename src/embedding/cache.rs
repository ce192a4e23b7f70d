//! Query embedding cache with LRU eviction and optional expiry.
//!
//! Entries are keyed by a BLAKE3 hash of the model name and the exact query
//! text, and hold nothing but the vector. The lock is only taken for map
//! operations and never held across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Time source used for entry expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.origin + *offset
    }
}

/// A cached embedding entry.
struct CacheEntry {
    vector: Arc<Vec<f32>>,
    /// Access counter for LRU eviction
    last_access: u64,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<blake3::Hash, CacheEntry>,
    access_counter: u64,
    stats: CacheStats,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Bounded LRU cache of query embeddings
pub struct EmbeddingCache {
    state: Mutex<CacheState>,
    max_size: usize,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl EmbeddingCache {
    /// Create a cache holding at most `max_size` vectors; 0 disables caching
    pub fn new(max_size: usize, ttl: Option<Duration>) -> Self {
        Self::with_clock(max_size, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(max_size: usize, ttl: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_size,
            ttl,
            clock,
        }
    }

    /// Compute the key for a model/text pair.
    fn key(model: &str, text: &str) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(model.as_bytes());
        hasher.update(&[0]);
        hasher.update(text.as_bytes());
        hasher.finalize()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.inserted_at) >= ttl)
    }

    /// Look up a vector, refreshing its recency on a hit
    pub fn get(&self, model: &str, text: &str) -> Option<Arc<Vec<f32>>> {
        let key = Self::key(model, text);
        let now = self.clock.now();
        let mut state = self.lock();

        let expired = match state.entries.get(&key) {
            Some(entry) => self.is_expired(entry, now),
            None => {
                state.stats.misses += 1;
                return None;
            }
        };

        if expired {
            state.entries.remove(&key);
            state.stats.misses += 1;
            return None;
        }

        state.access_counter += 1;
        let access = state.access_counter;
        state.stats.hits += 1;
        state.entries.get_mut(&key).map(|entry| {
            entry.last_access = access;
            Arc::clone(&entry.vector)
        })
    }

    /// Store a vector, evicting the least recently used entry when full
    pub fn insert(&self, model: &str, text: &str, vector: Arc<Vec<f32>>) {
        if self.max_size == 0 {
            return;
        }

        let key = Self::key(model, text);
        let now = self.clock.now();
        let mut state = self.lock();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_size {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                state.stats.evictions += 1;
                debug!("Evicted least recently used embedding");
            }
        }

        state.access_counter += 1;
        let access = state.access_counter;
        state.entries.insert(
            key,
            CacheEntry {
                vector,
                last_access: access,
                inserted_at: now,
            },
        );
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear the cache.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_of(x: f32) -> Arc<Vec<f32>> {
        Arc::new(vec![x, x])
    }

    #[test]
    fn test_hit_and_miss_counted() {
        let cache = EmbeddingCache::new(4, None);
        assert!(cache.get("m", "hello").is_none());

        cache.insert("m", "hello", vec_of(1.0));
        assert_eq!(cache.get("m", "hello").unwrap().as_slice(), &[1.0, 1.0]);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_key_includes_model() {
        let cache = EmbeddingCache::new(4, None);
        cache.insert("model-a", "hello", vec_of(1.0));
        assert!(cache.get("model-b", "hello").is_none());
        assert!(cache.get("model-a", "hello").is_some());
    }

    #[test]
    fn test_least_recently_used_evicted() {
        let cache = EmbeddingCache::new(2, None);
        cache.insert("m", "a", vec_of(1.0));
        cache.insert("m", "b", vec_of(2.0));

        // Touch "a" so "b" becomes the eviction victim
        assert!(cache.get("m", "a").is_some());
        cache.insert("m", "c", vec_of(3.0));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("m", "a").is_some());
        assert!(cache.get("m", "b").is_none());
        assert!(cache.get("m", "c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_entries_expire() {
        let clock = Arc::new(ManualClock::new());
        let cache = EmbeddingCache::with_clock(4, Some(Duration::from_secs(60)), clock.clone());

        cache.insert("m", "q", vec_of(1.0));
        clock.advance(Duration::from_secs(59));
        assert!(cache.get("m", "q").is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get("m", "q").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = EmbeddingCache::new(0, None);
        cache.insert("m", "q", vec_of(1.0));
        assert!(cache.get("m", "q").is_none());
    }
}
