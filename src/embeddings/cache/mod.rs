
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

/// Default number of vectors kept before eviction starts.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// BLAKE3 digest of an input text; the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    #[inline]
    pub fn of(text: &str) -> Self {
        Self(*blake3::hash(text.as_bytes()).as_bytes())
    }
}

impl fmt::Display for ContentHash {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Hit/miss counters and current occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Content-addressed embedding cache with least-recently-used eviction.
///
/// Not internally synchronized; [`super::EmbeddingService`] wraps it in a
/// mutex.
#[derive(Debug)]
pub struct EmbeddingCache {
    capacity: usize,
    entries: HashMap<ContentHash, CacheEntry>,
    recency: BTreeMap<u64, ContentHash>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

#[derive(Debug)]
struct CacheEntry {
    vector: Arc<[f32]>,
    last_used: u64,
}

impl EmbeddingCache {
    /// A capacity of zero is treated as one.
    #[inline]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    #[inline]
    pub fn get(&mut self, key: &ContentHash) -> Option<Arc<[f32]>> {
        self.tick += 1;
        let tick = self.tick;
        let Some(entry) = self.entries.get_mut(key) else {
            self.misses += 1;
            return None;
        };

        self.recency.remove(&entry.last_used);
        entry.last_used = tick;
        self.recency.insert(tick, *key);
        self.hits += 1;
        Some(Arc::clone(&entry.vector))
    }

    /// Insert or refresh a vector, evicting the least recently used entry when full.
    #[inline]
    pub fn insert(&mut self, key: ContentHash, vector: Arc<[f32]>) {
        self.tick += 1;
        let tick = self.tick;

        if let Some(previous) = self.entries.insert(
            key,
            CacheEntry {
                vector,
                last_used: tick,
            },
        ) {
            self.recency.remove(&previous.last_used);
        }
        self.recency.insert(tick, key);

        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            self.evictions += 1;
            debug!("Evicted cached embedding {}", oldest);
        }
    }

    #[inline]
    pub fn contains(&self, key: &ContentHash) -> bool {
        self.entries.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    #[inline]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
