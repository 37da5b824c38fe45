use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;

use super::VectorIndex;

struct CacheEntry {
    index: Arc<dyn VectorIndex>,
    built_at: Instant,
}

/// Cross-request cache of built indices, keyed by document fingerprint.
/// Capacity-bounded (LRU) and TTL-bounded; entries hold frozen indices,
/// so a cache hit skips extraction, embedding and index build entirely.
pub struct IndexCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl IndexCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<Arc<dyn VectorIndex>> {
        let mut cache = self.inner.lock().ok()?;
        let expired = match cache.get(fingerprint) {
            Some(entry) if entry.built_at.elapsed() <= self.ttl => {
                return Some(entry.index.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(fingerprint);
            log::debug!("Evicted expired index for fingerprint {}", fingerprint);
        }
        None
    }

    pub fn put(&self, fingerprint: &str, index: Arc<dyn VectorIndex>) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.put(
                fingerprint.to_string(),
                CacheEntry {
                    index,
                    built_at: Instant::now(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::InMemoryIndex;
    use crate::types::Chunk;

    fn index() -> Arc<dyn VectorIndex> {
        let chunk = Chunk {
            id: "c0".into(),
            text: "text".into(),
            start: 0,
            end: 4,
            seq: 0,
            page: None,
            section: None,
        };
        Arc::new(InMemoryIndex::build(vec![chunk], vec![vec![1.0]]).unwrap())
    }

    #[test]
    fn hit_within_ttl() {
        let cache = IndexCache::new(2, Duration::from_secs(60));
        cache.put("abc", index());
        assert!(cache.get("abc").is_some());
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn expired_entries_are_evicted() {
        let cache = IndexCache::new(2, Duration::from_millis(0));
        cache.put("abc", index());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("abc").is_none());
    }

    #[test]
    fn capacity_bound_evicts_least_recently_used() {
        let cache = IndexCache::new(1, Duration::from_secs(60));
        cache.put("a", index());
        cache.put("b", index());
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }
}
