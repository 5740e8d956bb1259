//! # Seen Cache
//!
//! Bounded dedup store for message identities. The publish path records
//! every locally-originated message here immediately after signing, so a
//! copy that loops back from the network is recognized as already seen and
//! not re-emitted to local subscribers.
//!
//! Dedup is best-effort: entries age out by LRU capacity eviction and by a
//! TTL checked on read. Eviction under sustained load is allowed and never
//! panics; `has` may legitimately return `false` for an evicted id.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::messages::MessageId;

/// Default number of message ids the cache retains.
pub const DEFAULT_SEEN_CACHE_CAPACITY: usize = 10_000;

/// Default time-to-live for a cached id.
pub const DEFAULT_SEEN_TTL: Duration = Duration::from_secs(120);

/// Bounded, thread-safe set of recently seen message identities.
///
/// A single mutex guards the LRU map; insertion and lookup are short
/// critical sections safe to call from concurrent publish paths.
pub struct SeenCache {
    inner: Mutex<LruCache<MessageId, Instant>>,
    ttl: Duration,
}

impl SeenCache {
    /// Create a cache holding at most `capacity` ids, each for at most `ttl`.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or(NonZeroUsize::new(DEFAULT_SEEN_CACHE_CAPACITY).expect("default capacity is non-zero"));
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Record a message id as seen. Evicts the oldest entry when full.
    pub fn put(&self, id: MessageId) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.put(id, Instant::now());
    }

    /// Whether `id` was recorded and has neither expired nor been evicted.
    ///
    /// Expired entries are dropped on observation.
    pub fn has(&self, id: &MessageId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.peek(id) {
            Some(inserted_at) if inserted_at.elapsed() <= self.ttl => true,
            Some(_) => {
                inner.pop(id);
                false
            }
            None => false,
        }
    }

    /// Number of ids currently retained (including not-yet-observed expired
    /// entries).
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SeenCache {
    fn default() -> Self {
        Self::new(DEFAULT_SEEN_CACHE_CAPACITY, DEFAULT_SEEN_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(n: u8) -> MessageId {
        [n; 32]
    }

    #[test]
    fn put_then_has() {
        let cache = SeenCache::default();
        assert!(!cache.has(&id(1)));
        cache.put(id(1));
        assert!(cache.has(&id(1)));
        assert!(!cache.has(&id(2)));
    }

    #[test]
    fn capacity_eviction_is_oldest_first() {
        let cache = SeenCache::new(2, DEFAULT_SEEN_TTL);
        cache.put(id(1));
        cache.put(id(2));
        cache.put(id(3));
        assert!(!cache.has(&id(1)), "oldest entry must be evicted");
        assert!(cache.has(&id(2)));
        assert!(cache.has(&id(3)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = SeenCache::new(16, Duration::from_millis(10));
        cache.put(id(1));
        assert!(cache.has(&id(1)));
        std::thread::sleep(Duration::from_millis(25));
        assert!(!cache.has(&id(1)), "expired entry must read as unseen");
    }

    #[test]
    fn zero_capacity_falls_back_to_default() {
        let cache = SeenCache::new(0, DEFAULT_SEEN_TTL);
        cache.put(id(1));
        assert!(cache.has(&id(1)));
    }

    #[test]
    fn concurrent_insertion_is_safe() {
        let cache = Arc::new(SeenCache::new(1024, DEFAULT_SEEN_TTL));
        let mut handles = Vec::new();
        for t in 0..8u8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..64u8 {
                    let mut mid = [0u8; 32];
                    mid[0] = t;
                    mid[1] = i;
                    cache.put(mid);
                    assert!(cache.has(&mid));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("thread must not panic");
        }
        assert_eq!(cache.len(), 8 * 64);
    }
}
