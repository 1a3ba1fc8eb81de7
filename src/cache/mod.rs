//! Cache bins used by the registries and entity storage.
//!
//! Callers depend on [`CacheBackend`] rather than on a shared static, so each
//! service can be handed an LRU bin, a null bin for tests, or its own
//! implementation.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use lru::LruCache;

pub trait CacheBackend<V: Clone>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;

    fn set(&self, key: &str, value: V);

    /// Drops exactly the given keys; other entries stay cached.
    fn invalidate(&self, keys: &[&str]);

    fn invalidate_all(&self);

    fn contains(&self, key: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded least-recently-used bin.
pub struct LruCacheBackend<V> {
    entries: Mutex<LruCache<String, V>>,
}

impl<V> LruCacheBackend<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    // A panic while holding the lock cannot leave the LRU half-updated in a
    // way that matters for a cache, so poisoning is ignored.
    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone + Send> CacheBackend<V> for LruCacheBackend<V> {
    fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: V) {
        self.lock().put(key.to_string(), value);
    }

    fn invalidate(&self, keys: &[&str]) {
        let mut entries = self.lock();
        for key in keys {
            entries.pop(*key);
        }
    }

    fn invalidate_all(&self) {
        self.lock().clear();
    }

    fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Bin that never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCacheBackend;

impl<V: Clone> CacheBackend<V> for NullCacheBackend {
    fn get(&self, _key: &str) -> Option<V> {
        None
    }

    fn set(&self, _key: &str, _value: V) {}

    fn invalidate(&self, _keys: &[&str]) {}

    fn invalidate_all(&self) {}

    fn contains(&self, _key: &str) -> bool {
        false
    }

    fn len(&self) -> usize {
        0
    }
}
