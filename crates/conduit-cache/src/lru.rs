//! LRU cache with a soft overflow ceiling.
//!
//! Entries carry a monotonically increasing access marker instead of living
//! in a linked list. The cache is allowed to grow past its target size up to
//! `target * overflow_factor`; the insert that crosses that ceiling prunes
//! the least recently accessed entries until exactly `target` remain. This
//! amortizes eviction over many inserts, which suits compiled statements
//! that are expensive to build but cheap to keep.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use conduit_common::CACHE_OVERFLOW_FACTOR;

use crate::stats::CacheStats;

struct Slot<V> {
    value: V,
    last_access: u64,
}

/// An LRU cache pruned in batches once it overflows.
///
/// # Example
///
/// ```
/// use conduit_cache::lru::LruCache;
///
/// let mut cache = LruCache::new(2);
/// cache.insert("a", 1);
/// cache.insert("b", 2);
/// cache.insert("c", 3);
/// // 3 entries is exactly 1.5x the target, still under the ceiling
/// assert_eq!(cache.len(), 3);
///
/// cache.get(&"a");
/// cache.insert("d", 4);
/// // the ceiling was crossed: pruned back to the 2 most recent entries
/// assert_eq!(cache.len(), 2);
/// assert!(cache.contains(&"a"));
/// assert!(cache.contains(&"d"));
/// ```
pub struct LruCache<K, V> {
    /// Size pruning brings the cache back to.
    target: usize,
    /// Size above which an insert triggers pruning.
    ceiling: usize,
    map: HashMap<K, Slot<V>>,
    /// Source of access markers.
    counter: u64,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// Creates a cache with the given target size and the default 1.5x
    /// overflow factor.
    pub fn new(target: usize) -> Self {
        Self::with_overflow(target, CACHE_OVERFLOW_FACTOR)
    }

    /// Creates a cache with an explicit overflow factor (clamped to >= 1.0).
    pub fn with_overflow(target: usize, overflow_factor: f64) -> Self {
        let target = target.max(1);
        let ceiling = (target as f64 * overflow_factor.max(1.0)).floor() as usize;
        Self {
            target,
            ceiling: ceiling.max(target),
            map: HashMap::with_capacity(ceiling + 1),
            counter: 0,
            stats: CacheStats::new(),
        }
    }

    /// Returns the current number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the size the cache prunes back to.
    pub fn target(&self) -> usize {
        self.target
    }

    /// Returns the size above which the cache prunes.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Gets a reference to the value for the given key.
    ///
    /// This marks the entry as recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.stats.record_lookup();
        self.counter += 1;
        let marker = self.counter;

        match self.map.get_mut(key) {
            Some(slot) => {
                self.stats.record_hit();
                slot.last_access = marker;
                Some(&slot.value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Checks if the cache contains the given key without updating recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Inserts a key-value pair, returning the previous value if any.
    ///
    /// Prunes down to the target size if the insert pushes the cache past
    /// its ceiling.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.stats.record_insert();
        self.counter += 1;
        let slot = Slot {
            value,
            last_access: self.counter,
        };

        let old = self.map.insert(key, slot).map(|slot| slot.value);
        if self.map.len() > self.ceiling {
            self.prune();
        }
        old
    }

    /// Removes an entry from the cache.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.remove(key).map(|slot| slot.value)
    }

    /// Clears all entries from the cache.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Discards the least recently accessed entries until `target` remain.
    fn prune(&mut self) {
        let excess = self.map.len().saturating_sub(self.target);
        if excess == 0 {
            return;
        }

        let mut by_age: Vec<(u64, K)> = self
            .map
            .iter()
            .map(|(key, slot)| (slot.last_access, key.clone()))
            .collect();
        by_age.sort_unstable_by_key(|(marker, _)| *marker);

        for (_, key) in by_age.into_iter().take(excess) {
            self.map.remove(&key);
        }
        self.stats.record_prune(excess);
    }
}

impl<K, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("len", &self.map.len())
            .field("target", &self.target)
            .field("ceiling", &self.ceiling)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let mut cache = LruCache::new(3);

        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.get(&"b"), Some(&2));
        assert_eq!(cache.get(&"c"), Some(&3));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_overflow_then_prune_to_target() {
        let mut cache = LruCache::new(10);
        assert_eq!(cache.ceiling(), 15);

        for i in 0..15 {
            cache.insert(i, i);
        }
        assert_eq!(cache.len(), 15);

        cache.insert(15, 15);
        assert_eq!(cache.len(), 10);
        assert_eq!(cache.stats().prunes(), 1);
        assert_eq!(cache.stats().evictions(), 6);

        // The oldest six were discarded.
        for i in 0..6 {
            assert!(!cache.contains(&i));
        }
        for i in 6..16 {
            assert!(cache.contains(&i));
        }
    }

    #[test]
    fn test_size_never_exceeds_ceiling() {
        let mut cache = LruCache::new(20);
        for i in 0..1000 {
            cache.insert(i, i);
            assert!(cache.len() <= cache.ceiling());
        }
    }

    #[test]
    fn test_access_updates_recency() {
        let mut cache = LruCache::new(2);

        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        // "a" becomes the most recent; "b" and "c" are older.
        cache.get(&"a");
        cache.insert("d", 4);

        assert!(cache.contains(&"a"));
        assert!(cache.contains(&"d"));
        assert!(!cache.contains(&"b"));
        assert!(!cache.contains(&"c"));
    }

    #[test]
    fn test_update_existing() {
        let mut cache = LruCache::new(2);

        cache.insert("a", 1);
        let old = cache.insert("a", 10);

        assert_eq!(old, Some(1));
        assert_eq!(cache.get(&"a"), Some(&10));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = LruCache::new(3);

        cache.insert("a", 1);
        cache.insert("b", 2);

        assert_eq!(cache.remove(&"a"), Some(1));
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_statistics() {
        let mut cache = LruCache::new(2);

        cache.insert("a", 1);
        cache.get(&"a");
        cache.get(&"b");

        let stats = cache.stats();
        assert_eq!(stats.hits(), 1);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.inserts(), 1);
    }
}
