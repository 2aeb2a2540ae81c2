//! Shared cache of compiled statements.
//!
//! Compiling a statement to its string form and result metadata is the most
//! expensive step of execution after the round trip itself. This cache maps a
//! structural key to the compiled form so that statements with the same shape
//! but different literal values compile once.
//!
//! The cache is shared by every connection of an engine. Lookups, recency
//! updates and inserts happen under one lock, so concurrent callers never see
//! a torn entry; compilation runs outside the lock.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::lru::LruCache;
use crate::stats::CacheStats;

/// A cached compiled statement.
#[derive(Debug)]
pub struct CachedEntry<V> {
    /// The compiled value.
    pub value: Arc<V>,
    /// When this entry was created.
    pub created_at: Instant,
}

impl<V> Clone for CachedEntry<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            created_at: self.created_at,
        }
    }
}

/// How a statement's compiled form was obtained, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheOutcome {
    /// Driver-level SQL passed straight through; nothing was compiled.
    RawSql,
    /// The statement is structurally ineligible for caching; compiled in the
    /// given time and not stored.
    NoKey(Duration),
    /// Caching was disabled for this call; compiled in the given time.
    Disabled(Duration),
    /// Cache miss; compiled in the given time and stored.
    Generated(Duration),
    /// Cache hit; the entry has been resident for the given time.
    CachedSince(Duration),
}

impl CacheOutcome {
    /// Returns true for a cache hit.
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheOutcome::CachedSince(_))
    }

    /// Returns true for a cache miss that stored a new entry.
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheOutcome::Generated(_))
    }

    /// Returns true if the statement could not be keyed.
    pub fn is_no_key(&self) -> bool {
        matches!(self, CacheOutcome::NoKey(_))
    }
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheOutcome::RawSql => write!(f, "[raw sql]"),
            CacheOutcome::NoKey(t) => write!(f, "[no key {:.5}s]", t.as_secs_f64()),
            CacheOutcome::Disabled(t) => {
                write!(f, "[caching disabled {:.5}s]", t.as_secs_f64())
            }
            CacheOutcome::Generated(t) => write!(f, "[generated in {:.5}s]", t.as_secs_f64()),
            CacheOutcome::CachedSince(t) => {
                write!(f, "[cached since {:.4}s ago]", t.as_secs_f64())
            }
        }
    }
}

/// A thread-safe compiled statement cache.
///
/// # Example
///
/// ```
/// use conduit_cache::StatementCache;
///
/// let cache: StatementCache<String, String> = StatementCache::new(500);
///
/// let (compiled, outcome) = cache
///     .get_or_compile("select:users".to_string(), || Ok::<_, ()>("SELECT ...".to_string()))
///     .unwrap();
/// assert!(outcome.is_miss());
///
/// let (again, outcome) = cache
///     .get_or_compile("select:users".to_string(), || Ok::<_, ()>(unreachable!()))
///     .unwrap();
/// assert!(outcome.is_hit());
/// assert_eq!(compiled, again);
/// ```
pub struct StatementCache<K, V> {
    inner: Mutex<LruCache<K, CachedEntry<V>>>,
    /// Statements that bypassed the cache; kept outside the LRU's own stats.
    no_key: CacheStats,
}

impl<K: Hash + Eq + Clone, V> StatementCache<K, V> {
    /// Creates a cache with the given target size.
    pub fn new(target_size: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(target_size)),
            no_key: CacheStats::new(),
        }
    }

    /// Looks up `key`, compiling and storing the value on a miss.
    ///
    /// The compile closure runs without the cache lock held. If another
    /// caller stored the same key in the meantime, that entry wins and the
    /// freshly compiled value is returned but not stored.
    pub fn get_or_compile<E, F>(&self, key: K, compile: F) -> Result<(Arc<V>, CacheOutcome), E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(entry) = self.inner.lock().get(&key) {
            return Ok((
                Arc::clone(&entry.value),
                CacheOutcome::CachedSince(entry.created_at.elapsed()),
            ));
        }

        let start = Instant::now();
        let value = Arc::new(compile()?);
        let elapsed = start.elapsed();

        let mut inner = self.inner.lock();
        if !inner.contains(&key) {
            inner.insert(
                key,
                CachedEntry {
                    value: Arc::clone(&value),
                    created_at: Instant::now(),
                },
            );
        }
        Ok((value, CacheOutcome::Generated(elapsed)))
    }

    /// Returns the cached entry for `key`, marking it recently used.
    pub fn get(&self, key: &K) -> Option<CachedEntry<V>> {
        self.inner.lock().get(key).cloned()
    }

    /// Records a statement that could not be keyed.
    pub fn record_no_key(&self) {
        self.no_key.record_no_key();
    }

    /// Returns true if the cache holds `key`, without touching recency.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains(key)
    }

    /// Returns the number of cached statements.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Returns the size the cache prunes back to.
    pub fn target_size(&self) -> usize {
        self.inner.lock().target()
    }

    /// Clears all cached statements.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Returns a snapshot of the cache statistics.
    pub fn stats(&self) -> CacheStats {
        let stats = self.inner.lock().stats().clone();
        stats.add_no_key(self.no_key.no_key());
        stats
    }
}

impl<K, V> fmt::Debug for StatementCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementCache")
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_miss_then_hit() {
        let cache: StatementCache<u64, String> = StatementCache::new(10);

        let (first, outcome) = cache
            .get_or_compile(1, || Ok::<_, ()>("compiled".to_string()))
            .unwrap();
        assert!(outcome.is_miss());

        let (second, outcome) = cache
            .get_or_compile(1, || Ok::<_, ()>("recompiled".to_string()))
            .unwrap();
        assert!(outcome.is_hit());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_compile_error_stores_nothing() {
        let cache: StatementCache<u64, String> = StatementCache::new(10);
        let result = cache.get_or_compile(1, || Err("boom"));
        assert_eq!(result.unwrap_err(), "boom");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_prunes_to_target() {
        let cache: StatementCache<u64, u64> = StatementCache::new(4);
        for i in 0..7 {
            cache.get_or_compile(i, || Ok::<_, ()>(i)).unwrap();
        }
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.stats().evictions(), 3);
    }

    #[test]
    fn test_no_key_counted_separately() {
        let cache: StatementCache<u64, u64> = StatementCache::new(4);
        cache.record_no_key();
        cache.record_no_key();

        let stats = cache.stats();
        assert_eq!(stats.no_key(), 2);
        assert_eq!(stats.misses(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(CacheOutcome::RawSql.to_string(), "[raw sql]");
        assert!(CacheOutcome::Generated(Duration::from_millis(1))
            .to_string()
            .starts_with("[generated in 0.00100s"));
        assert!(CacheOutcome::CachedSince(Duration::from_secs(3))
            .to_string()
            .starts_with("[cached since 3.0000s ago"));
    }

    #[test]
    fn test_concurrent_access() {
        let cache: Arc<StatementCache<u64, u64>> = Arc::new(StatementCache::new(50));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200 {
                        let key = (i + t) % 100;
                        let (value, _) = cache.get_or_compile(key, || Ok::<_, ()>(key * 2)).unwrap();
                        assert_eq!(*value, key * 2);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 75);
    }
}
