//! Statement cache statistics for monitoring and debugging.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for statement cache activity.
///
/// `no_key` counts statements that were structurally ineligible for caching,
/// so "never cacheable" can be told apart from "cache cold" (`misses`).
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of keyed lookups.
    lookups: AtomicU64,
    /// Number of lookups that found an entry.
    hits: AtomicU64,
    /// Number of lookups that had to compile.
    misses: AtomicU64,
    /// Number of statements that produced no cache key.
    no_key: AtomicU64,
    /// Number of entries inserted.
    inserts: AtomicU64,
    /// Number of entries discarded by pruning.
    evictions: AtomicU64,
    /// Number of pruning passes.
    prunes: AtomicU64,
}

impl CacheStats {
    /// Creates new statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a keyed lookup.
    #[inline]
    pub fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cache hit.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cache miss.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a statement without a cache key.
    #[inline]
    pub fn record_no_key(&self) {
        self.no_key.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `count` statements without a cache key.
    #[inline]
    pub fn add_no_key(&self, count: u64) {
        self.no_key.fetch_add(count, Ordering::Relaxed);
    }

    /// Records an insertion.
    #[inline]
    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a pruning pass that discarded `evicted` entries.
    #[inline]
    pub fn record_prune(&self, evicted: usize) {
        self.prunes.fetch_add(1, Ordering::Relaxed);
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    /// Returns keyed lookups.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Returns cache hits.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns cache misses.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns statements that had no cache key.
    pub fn no_key(&self) -> u64 {
        self.no_key.load(Ordering::Relaxed)
    }

    /// Returns insertions.
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Returns entries discarded by pruning.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Returns pruning passes.
    pub fn prunes(&self) -> u64 {
        self.prunes.load(Ordering::Relaxed)
    }

    /// Returns the hit ratio over keyed lookups (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            0.0
        } else {
            self.hits() as f64 / lookups as f64
        }
    }

    /// Resets all statistics.
    pub fn reset(&self) {
        self.lookups.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.no_key.store(0, Ordering::Relaxed);
        self.inserts.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.prunes.store(0, Ordering::Relaxed);
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        Self {
            lookups: AtomicU64::new(self.lookups()),
            hits: AtomicU64::new(self.hits()),
            misses: AtomicU64::new(self.misses()),
            no_key: AtomicU64::new(self.no_key()),
            inserts: AtomicU64::new(self.inserts()),
            evictions: AtomicU64::new(self.evictions()),
            prunes: AtomicU64::new(self.prunes()),
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CacheStats {{ lookups: {}, hits: {}, misses: {}, no_key: {}, hit_ratio: {:.2}%, evictions: {} }}",
            self.lookups(),
            self.hits(),
            self.misses(),
            self.no_key(),
            self.hit_ratio() * 100.0,
            self.evictions()
        )
    }
}
