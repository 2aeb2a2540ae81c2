//! Compiled statement caching for Conduit.
//!
//! This crate provides the caching structures behind statement compilation:
//!
//! - **LRU Cache**: least-recently-used cache that overflows to 1.5x its
//!   target size and then prunes back to the target in one pass
//! - **Statement Cache**: thread-safe cache of compiled statements shared by
//!   all connections of an engine, reporting hit/miss/no-key outcomes
//! - **Statistics**: lock-free counters for monitoring
//!
//! # Example
//!
//! ```rust
//! use conduit_cache::lru::LruCache;
//!
//! let mut cache = LruCache::new(100);
//! cache.insert("key1", "value1");
//! assert_eq!(cache.get(&"key1"), Some(&"value1"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lru;
pub mod statement_cache;
pub mod stats;

pub use lru::LruCache;
pub use statement_cache::{CacheOutcome, CachedEntry, StatementCache};
pub use stats::CacheStats;
