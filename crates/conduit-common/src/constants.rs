//! System-wide constants for Conduit.

// =============================================================================
// Statement Cache
// =============================================================================

/// Default target size of the compiled statement cache.
pub const DEFAULT_CACHE_SIZE: usize = 500;

/// Multiple of the target size the cache may reach before it is pruned.
///
/// Pruning brings the cache back down to exactly the target size.
pub const CACHE_OVERFLOW_FACTOR: f64 = 1.5;

/// Maximum number of distinct lambda callsite keys tracked per engine.
pub const DEFAULT_LAMBDA_CACHE_SIZE: usize = 500;

// =============================================================================
// Result Buffering
// =============================================================================

/// Default ceiling for the adaptive row buffer when streaming.
pub const DEFAULT_MAX_ROW_BUFFER: usize = 1000;

/// Number of rows pre-fetched when a streaming result is constructed.
pub const STREAM_PREFETCH_ROWS: usize = 1;

/// Factor by which the adaptive fetch size grows after every fetch.
pub const STREAM_GROWTH_FACTOR: usize = 5;

// =============================================================================
// Pool
// =============================================================================

/// Default maximum number of physical connections per pool.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Default time to wait for a pooled connection, in milliseconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// Transactions
// =============================================================================

/// Prefix of generated savepoint names.
pub const SAVEPOINT_PREFIX: &str = "sa_savepoint_";
