//! Execution options.
//!
//! Options can be set on an engine, a connection or a single statement. Each
//! level overlays the one below it; unset fields fall through.

use std::fmt;
use std::sync::Arc;

use conduit_cache::StatementCache;
use conduit_common::IsolationLevel;
use conduit_sql::{CacheKey, CompiledStatement, SchemaTranslateMap};

use crate::error::{EngineError, EngineResult};

/// The compiled statement cache type used by engines.
pub type CompiledCache = StatementCache<CacheKey, CompiledStatement>;

/// Which compiled statement cache a statement uses.
#[derive(Clone)]
pub enum CacheSetting {
    /// Use the given cache.
    Shared(Arc<CompiledCache>),
    /// Compile every statement afresh.
    Disabled,
}

impl fmt::Debug for CacheSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheSetting::Shared(cache) => f
                .debug_tuple("Shared")
                .field(&Arc::as_ptr(cache))
                .finish(),
            CacheSetting::Disabled => f.write_str("Disabled"),
        }
    }
}

/// Options overlaying engine, connection and statement scope.
///
/// # Example
///
/// ```rust
/// use conduit_common::IsolationLevel;
/// use conduit_engine::ExecutionOptions;
///
/// let base = ExecutionOptions::new().stream_results(true);
/// let call = ExecutionOptions::new().yield_per(50);
/// let merged = base.merge(&call);
/// assert_eq!(merged.get_stream_results(), Some(true));
/// assert_eq!(merged.get_yield_per(), Some(50));
/// assert_eq!(merged.get_isolation_level(), None::<IsolationLevel>);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    isolation_level: Option<IsolationLevel>,
    stream_results: Option<bool>,
    max_row_buffer: Option<usize>,
    yield_per: Option<usize>,
    compiled_cache: Option<CacheSetting>,
    schema_translate_map: Option<Arc<SchemaTranslateMap>>,
}

impl ExecutionOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the isolation level. Valid on engines and connections only.
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Requests unbuffered results.
    pub fn stream_results(mut self, stream: bool) -> Self {
        self.stream_results = Some(stream);
        self
    }

    /// Sets the ceiling of the adaptive streaming buffer.
    pub fn max_row_buffer(mut self, rows: usize) -> Self {
        self.max_row_buffer = Some(rows);
        self
    }

    /// Fetches in fixed batches of `rows`; implies streaming.
    pub fn yield_per(mut self, rows: usize) -> Self {
        self.yield_per = Some(rows);
        self
    }

    /// Overrides the compiled statement cache.
    pub fn compiled_cache(mut self, setting: CacheSetting) -> Self {
        self.compiled_cache = Some(setting);
        self
    }

    /// Sets the schema translation map.
    pub fn schema_translate_map(mut self, map: SchemaTranslateMap) -> Self {
        self.schema_translate_map = Some(Arc::new(map));
        self
    }

    /// Returns the isolation level, if set.
    pub fn get_isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation_level
    }

    /// Returns the streaming flag, if set.
    pub fn get_stream_results(&self) -> Option<bool> {
        self.stream_results
    }

    /// Returns the buffer ceiling, if set.
    pub fn get_max_row_buffer(&self) -> Option<usize> {
        self.max_row_buffer
    }

    /// Returns the fixed batch size, if set.
    pub fn get_yield_per(&self) -> Option<usize> {
        self.yield_per
    }

    /// Returns the cache override, if set.
    pub fn get_compiled_cache(&self) -> Option<&CacheSetting> {
        self.compiled_cache.as_ref()
    }

    /// Returns the schema translation map, if set.
    pub fn get_schema_translate_map(&self) -> Option<&SchemaTranslateMap> {
        self.schema_translate_map.as_deref()
    }

    /// Returns `self` overlaid with every option set in `other`.
    pub fn merge(&self, other: &ExecutionOptions) -> ExecutionOptions {
        ExecutionOptions {
            isolation_level: other.isolation_level.or(self.isolation_level),
            stream_results: other.stream_results.or(self.stream_results),
            max_row_buffer: other.max_row_buffer.or(self.max_row_buffer),
            yield_per: other.yield_per.or(self.yield_per),
            compiled_cache: other
                .compiled_cache
                .clone()
                .or_else(|| self.compiled_cache.clone()),
            schema_translate_map: other
                .schema_translate_map
                .clone()
                .or_else(|| self.schema_translate_map.clone()),
        }
    }

    /// Rejects options that cannot apply to a single statement.
    pub(crate) fn check_statement_scope(&self) -> EngineResult<()> {
        if self.isolation_level.is_some() {
            return Err(EngineError::InvalidOptionScope(
                "isolation_level may only be set on an engine or connection, not per statement"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn validate(&self) -> EngineResult<()> {
        if self.max_row_buffer == Some(0) {
            return Err(EngineError::InvalidOptionScope(
                "max_row_buffer must be greater than 0".to_string(),
            ));
        }
        if self.yield_per == Some(0) {
            return Err(EngineError::InvalidOptionScope(
                "yield_per must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
