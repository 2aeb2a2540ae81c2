//! Engines: the entry point owning the driver, pool and caches.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use conduit_cache::CacheStats;
use conduit_common::EngineConfig;
use conduit_sql::{Compiler, LambdaCache, NoKeyReason};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::connection::Connection;
use crate::driver::Driver;
use crate::error::{EngineError, EngineResult};
use crate::isolation;
use crate::options::{CompiledCache, ExecutionOptions};
use crate::pool::{Pool, PoolStats};
use crate::registry::{DriverRegistry, EngineUrl};
use crate::transaction::Transaction;

/// State shared by an engine and every engine derived from it.
pub(crate) struct EngineInner {
    pub(crate) url: EngineUrl,
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) config: EngineConfig,
    pool: RwLock<Arc<Pool>>,
    pub(crate) compiled_cache: Option<Arc<CompiledCache>>,
    pub(crate) lambda_cache: LambdaCache,
    pub(crate) compiler: Compiler,
    /// Custom constructs already warned about.
    warned: Mutex<HashSet<String>>,
}

impl EngineInner {
    /// The current pool.
    pub(crate) fn pool(&self) -> Arc<Pool> {
        Arc::clone(&self.pool.read())
    }

    /// Warns once per name about a construct that never declared whether
    /// it is safe to cache.
    pub(crate) fn warn_undeclared(&self, name: &str, reason: &NoKeyReason) {
        if self.warned.lock().insert(name.to_string()) {
            warn!(
                construct = name,
                "{reason}; statements using it will not be cached. \
                 Declare cache_ok as Some(true) if the construct is safe to cache, \
                 or Some(false) to silence this warning"
            );
        }
    }
}

/// Creates an engine for `url` using a driver from `registry`.
///
/// # Example
///
/// ```rust
/// use conduit_common::EngineConfig;
/// use conduit_engine::{create_engine, DriverRegistry};
///
/// let registry = DriverRegistry::with_builtin();
/// let engine = create_engine(&registry, "memory://", EngineConfig::default()).unwrap();
/// assert_eq!(engine.url().driver(), "memory");
/// ```
pub fn create_engine(registry: &DriverRegistry, url: &str, config: EngineConfig) -> EngineResult<Engine> {
    let url = EngineUrl::parse(url)?;
    let driver = registry.resolve(&url)?;
    Engine::build(url, driver, config)
}

/// A connection factory with a pool and compiled statement cache.
///
/// Engines are cheap to clone; clones and engines derived through
/// [`execution_options`](Engine::execution_options) share the pool and
/// caches.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
    options: Arc<ExecutionOptions>,
}

impl Engine {
    /// Creates an engine over an existing driver instance.
    pub fn from_driver(driver: Arc<dyn Driver>, config: EngineConfig) -> EngineResult<Self> {
        let url = EngineUrl::parse(&format!("{}://", driver.name()))?;
        Self::build(url, driver, config)
    }

    fn build(url: EngineUrl, driver: Arc<dyn Driver>, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        let mut options = ExecutionOptions::new()
            .stream_results(config.stream_results)
            .max_row_buffer(config.max_row_buffer);
        if let Some(level) = config.isolation_level {
            isolation::check_supported(driver.as_ref(), level)?;
            options = options.isolation_level(level);
        }

        let pool = Pool::new(Arc::clone(&driver), config.pool.clone())?;
        let compiled_cache = config
            .cache
            .enabled
            .then(|| Arc::new(CompiledCache::new(config.cache.target_size)));

        info!(
            %url,
            driver = driver.name(),
            pool_size = config.pool.max_connections,
            cache_size = ?compiled_cache.as_ref().map(|c| c.target_size()),
            "engine created"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                compiler: Compiler::new(driver.param_style()),
                lambda_cache: LambdaCache::new(config.cache.lambda_cache_size),
                pool: RwLock::new(Arc::new(pool)),
                warned: Mutex::new(HashSet::new()),
                url,
                driver,
                compiled_cache,
                config,
            }),
            options: Arc::new(options),
        })
    }

    /// The engine URL.
    pub fn url(&self) -> &EngineUrl {
        &self.inner.url
    }

    /// The driver.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.inner.driver
    }

    /// The configuration the engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Checks out a connection.
    pub fn connect(&self) -> EngineResult<Connection> {
        let checkout = self.inner.pool().acquire()?;
        Connection::new(self.clone(), checkout)
    }

    /// Checks out a connection and begins a transaction on it.
    pub fn begin(&self) -> EngineResult<Connection> {
        let mut conn = self.connect()?;
        conn.begin_transaction()?;
        Ok(conn)
    }

    /// Runs `f` in a transaction on a fresh connection, committing if it
    /// returns `Ok` and rolling back otherwise.
    ///
    /// Once `f` commits or rolls back the transaction itself, further
    /// statements through the guard fail with
    /// [`EngineError::InvalidTransactionState`].
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<EngineError>,
    {
        let mut conn = self.connect()?;
        conn.transaction(f)
    }

    /// Returns an engine sharing this one's pool and caches, with `options`
    /// overlaid on its execution options.
    pub fn execution_options(&self, options: ExecutionOptions) -> EngineResult<Engine> {
        options.validate()?;
        if let Some(level) = options.get_isolation_level() {
            isolation::check_supported(self.inner.driver.as_ref(), level)?;
        }
        Ok(Engine {
            inner: Arc::clone(&self.inner),
            options: Arc::new(self.options.merge(&options)),
        })
    }

    /// The engine's execution options.
    pub fn get_execution_options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Replaces the pool with a fresh one.
    ///
    /// Idle connections of the old pool are closed. Connections currently
    /// checked out keep working and are closed when returned.
    pub fn dispose(&self) -> EngineResult<()> {
        let fresh = Arc::new(Pool::new(
            Arc::clone(&self.inner.driver),
            self.inner.config.pool.clone(),
        )?);
        let old = std::mem::replace(&mut *self.inner.pool.write(), fresh);
        let orphaned = old.checked_out();
        old.dispose();
        info!(url = %self.inner.url, orphaned, "engine disposed");
        Ok(())
    }

    /// Statistics of the current pool.
    pub fn pool_status(&self) -> PoolStats {
        self.inner.pool().stats()
    }

    /// Statistics of the compiled statement cache, if the engine has one.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.compiled_cache.as_ref().map(|cache| cache.stats())
    }

    /// The compiled statement cache, if the engine has one.
    pub fn compiled_cache(&self) -> Option<Arc<CompiledCache>> {
        self.inner.compiled_cache.clone()
    }

    /// The lambda statement cache.
    pub fn lambda_cache(&self) -> &LambdaCache {
        &self.inner.lambda_cache
    }

    pub(crate) fn inner(&self) -> &EngineInner {
        &self.inner
    }

    pub(crate) fn options(&self) -> &Arc<ExecutionOptions> {
        &self.options
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("url", &self.inner.url.to_string())
            .field("pool", &*self.inner.pool())
            .field("options", &self.options)
            .finish()
    }
}
