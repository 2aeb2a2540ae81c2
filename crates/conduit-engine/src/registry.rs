//! Explicit driver registration and engine URLs.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::driver::Driver;
use crate::error::{EngineError, EngineResult};
use crate::memory::{MemoryDriver, MEMORY_DRIVER_NAME};

/// A parsed `driver://database` engine URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineUrl {
    driver: String,
    database: String,
}

impl EngineUrl {
    /// Parses an engine URL.
    pub fn parse(url: &str) -> EngineResult<Self> {
        let (driver, database) = url
            .split_once("://")
            .ok_or_else(|| EngineError::InvalidUrl(url.to_string()))?;
        if driver.is_empty()
            || !driver
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+' || c == '-')
        {
            return Err(EngineError::InvalidUrl(url.to_string()));
        }
        Ok(Self {
            driver: driver.to_ascii_lowercase(),
            database: database.to_string(),
        })
    }

    /// The driver name.
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// The driver-specific database part; may be empty.
    pub fn database(&self) -> &str {
        &self.database
    }
}

impl FromStr for EngineUrl {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EngineUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.driver, self.database)
    }
}

/// Builds a driver for an engine URL.
pub type DriverFactory = Arc<dyn Fn(&EngineUrl) -> EngineResult<Arc<dyn Driver>> + Send + Sync>;

/// Maps driver names to factories.
///
/// There is no process-wide registry; callers build one and pass it to
/// [`create_engine`](crate::create_engine).
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the in-memory driver registered as `memory`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(MEMORY_DRIVER_NAME, |_url| {
            Ok(Arc::new(MemoryDriver::new()) as Arc<dyn Driver>)
        });
        registry
    }

    /// Registers `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&EngineUrl) -> EngineResult<Arc<dyn Driver>> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_ascii_lowercase(), Arc::new(factory));
        self
    }

    /// Registers a fixed driver instance under `name`.
    pub fn register_driver(&mut self, name: &str, driver: Arc<dyn Driver>) -> &mut Self {
        self.register(name, move |_url| Ok(Arc::clone(&driver)))
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_lowercase())
    }

    /// Resolves the driver for `url`.
    pub fn resolve(&self, url: &EngineUrl) -> EngineResult<Arc<dyn Driver>> {
        let factory = self
            .factories
            .get(url.driver())
            .ok_or_else(|| EngineError::UnknownDriver(url.driver().to_string()))?;
        factory(url)
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("DriverRegistry").field("drivers", &names).finish()
    }
}
