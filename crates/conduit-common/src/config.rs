//! Engine configuration structures.
//!
//! These structures define the configurable aspects of an engine: the
//! statement cache, the connection pool and the default execution options
//! every connection inherits. They can be built in code or loaded from TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DEFAULT_ACQUIRE_TIMEOUT_MS, DEFAULT_CACHE_SIZE, DEFAULT_LAMBDA_CACHE_SIZE,
    DEFAULT_MAX_ROW_BUFFER, DEFAULT_POOL_SIZE,
};
use crate::types::IsolationLevel;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration text is not valid TOML for this schema.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered as TOML.
    #[error("config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The configuration is well-formed but invalid.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level engine configuration.
///
/// # Example
///
/// ```rust
/// use conduit_common::config::EngineConfig;
///
/// let config = EngineConfig::from_toml_str(r#"
///     isolation_level = "SERIALIZABLE"
///
///     [cache]
///     target_size = 100
/// "#).unwrap();
/// assert_eq!(config.cache.target_size, 100);
/// assert_eq!(config.pool.max_connections, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Isolation level applied to every connection checkout.
    /// Default: the driver's native level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolation_level: Option<IsolationLevel>,

    /// Request unbuffered (streaming) results by default.
    pub stream_results: bool,

    /// Ceiling of the adaptive streaming buffer.
    /// Default: 1000
    pub max_row_buffer: usize,

    /// Log every statement with its cache classification.
    pub echo: bool,

    /// Compiled statement cache configuration.
    pub cache: CacheConfig,

    /// Connection pool configuration.
    pub pool: PoolSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            isolation_level: None,
            stream_results: false,
            max_row_buffer: DEFAULT_MAX_ROW_BUFFER,
            echo: false,
            cache: CacheConfig::default(),
            pool: PoolSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Saves the configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Sets the isolation level.
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Sets the cache target size.
    pub fn cache_size(mut self, target_size: usize) -> Self {
        self.cache.target_size = target_size;
        self
    }

    /// Sets the maximum number of pooled connections.
    pub fn pool_size(mut self, max_connections: usize) -> Self {
        self.pool.max_connections = max_connections;
        self
    }

    /// Enables streaming results by default.
    pub fn stream_results(mut self, stream: bool) -> Self {
        self.stream_results = stream;
        self
    }

    /// Enables statement logging.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.pool.validate()?;
        if self.max_row_buffer == 0 {
            return Err(ConfigError::Invalid(
                "max_row_buffer must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Compiled statement cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether the engine owns a statement cache at all.
    /// Default: true
    pub enabled: bool,

    /// Number of entries the cache is pruned back to.
    /// Default: 500
    pub target_size: usize,

    /// Number of lambda callsite keys remembered.
    /// Default: 500
    pub lambda_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_size: DEFAULT_CACHE_SIZE,
            lambda_cache_size: DEFAULT_LAMBDA_CACHE_SIZE,
        }
    }
}

impl CacheConfig {
    /// Creates a new config with the given target size.
    pub fn with_target_size(target_size: usize) -> Self {
        Self {
            target_size,
            ..Default::default()
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.target_size == 0 {
            return Err(ConfigError::Invalid(
                "cache.target_size must be greater than 0 when the cache is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum number of physical connections.
    /// Default: 5
    pub max_connections: usize,

    /// How long to wait for a connection, in milliseconds.
    /// Default: 30000
    pub acquire_timeout_ms: u64,

    /// Maximum lifetime of a physical connection in seconds (0 = unlimited).
    /// Default: 0
    pub max_lifetime_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_POOL_SIZE,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            max_lifetime_secs: 0,
        }
    }
}

impl PoolSettings {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_connections must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
