//! Error types for the engine.

use conduit_common::{ConfigError, IsolationLevel};
use conduit_sql::SqlError;
use thiserror::Error;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operation is not valid in the connection's transaction state.
    #[error("invalid transaction state: {0}")]
    InvalidTransactionState(String),

    /// The driver does not support the requested isolation level.
    #[error("isolation level {level} is not supported by driver '{driver}'")]
    UnsupportedIsolationLevel {
        /// Requested level.
        level: IsolationLevel,
        /// Driver name.
        driver: String,
    },

    /// An option was given at a granularity where it cannot apply.
    #[error("invalid option scope: {0}")]
    InvalidOptionScope(String),

    /// Statement construction or compilation failed.
    #[error(transparent)]
    Sql(#[from] SqlError),

    /// The connection handle has been closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The result has been closed or does not return rows.
    #[error("result is closed: {0}")]
    ResourceClosed(String),

    /// No connection became available in time.
    #[error("pool acquisition timeout after {0}ms")]
    PoolTimeout(u64),

    /// The pool was disposed while the caller waited for it.
    #[error("connection pool has been disposed")]
    PoolDisposed,

    /// No driver is registered under the URL's driver name.
    #[error("no driver registered under '{0}'")]
    UnknownDriver(String),

    /// The engine URL could not be parsed.
    #[error("invalid engine URL '{0}'")]
    InvalidUrl(String),

    /// The driver reported an error.
    #[error("driver error: {0}")]
    Driver(String),

    /// The engine configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
