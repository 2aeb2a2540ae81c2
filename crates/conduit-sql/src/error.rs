//! Error types for statement construction and compilation.

use thiserror::Error;

/// Statement error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SqlError {
    /// A deferred statement captured a value that is neither a literal nor a
    /// cacheable SQL element, so no stable cache key can be derived from it.
    #[error(
        "captured variable '{name}' is neither a literal value nor a cacheable SQL element; \
         bind it as a literal, pass track_on() or disable closure variable tracking"
    )]
    UnstableCacheKey {
        /// Name of the offending capture.
        name: String,
    },

    /// A bind parameter had no value at execution time.
    #[error("no value supplied for bind parameter '{0}'")]
    MissingParameter(String),

    /// A scalar was supplied for an expanding parameter, or a list for a
    /// scalar one.
    #[error("parameter '{0}' does not match its placeholder kind")]
    ParameterKind(String),

    /// The statement references an unknown column.
    #[error("table '{table}' has no column '{column}'")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// The statement cannot be compiled.
    #[error("compile error: {0}")]
    Compile(String),
}

/// Result type for statement operations.
pub type SqlResult<T> = Result<T, SqlError>;
