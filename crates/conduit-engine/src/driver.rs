//! The driver seam.
//!
//! A [`Driver`] creates [`PhysicalConnection`]s; executing SQL on one yields a
//! [`RawCursor`]. Everything above this seam (pooling, transactions, caching,
//! buffering) is driver-independent.

use conduit_common::{IsolationLevel, Row, Value};
use conduit_sql::ParamStyle;

use crate::error::EngineResult;

/// A backend driver.
pub trait Driver: Send + Sync {
    /// Driver name, used in diagnostics.
    fn name(&self) -> &str;

    /// Placeholder style the driver expects.
    fn param_style(&self) -> ParamStyle;

    /// Isolation levels the backend accepts, including
    /// [`IsolationLevel::Autocommit`] if supported.
    fn supported_isolation_levels(&self) -> &[IsolationLevel];

    /// Whether the backend can deliver rows incrementally.
    fn supports_streaming(&self) -> bool;

    /// Opens a new physical connection.
    fn connect(&self) -> EngineResult<Box<dyn PhysicalConnection>>;
}

/// A live backend session.
pub trait PhysicalConnection: Send {
    /// Issues `BEGIN`.
    fn begin(&mut self) -> EngineResult<()>;

    /// Issues `COMMIT`.
    fn commit(&mut self) -> EngineResult<()>;

    /// Issues `ROLLBACK`.
    fn rollback(&mut self) -> EngineResult<()>;

    /// Issues `SAVEPOINT name`.
    fn savepoint(&mut self, name: &str) -> EngineResult<()>;

    /// Issues `RELEASE SAVEPOINT name`.
    fn release_savepoint(&mut self, name: &str) -> EngineResult<()>;

    /// Issues `ROLLBACK TO SAVEPOINT name`.
    fn rollback_to_savepoint(&mut self, name: &str) -> EngineResult<()>;

    /// Reads the session's current isolation level.
    fn isolation_level(&mut self) -> EngineResult<IsolationLevel>;

    /// Sets the session's isolation level.
    fn set_isolation_level(&mut self, level: IsolationLevel) -> EngineResult<()>;

    /// Executes a statement with positional parameters.
    fn execute(&mut self, sql: &str, params: &[Value]) -> EngineResult<Box<dyn RawCursor>>;

    /// Closes the session.
    fn close(&mut self);

    /// Returns true once the session is closed.
    fn is_closed(&self) -> bool;
}

/// A driver-level result cursor.
pub trait RawCursor: Send {
    /// Result column names; empty for statements that return no rows.
    fn columns(&self) -> &[String];

    /// Fetches up to `n` rows. Fewer than `n` rows means the result is
    /// exhausted.
    fn fetch_many(&mut self, n: usize) -> EngineResult<Vec<Row>>;

    /// Fetches every remaining row.
    fn fetch_all(&mut self) -> EngineResult<Vec<Row>>;

    /// Number of rows changed by a DML statement.
    fn rows_affected(&self) -> u64;

    /// Releases the cursor. Idempotent.
    fn close(&mut self);
}
