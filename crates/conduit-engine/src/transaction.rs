//! Transaction and savepoint guards.
//!
//! Both guards borrow their [`Connection`] mutably for their whole life and
//! roll back on drop unless committed. Once a guard has been committed or
//! rolled back, statements executed through it fail with an invalid-state
//! error.

use conduit_common::Value;
use conduit_sql::BoundParams;
use tracing::warn;

use crate::connection::Connection;
use crate::cursor::CursorResult;
use crate::error::{EngineError, EngineResult};
use crate::execution::Executable;
use crate::options::ExecutionOptions;

fn inactive() -> EngineError {
    EngineError::InvalidTransactionState("this transaction is inactive".to_string())
}

/// A root transaction on a connection.
///
/// # Example
///
/// ```
/// use conduit_common::EngineConfig;
/// use conduit_engine::{create_engine, DriverRegistry};
///
/// let engine = create_engine(&DriverRegistry::with_builtin(), "memory://", EngineConfig::default()).unwrap();
/// let mut conn = engine.connect().unwrap();
///
/// let mut tx = conn.begin().unwrap();
/// tx.exec_driver_sql("CREATE TABLE t (x INTEGER)", &[]).unwrap();
/// tx.commit().unwrap();
/// assert!(!tx.is_active());
/// ```
pub struct Transaction<'c> {
    conn: &'c mut Connection,
    ended: bool,
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(conn: &'c mut Connection) -> Self {
        Self { conn, ended: false }
    }

    /// Returns true until the transaction is committed or rolled back.
    pub fn is_active(&self) -> bool {
        !self.ended && self.conn.in_transaction()
    }

    /// The connection this transaction runs on.
    pub fn connection(&self) -> &Connection {
        self.conn
    }

    /// Executes a statement in this transaction.
    pub fn execute(&mut self, stmt: impl Into<Executable>) -> EngineResult<CursorResult> {
        self.ensure_active()?;
        self.conn.execute(stmt)
    }

    /// Executes a statement with parameter overrides.
    pub fn execute_with(
        &mut self,
        stmt: impl Into<Executable>,
        params: BoundParams,
    ) -> EngineResult<CursorResult> {
        self.ensure_active()?;
        self.conn.execute_with(stmt, params)
    }

    /// Executes a statement with statement-scoped options.
    pub fn execute_with_options(
        &mut self,
        stmt: impl Into<Executable>,
        params: BoundParams,
        options: &ExecutionOptions,
    ) -> EngineResult<CursorResult> {
        self.ensure_active()?;
        self.conn.execute_with_options(stmt, params, options)
    }

    /// Executes driver-level SQL in this transaction.
    pub fn exec_driver_sql(&mut self, sql: &str, params: &[Value]) -> EngineResult<CursorResult> {
        self.ensure_active()?;
        self.conn.exec_driver_sql(sql, params)
    }

    /// Opens a savepoint inside this transaction.
    pub fn begin_nested(&mut self) -> EngineResult<Savepoint<'_>> {
        self.ensure_active()?;
        let name = self.conn.open_savepoint()?;
        Ok(Savepoint::new(self.conn, name))
    }

    /// Commits the transaction. Does nothing if it already ended.
    pub fn commit(&mut self) -> EngineResult<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        self.conn.commit()
    }

    /// Rolls back the transaction. Does nothing if it already ended.
    pub fn rollback(&mut self) -> EngineResult<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        self.conn.rollback()
    }

    fn ensure_active(&self) -> EngineResult<()> {
        if !self.is_active() {
            return Err(inactive());
        }
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(e) = self.rollback() {
                warn!(error = %e, "rollback of dropped transaction failed");
            }
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("active", &self.is_active())
            .finish()
    }
}

/// A savepoint inside a transaction.
///
/// Committing releases the savepoint; rolling back returns to the state at
/// the point it was opened while the enclosing transaction continues.
pub struct Savepoint<'c> {
    conn: &'c mut Connection,
    name: String,
    ended: bool,
}

impl<'c> Savepoint<'c> {
    pub(crate) fn new(conn: &'c mut Connection, name: String) -> Self {
        Self {
            conn,
            name,
            ended: false,
        }
    }

    /// Returns the savepoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true until the savepoint is released or rolled back.
    pub fn is_active(&self) -> bool {
        !self.ended && self.conn.has_savepoint(&self.name)
    }

    /// Executes a statement inside this savepoint.
    pub fn execute(&mut self, stmt: impl Into<Executable>) -> EngineResult<CursorResult> {
        self.ensure_active()?;
        self.conn.execute(stmt)
    }

    /// Executes a statement with parameter overrides.
    pub fn execute_with(
        &mut self,
        stmt: impl Into<Executable>,
        params: BoundParams,
    ) -> EngineResult<CursorResult> {
        self.ensure_active()?;
        self.conn.execute_with(stmt, params)
    }

    /// Executes a statement with statement-scoped options.
    pub fn execute_with_options(
        &mut self,
        stmt: impl Into<Executable>,
        params: BoundParams,
        options: &ExecutionOptions,
    ) -> EngineResult<CursorResult> {
        self.ensure_active()?;
        self.conn.execute_with_options(stmt, params, options)
    }

    /// Executes driver-level SQL inside this savepoint.
    pub fn exec_driver_sql(&mut self, sql: &str, params: &[Value]) -> EngineResult<CursorResult> {
        self.ensure_active()?;
        self.conn.exec_driver_sql(sql, params)
    }

    /// Opens a savepoint nested inside this one.
    pub fn begin_nested(&mut self) -> EngineResult<Savepoint<'_>> {
        self.ensure_active()?;
        let name = self.conn.open_savepoint()?;
        Ok(Savepoint::new(self.conn, name))
    }

    /// Releases the savepoint. Does nothing if it already ended.
    pub fn commit(&mut self) -> EngineResult<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        self.conn.release_savepoint(&self.name)
    }

    /// Rolls back to the savepoint. Does nothing if it already ended.
    pub fn rollback(&mut self) -> EngineResult<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        self.conn.rollback_to_savepoint(&self.name)
    }

    fn ensure_active(&self) -> EngineResult<()> {
        if !self.is_active() {
            return Err(inactive());
        }
        Ok(())
    }
}

impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(e) = self.rollback() {
                warn!(savepoint = %self.name, error = %e, "rollback of dropped savepoint failed");
            }
        }
    }
}

impl std::fmt::Debug for Savepoint<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Savepoint")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish()
    }
}
