//! Connection handles.
//!
//! A [`Connection`] owns one pooled physical connection for as long as it
//! is open and tracks the in-process transaction state:
//!
//! ```text
//! NoTransaction --execute/begin--> Active --commit/rollback--> NoTransaction
//! ```
//!
//! Executing a statement with no transaction in progress begins one
//! implicitly (autobegin). Under the `AUTOCOMMIT` isolation level the
//! state machine is unchanged; only the backend `BEGIN`, `COMMIT`,
//! `ROLLBACK` and savepoint commands are skipped.

use std::sync::Arc;

use conduit_cache::CacheOutcome;
use conduit_common::{IsolationLevel, Value, SAVEPOINT_PREFIX};
use conduit_sql::BoundParams;
use tracing::{debug, warn};

use crate::cursor::CursorResult;
use crate::driver::PhysicalConnection;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::execution::{self, Executable};
use crate::isolation;
use crate::options::ExecutionOptions;
use crate::pool::Checkout;
use crate::transaction::{Savepoint, Transaction};

/// In-process transaction state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction; the next statement begins one.
    NoTransaction,
    /// A transaction is in progress.
    Active,
}

/// Per-connection transaction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Transactions begun, explicitly or implicitly.
    pub begun: u64,
    /// Transactions begun implicitly by a statement.
    pub autobegun: u64,
    /// Commits of an active transaction.
    pub commits: u64,
    /// Rollbacks of an active transaction.
    pub rollbacks: u64,
    /// Savepoints opened.
    pub savepoints: u64,
}

/// A handle on one pooled connection.
pub struct Connection {
    engine: Engine,
    /// `None` after close or invalidation.
    checkout: Option<Checkout>,
    state: TransactionState,
    options: Arc<ExecutionOptions>,
    /// Whether the physical connection is in autocommit mode.
    autocommit: bool,
    savepoint_seq: usize,
    /// Open savepoints, innermost last.
    savepoints: Vec<String>,
    stats: ConnectionStats,
    closed: bool,
}

impl Connection {
    pub(crate) fn new(engine: Engine, checkout: Checkout) -> EngineResult<Self> {
        let options = Arc::clone(engine.options());
        let mut conn = Self {
            engine,
            checkout: Some(checkout),
            state: TransactionState::NoTransaction,
            options,
            autocommit: false,
            savepoint_seq: 0,
            savepoints: Vec::new(),
            stats: ConnectionStats::default(),
            closed: false,
        };
        conn.configure()?;
        Ok(conn)
    }

    /// The engine this connection came from.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Executes a statement.
    pub fn execute(&mut self, stmt: impl Into<Executable>) -> EngineResult<CursorResult> {
        self.execute_with_options(stmt, BoundParams::new(), &ExecutionOptions::new())
    }

    /// Executes a statement, overriding parameter values by name.
    pub fn execute_with(
        &mut self,
        stmt: impl Into<Executable>,
        params: BoundParams,
    ) -> EngineResult<CursorResult> {
        self.execute_with_options(stmt, params, &ExecutionOptions::new())
    }

    /// Executes a statement with statement-scoped options.
    ///
    /// `isolation_level` cannot be set per statement.
    pub fn execute_with_options(
        &mut self,
        stmt: impl Into<Executable>,
        params: BoundParams,
        options: &ExecutionOptions,
    ) -> EngineResult<CursorResult> {
        self.ensure_open()?;
        options.check_statement_scope()?;
        options.validate()?;
        let options = self.options.merge(options);

        let prepared = execution::prepare(self.engine.inner(), stmt.into(), params, &options)?;
        self.autobegin()?;
        let strategy = execution::fetch_strategy(self.engine.inner().driver.as_ref(), &options);
        let raw = self.physical()?.execute(&prepared.sql, &prepared.params)?;
        CursorResult::new(raw, strategy, prepared.outcome)
    }

    /// Executes driver-level SQL as-is, bypassing compilation and caching.
    pub fn exec_driver_sql(&mut self, sql: &str, params: &[Value]) -> EngineResult<CursorResult> {
        self.ensure_open()?;
        execution::log_statement(self.engine.inner(), sql, params, CacheOutcome::RawSql);
        self.autobegin()?;
        let strategy = execution::fetch_strategy(self.engine.inner().driver.as_ref(), &self.options);
        let raw = self.physical()?.execute(sql, params)?;
        CursorResult::new(raw, strategy, CacheOutcome::RawSql)
    }

    /// Begins a transaction, returning a guard that rolls back on drop
    /// unless committed.
    ///
    /// Fails if a transaction is already in progress, including one begun
    /// implicitly by an earlier statement.
    pub fn begin(&mut self) -> EngineResult<Transaction<'_>> {
        self.begin_transaction()?;
        Ok(Transaction::new(self))
    }

    /// Opens a savepoint, beginning the enclosing transaction first if
    /// needed.
    pub fn begin_nested(&mut self) -> EngineResult<Savepoint<'_>> {
        let name = self.open_savepoint()?;
        Ok(Savepoint::new(self, name))
    }

    /// Runs `f` in a transaction, committing if it returns `Ok` and rolling
    /// back otherwise.
    pub fn transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<EngineError>,
    {
        let mut tx = self.begin()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = tx.rollback() {
                    warn!(error = %e, "rollback after failed transaction block failed");
                }
                Err(err)
            }
        }
    }

    /// Commits the current transaction. Does nothing if none is in
    /// progress.
    pub fn commit(&mut self) -> EngineResult<()> {
        self.ensure_open()?;
        if self.state == TransactionState::NoTransaction {
            return Ok(());
        }
        self.end_transaction(true)
    }

    /// Rolls back the current transaction. Does nothing if none is in
    /// progress.
    pub fn rollback(&mut self) -> EngineResult<()> {
        self.ensure_open()?;
        if self.state == TransactionState::NoTransaction {
            return Ok(());
        }
        self.end_transaction(false)
    }

    /// Returns true if a transaction is in progress.
    pub fn in_transaction(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// The in-process transaction state.
    pub fn transaction_state(&self) -> TransactionState {
        self.state
    }

    /// Overlays `options` on this connection's execution options.
    ///
    /// Setting `isolation_level` applies it to the physical connection
    /// immediately and fails while a transaction is in progress.
    pub fn execution_options(&mut self, options: ExecutionOptions) -> EngineResult<&mut Self> {
        self.ensure_open()?;
        options.validate()?;
        if let Some(level) = options.get_isolation_level() {
            if self.state == TransactionState::Active {
                return Err(EngineError::InvalidTransactionState(
                    "cannot change isolation level while a transaction is in progress; \
                     commit or roll back first"
                        .to_string(),
                ));
            }
            let driver = Arc::clone(&self.engine.inner().driver);
            isolation::apply(driver.as_ref(), self.physical()?, level)?;
            self.autocommit = level.is_autocommit();
        }
        self.options = Arc::new(self.options.merge(&options));
        Ok(self)
    }

    /// This connection's execution options.
    pub fn get_execution_options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Reads the isolation level from the physical connection.
    pub fn get_isolation_level(&mut self) -> EngineResult<IsolationLevel> {
        self.physical()?.isolation_level()
    }

    /// Borrows the physical connection. Fails once the handle is closed.
    pub fn driver_connection(&mut self) -> EngineResult<&mut dyn PhysicalConnection> {
        self.physical()
    }

    /// Discards the physical connection instead of returning it to the
    /// pool. Any transaction in progress is abandoned; the next operation
    /// checks out a new connection.
    pub fn invalidate(&mut self) {
        if let Some(checkout) = self.checkout.take() {
            if self.state == TransactionState::Active {
                warn!(id = ?checkout.id(), "invalidating connection with a transaction in progress");
            }
            checkout.invalidate();
        }
        self.state = TransactionState::NoTransaction;
        self.savepoints.clear();
    }

    /// Rolls back any transaction in progress and returns the physical
    /// connection to the pool. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.state == TransactionState::Active {
            if let Err(e) = self.end_transaction(false) {
                warn!(error = %e, "rollback on close failed");
            }
        }
        self.checkout = None;
        self.closed = true;
    }

    /// Returns true once the handle is closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Transaction counters.
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    // =========================================================================
    // Internal Methods
    // =========================================================================

    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed {
            return Err(EngineError::ConnectionClosed);
        }
        Ok(())
    }

    /// The physical connection, checking out a new one after invalidation.
    fn physical(&mut self) -> EngineResult<&mut dyn PhysicalConnection> {
        self.ensure_open()?;
        if self.checkout.is_none() {
            self.checkout = Some(self.engine.inner().pool().acquire()?);
            if let Err(e) = self.configure() {
                self.checkout = None;
                return Err(e);
            }
        }
        match self.checkout.as_mut() {
            Some(checkout) => checkout.connection(),
            None => Err(EngineError::ConnectionClosed),
        }
    }

    /// Applies this handle's isolation level to a fresh checkout.
    fn configure(&mut self) -> EngineResult<()> {
        let driver = Arc::clone(&self.engine.inner().driver);
        let conn = match self.checkout.as_mut() {
            Some(checkout) => checkout.connection()?,
            None => return Err(EngineError::ConnectionClosed),
        };
        self.autocommit = match self.options.get_isolation_level() {
            Some(level) => {
                isolation::apply(driver.as_ref(), conn, level)?;
                level.is_autocommit()
            }
            None => conn.isolation_level()?.is_autocommit(),
        };
        Ok(())
    }

    pub(crate) fn begin_transaction(&mut self) -> EngineResult<()> {
        self.ensure_open()?;
        if self.state == TransactionState::Active {
            return Err(EngineError::InvalidTransactionState(
                "a transaction is already begun on this connection".to_string(),
            ));
        }
        // Resolves the autocommit flag for a fresh checkout.
        self.physical()?;
        if !self.autocommit {
            self.physical()?.begin()?;
        }
        self.state = TransactionState::Active;
        self.stats.begun += 1;
        debug!(autocommit = self.autocommit, "transaction begun");
        Ok(())
    }

    fn autobegin(&mut self) -> EngineResult<()> {
        if self.state == TransactionState::NoTransaction {
            self.begin_transaction()?;
            self.stats.autobegun += 1;
        }
        Ok(())
    }

    fn end_transaction(&mut self, commit: bool) -> EngineResult<()> {
        self.state = TransactionState::NoTransaction;
        self.savepoints.clear();
        if commit {
            self.stats.commits += 1;
        } else {
            self.stats.rollbacks += 1;
        }
        debug!(commit, autocommit = self.autocommit, "transaction ended");
        if self.autocommit {
            return Ok(());
        }
        let conn = self.physical()?;
        if commit {
            conn.commit()
        } else {
            conn.rollback()
        }
    }

    pub(crate) fn open_savepoint(&mut self) -> EngineResult<String> {
        self.ensure_open()?;
        self.autobegin()?;
        self.savepoint_seq += 1;
        let name = format!("{SAVEPOINT_PREFIX}{}", self.savepoint_seq);
        if !self.autocommit {
            self.physical()?.savepoint(&name)?;
        }
        self.savepoints.push(name.clone());
        self.stats.savepoints += 1;
        Ok(name)
    }

    pub(crate) fn has_savepoint(&self, name: &str) -> bool {
        self.savepoints.iter().any(|n| n == name)
    }

    /// Releases `name` and every savepoint opened after it.
    pub(crate) fn release_savepoint(&mut self, name: &str) -> EngineResult<()> {
        let Some(index) = self.savepoints.iter().rposition(|n| n == name) else {
            return Ok(());
        };
        self.savepoints.truncate(index);
        if self.autocommit {
            return Ok(());
        }
        self.physical()?.release_savepoint(name)
    }

    /// Rolls back to `name`, discarding it and every savepoint opened
    /// after it.
    pub(crate) fn rollback_to_savepoint(&mut self, name: &str) -> EngineResult<()> {
        let Some(index) = self.savepoints.iter().rposition(|n| n == name) else {
            return Ok(());
        };
        self.savepoints.truncate(index);
        if self.autocommit {
            return Ok(());
        }
        self.physical()?.rollback_to_savepoint(name)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("checkout", &self.checkout)
            .field("state", &self.state)
            .field("autocommit", &self.autocommit)
            .field("savepoints", &self.savepoints)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;
    use conduit_common::EngineConfig;

    fn engine() -> (Engine, MemoryDriver) {
        let driver = MemoryDriver::new();
        let engine = Engine::from_driver(Arc::new(driver.clone()), EngineConfig::default()).unwrap();
        (engine, driver)
    }

    #[test]
    fn test_autobegin_and_noop_commit() {
        let (engine, driver) = engine();
        let mut conn = engine.connect().unwrap();
        assert_eq!(conn.transaction_state(), TransactionState::NoTransaction);

        conn.commit().unwrap();
        conn.rollback().unwrap();
        assert!(driver.database().commands().is_empty());

        conn.exec_driver_sql("CREATE TABLE t (x INTEGER)", &[]).unwrap();
        assert!(conn.in_transaction());
        conn.commit().unwrap();
        assert!(!conn.in_transaction());
        assert_eq!(driver.database().commands(), vec!["BEGIN", "COMMIT"]);
        assert_eq!(
            conn.stats(),
            ConnectionStats {
                begun: 1,
                autobegun: 1,
                commits: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_begin_while_active_fails() {
        let (engine, _driver) = engine();
        let mut conn = engine.connect().unwrap();
        conn.exec_driver_sql("CREATE TABLE t (x INTEGER)", &[]).unwrap();

        let err = conn.begin().unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransactionState(_)));
    }

    #[test]
    fn test_closed_handle_fails_fast() {
        let (engine, _driver) = engine();
        let mut conn = engine.connect().unwrap();
        conn.close();
        conn.close();

        assert!(matches!(conn.driver_connection(), Err(EngineError::ConnectionClosed)));
        assert!(matches!(
            conn.exec_driver_sql("SELECT 1", &[]),
            Err(EngineError::ConnectionClosed)
        ));
        assert_eq!(engine.pool_status().idle_connections, 1);
    }

    #[test]
    fn test_close_rolls_back() {
        let (engine, driver) = engine();
        let mut conn = engine.connect().unwrap();
        conn.exec_driver_sql("CREATE TABLE t (x INTEGER)", &[]).unwrap();
        drop(conn);

        assert_eq!(driver.database().commands(), vec!["BEGIN", "ROLLBACK"]);
        assert!(driver.database().table_rows("t").is_none());
    }

    #[test]
    fn test_isolation_change_rejected_in_transaction() {
        let (engine, _driver) = engine();
        let mut conn = engine.connect().unwrap();
        conn.exec_driver_sql("CREATE TABLE t (x INTEGER)", &[]).unwrap();

        let err = conn
            .execution_options(ExecutionOptions::new().isolation_level(IsolationLevel::Serializable))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransactionState(_)));

        conn.rollback().unwrap();
        conn.execution_options(ExecutionOptions::new().isolation_level(IsolationLevel::Serializable))
            .unwrap();
        assert_eq!(conn.get_isolation_level().unwrap(), IsolationLevel::Serializable);
    }

    #[test]
    fn test_invalidate_checks_out_fresh_connection() {
        let (engine, driver) = engine();
        let mut conn = engine.connect().unwrap();
        conn.exec_driver_sql("CREATE TABLE t (x INTEGER)", &[]).unwrap();
        conn.invalidate();
        assert!(!conn.in_transaction());
        assert_eq!(driver.database().connections_closed(), 1);

        conn.exec_driver_sql("CREATE TABLE t (x INTEGER)", &[]).unwrap();
        assert_eq!(driver.database().connections_opened(), 2);
    }
}
