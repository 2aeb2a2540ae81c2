//! An in-process driver over in-memory tables.
//!
//! [`MemoryDriver`] understands a small SQL subset (see the parser) with
//! `?` placeholders. Every connection sees the shared [`MemoryDatabase`];
//! a transaction works on a private snapshot and its writes are replayed
//! onto the shared tables at `COMMIT`. Under `AUTOCOMMIT` statements apply
//! to the shared tables directly.
//!
//! The database keeps a log of transaction commands, executed statements
//! and fetch sizes so callers can observe exactly what reached the driver.
//!
//! # Example
//!
//! ```rust
//! use conduit_engine::driver::{Driver, PhysicalConnection};
//! use conduit_engine::memory::MemoryDriver;
//!
//! let driver = MemoryDriver::new();
//! let mut conn = driver.connect().unwrap();
//! conn.execute("CREATE TABLE t (x INTEGER)", &[]).unwrap();
//! conn.execute("INSERT INTO t (x) VALUES (?)", &[7_i64.into()]).unwrap();
//! conn.commit().unwrap();
//!
//! assert_eq!(driver.database().table_rows("t").unwrap().len(), 1);
//! ```

mod exec;
mod lexer;
mod parser;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use conduit_common::{IsolationLevel, Row, Value};
use conduit_sql::ParamStyle;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use self::exec::Tables;
use self::parser::Stmt;
use crate::driver::{Driver, PhysicalConnection, RawCursor};
use crate::error::{EngineError, EngineResult};

/// Name the in-memory driver registers under.
pub const MEMORY_DRIVER_NAME: &str = "memory";

#[derive(Debug, Default)]
struct DatabaseLog {
    commands: Vec<String>,
    statements: Vec<(String, Vec<Value>)>,
    fetch_sizes: Vec<usize>,
}

/// Shared state of the in-memory backend.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: RwLock<Tables>,
    log: Mutex<DatabaseLog>,
    open_cursors: AtomicUsize,
    next_connection_id: AtomicU64,
    connections_opened: AtomicUsize,
    connections_closed: AtomicUsize,
}

impl MemoryDatabase {
    /// Transaction commands issued so far (`BEGIN`, `COMMIT`,
    /// `SAVEPOINT name`, `SET ISOLATION LEVEL level` and so on).
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().commands.clone()
    }

    /// Executed statements with their positional parameters.
    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.log.lock().statements.clone()
    }

    /// Parameters of the most recent statement.
    pub fn last_params(&self) -> Option<Vec<Value>> {
        self.log.lock().statements.last().map(|(_, params)| params.clone())
    }

    /// Sizes requested through `fetch_many`, in order.
    pub fn fetch_sizes(&self) -> Vec<usize> {
        self.log.lock().fetch_sizes.clone()
    }

    /// Clears the command, statement and fetch logs.
    pub fn clear_log(&self) {
        *self.log.lock() = DatabaseLog::default();
    }

    /// Number of cursors not yet closed.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Number of physical connections opened.
    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::SeqCst)
    }

    /// Number of physical connections closed.
    pub fn connections_closed(&self) -> usize {
        self.connections_closed.load(Ordering::SeqCst)
    }

    /// Committed rows of `table`.
    pub fn table_rows(&self, table: &str) -> Option<Vec<Row>> {
        self.tables.read().get(table).map(|t| t.rows.clone())
    }

    fn log_command(&self, command: String) {
        trace!(%command, "memory driver command");
        self.log.lock().commands.push(command);
    }
}

/// The in-memory driver.
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    database: Arc<MemoryDatabase>,
    isolation_levels: Vec<IsolationLevel>,
    default_isolation: IsolationLevel,
    streaming: bool,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// Creates a driver over a fresh database supporting every isolation
    /// level, defaulting to `READ COMMITTED`.
    pub fn new() -> Self {
        Self {
            database: Arc::new(MemoryDatabase::default()),
            isolation_levels: IsolationLevel::ALL.to_vec(),
            default_isolation: IsolationLevel::ReadCommitted,
            streaming: true,
        }
    }

    /// Restricts the isolation levels the driver accepts.
    pub fn with_isolation_levels(mut self, levels: impl IntoIterator<Item = IsolationLevel>) -> Self {
        self.isolation_levels = levels.into_iter().collect();
        self
    }

    /// Sets the level new sessions start with.
    pub fn with_default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = level;
        self
    }

    /// Sets whether the driver advertises incremental row delivery.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// The shared database.
    pub fn database(&self) -> Arc<MemoryDatabase> {
        Arc::clone(&self.database)
    }
}

impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        MEMORY_DRIVER_NAME
    }

    fn param_style(&self) -> ParamStyle {
        ParamStyle::Qmark
    }

    fn supported_isolation_levels(&self) -> &[IsolationLevel] {
        &self.isolation_levels
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    fn connect(&self) -> EngineResult<Box<dyn PhysicalConnection>> {
        let id = self.database.next_connection_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.database.connections_opened.fetch_add(1, Ordering::SeqCst);
        trace!(id, "memory connection opened");
        Ok(Box::new(MemoryConnection {
            id,
            database: Arc::clone(&self.database),
            isolation: self.default_isolation,
            txn: None,
            closed: false,
        }))
    }
}

/// Writes made inside a transaction, replayed at commit.
struct PendingTxn {
    snapshot: Tables,
    writes: Vec<(Stmt, Vec<Value>)>,
    savepoints: Vec<(String, Tables, usize)>,
}

struct MemoryConnection {
    id: u64,
    database: Arc<MemoryDatabase>,
    isolation: IsolationLevel,
    txn: Option<PendingTxn>,
    closed: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed {
            return Err(EngineError::Driver(format!(
                "memory connection {} is closed",
                self.id
            )));
        }
        Ok(())
    }

    fn txn(&mut self) -> &mut PendingTxn {
        let database = &self.database;
        self.txn.get_or_insert_with(|| PendingTxn {
            snapshot: database.tables.read().clone(),
            writes: Vec::new(),
            savepoints: Vec::new(),
        })
    }

    fn savepoint_index(&self, name: &str) -> EngineResult<usize> {
        self.txn
            .as_ref()
            .and_then(|txn| txn.savepoints.iter().rposition(|(n, _, _)| n == name))
            .ok_or_else(|| EngineError::Driver(format!("no such savepoint: {name}")))
    }
}

impl PhysicalConnection for MemoryConnection {
    fn begin(&mut self) -> EngineResult<()> {
        self.ensure_open()?;
        self.database.log_command("BEGIN".to_string());
        self.txn = None;
        self.txn();
        Ok(())
    }

    fn commit(&mut self) -> EngineResult<()> {
        self.ensure_open()?;
        self.database.log_command("COMMIT".to_string());
        if let Some(txn) = self.txn.take() {
            let mut tables = self.database.tables.write();
            let mut committed = tables.clone();
            for (stmt, params) in &txn.writes {
                exec::execute(stmt, &mut committed, params)?;
            }
            *tables = committed;
        }
        Ok(())
    }

    fn rollback(&mut self) -> EngineResult<()> {
        self.ensure_open()?;
        self.database.log_command("ROLLBACK".to_string());
        self.txn = None;
        Ok(())
    }

    fn savepoint(&mut self, name: &str) -> EngineResult<()> {
        self.ensure_open()?;
        self.database.log_command(format!("SAVEPOINT {name}"));
        let txn = self.txn();
        let marker = (name.to_string(), txn.snapshot.clone(), txn.writes.len());
        txn.savepoints.push(marker);
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> EngineResult<()> {
        self.ensure_open()?;
        self.database.log_command(format!("RELEASE SAVEPOINT {name}"));
        let index = self.savepoint_index(name)?;
        if let Some(txn) = self.txn.as_mut() {
            txn.savepoints.truncate(index);
        }
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> EngineResult<()> {
        self.ensure_open()?;
        self.database
            .log_command(format!("ROLLBACK TO SAVEPOINT {name}"));
        let index = self.savepoint_index(name)?;
        if let Some(txn) = self.txn.as_mut() {
            txn.savepoints.truncate(index + 1);
            let (_, snapshot, writes) = &txn.savepoints[index];
            txn.snapshot = snapshot.clone();
            txn.writes.truncate(*writes);
        }
        Ok(())
    }

    fn isolation_level(&mut self) -> EngineResult<IsolationLevel> {
        self.ensure_open()?;
        Ok(self.isolation)
    }

    fn set_isolation_level(&mut self, level: IsolationLevel) -> EngineResult<()> {
        self.ensure_open()?;
        self.database
            .log_command(format!("SET ISOLATION LEVEL {}", level.as_sql()));
        self.isolation = level;
        Ok(())
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> EngineResult<Box<dyn RawCursor>> {
        self.ensure_open()?;
        self.database
            .log
            .lock()
            .statements
            .push((sql.to_string(), params.to_vec()));

        let stmt = parser::parse(sql)?;
        let is_write = !matches!(stmt, Stmt::Select { .. });
        let result = if self.isolation.is_autocommit() && self.txn.is_none() {
            exec::execute(&stmt, &mut self.database.tables.write(), params)?
        } else {
            let txn = self.txn();
            let result = exec::execute(&stmt, &mut txn.snapshot, params)?;
            if is_write {
                txn.writes.push((stmt, params.to_vec()));
            }
            result
        };

        self.database.open_cursors.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryCursor {
            database: Arc::clone(&self.database),
            columns: result.columns,
            rows: result.rows.into(),
            rows_affected: result.rows_affected,
            closed: false,
        }))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.txn = None;
        self.closed = true;
        self.database.connections_closed.fetch_add(1, Ordering::SeqCst);
        trace!(id = self.id, "memory connection closed");
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

struct MemoryCursor {
    database: Arc<MemoryDatabase>,
    columns: Vec<String>,
    rows: VecDeque<Row>,
    rows_affected: u64,
    closed: bool,
}

impl MemoryCursor {
    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed {
            return Err(EngineError::Driver("cursor is closed".to_string()));
        }
        Ok(())
    }
}

impl RawCursor for MemoryCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn fetch_many(&mut self, n: usize) -> EngineResult<Vec<Row>> {
        self.ensure_open()?;
        self.database.log.lock().fetch_sizes.push(n);
        let n = n.min(self.rows.len());
        Ok(self.rows.drain(..n).collect())
    }

    fn fetch_all(&mut self) -> EngineResult<Vec<Row>> {
        self.ensure_open()?;
        Ok(self.rows.drain(..).collect())
    }

    fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.rows.clear();
            self.database.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.close();
    }
}
