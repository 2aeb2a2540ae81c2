//! # conduit-engine
//!
//! Engines, connections and transactions for Conduit.
//!
//! This crate ties the statement model of `conduit-sql` and the compiled
//! statement cache of `conduit-cache` to database drivers:
//!
//! - **Engines**: a URL-selected [`Driver`](driver::Driver), a bounded
//!   connection [`Pool`], the shared compiled-statement cache and default
//!   execution options
//! - **Connections**: handles that autobegin transactions, apply isolation
//!   levels and execute statements through the cache
//! - **Transactions**: scoped and guard-style transactions with nested
//!   savepoints
//! - **Results**: buffered or streaming cursors with adaptive fetch sizes
//! - **Memory driver**: an in-process driver for tests and examples
//!
//! ## Quick Start
//!
//! ```rust
//! use conduit_common::{EngineConfig, Value};
//! use conduit_engine::{create_engine, DriverRegistry, EngineError};
//! use conduit_sql::{create_table, insert, select_from, SqlType, Table};
//!
//! let users = Table::new("users")
//!     .column("id", SqlType::Integer)
//!     .column("name", SqlType::Text);
//!
//! let engine = create_engine(&DriverRegistry::with_builtin(), "memory://app", EngineConfig::default())?;
//!
//! engine.transaction(|tx| {
//!     tx.execute(create_table(&users))?;
//!     tx.execute(insert(&users).value("id", 1).value("name", "alice"))?;
//!     Ok::<_, EngineError>(())
//! })?;
//!
//! let mut conn = engine.connect()?;
//! let mut result = conn.execute(select_from(&users).filter(users.c("id")?.eq(1)))?;
//! assert_eq!(
//!     result.fetch_one()?,
//!     Some(vec![Value::Integer(1), Value::String("alice".to_string())])
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod cursor;
pub mod driver;
pub mod engine;
pub mod error;
pub mod execution;
mod isolation;
pub mod memory;
pub mod options;
pub mod pool;
pub mod registry;
pub mod transaction;

pub use connection::{Connection, ConnectionStats, TransactionState};
pub use cursor::{CursorResult, FetchStrategy, Partitions};
pub use engine::{create_engine, Engine};
pub use error::{EngineError, EngineResult};
pub use execution::Executable;
pub use memory::{MemoryDatabase, MemoryDriver};
pub use options::{CacheSetting, CompiledCache, ExecutionOptions};
pub use pool::{Pool, PoolStats};
pub use registry::{DriverFactory, DriverRegistry, EngineUrl};
pub use transaction::{Savepoint, Transaction};
