//! Shared helpers for the engine integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Once};

use conduit_common::{EngineConfig, Value};
use conduit_engine::{create_engine, DriverRegistry, Engine, MemoryDatabase, MemoryDriver};
use conduit_sql::{create_table, insert, SqlType, Table};
use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Log output captured by [`capture_logs`].
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    /// The captured output.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// Captured lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.contents().lines().filter(|line| line.contains(needle)).count()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Runs `f` with warnings and errors on this thread written to a buffer.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, LogBuffer) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, buffer)
}

/// The `users` table used throughout the tests.
pub fn users() -> Table {
    Table::new("users")
        .column("id", SqlType::Integer)
        .column("name", SqlType::Text)
}

/// Builds an engine over `driver` through the registry.
pub fn engine_with(driver: MemoryDriver, config: EngineConfig) -> (Engine, Arc<MemoryDatabase>) {
    init_tracing();
    let database = driver.database();
    let mut registry = DriverRegistry::new();
    registry.register_driver("memory", Arc::new(driver));
    let engine = create_engine(&registry, "memory://test", config).unwrap();
    (engine, database)
}

/// Builds an engine with a created `users` table holding `rows` users and a
/// cleared log.
pub fn setup(config: EngineConfig, rows: i64) -> (Engine, Arc<MemoryDatabase>) {
    setup_with(MemoryDriver::new(), config, rows)
}

/// Like [`setup`] with an explicit driver.
pub fn setup_with(
    driver: MemoryDriver,
    config: EngineConfig,
    rows: i64,
) -> (Engine, Arc<MemoryDatabase>) {
    let (engine, database) = engine_with(driver, config);
    let users = users();
    {
        let mut conn = engine.connect().unwrap();
        conn.execute(create_table(&users)).unwrap();
        for id in 1..=rows {
            conn.execute(
                insert(&users)
                    .value("id", id)
                    .value("name", Value::String(format!("user{id}"))),
            )
            .unwrap();
        }
        conn.commit().unwrap();
    }
    database.clear_log();
    (engine, database)
}

/// Ids of the committed users.
pub fn committed_ids(database: &MemoryDatabase) -> Vec<i64> {
    database
        .table_rows("users")
        .unwrap_or_default()
        .iter()
        .filter_map(|row| row.first().and_then(Value::as_i64))
        .collect()
}
