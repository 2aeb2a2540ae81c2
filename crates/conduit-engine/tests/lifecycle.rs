//! Engine creation, pooling, disposal and invalidation.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use conduit_common::{EngineConfig, IsolationLevel, Value};
use conduit_engine::{create_engine, DriverRegistry, EngineError, EngineUrl, MemoryDriver};
use conduit_sql::{insert, select_from};

use common::{committed_ids, setup, users};

#[test]
fn test_registry_resolves_by_url() {
    common::init_tracing();
    let registry = DriverRegistry::with_builtin();
    assert!(registry.contains("MEMORY"));

    let engine = create_engine(&registry, "Memory://orders", EngineConfig::default()).unwrap();
    assert_eq!(engine.url().driver(), "memory");
    assert_eq!(engine.url().database(), "orders");
    assert_eq!(engine.url().to_string(), "memory://orders");

    assert!(matches!(
        create_engine(&registry, "postgres://db", EngineConfig::default()),
        Err(EngineError::UnknownDriver(name)) if name == "postgres"
    ));
    assert!(matches!(
        create_engine(&registry, "no-scheme", EngineConfig::default()),
        Err(EngineError::InvalidUrl(_))
    ));
    assert!(matches!(
        create_engine(&registry, "memory://", EngineConfig::default().pool_size(0)),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn test_registered_factory_sees_url() {
    common::init_tracing();
    let mut registry = DriverRegistry::new();
    registry.register("serializable", |url: &EngineUrl| {
        if url.database().is_empty() {
            return Err(EngineError::InvalidUrl(url.to_string()));
        }
        Ok(Arc::new(
            MemoryDriver::new().with_default_isolation(IsolationLevel::Serializable),
        ) as Arc<dyn conduit_engine::driver::Driver>)
    });

    assert!(create_engine(&registry, "serializable://", EngineConfig::default()).is_err());
    let engine = create_engine(&registry, "serializable://x", EngineConfig::default()).unwrap();
    let mut conn = engine.connect().unwrap();
    assert_eq!(conn.get_isolation_level().unwrap(), IsolationLevel::Serializable);
}

#[test]
fn test_connections_are_pooled() {
    let (engine, db) = setup(EngineConfig::default(), 0);

    for _ in 0..5 {
        let mut conn = engine.connect().unwrap();
        conn.execute(select_from(&users())).unwrap();
    }

    let stats = engine.pool_status();
    assert_eq!(db.connections_opened(), 1);
    assert_eq!(stats.idle_connections, 1);
    assert_eq!(stats.checked_out, 0);
    assert!(stats.checkouts >= 5);
}

#[test]
fn test_pool_timeout_and_handoff() {
    let mut config = EngineConfig::default().pool_size(1);
    config.pool.acquire_timeout_ms = 50;
    let (engine, _db) = setup(config, 0);

    let held = engine.connect().unwrap();
    assert!(matches!(engine.connect(), Err(EngineError::PoolTimeout(50))));

    let mut config = EngineConfig::default().pool_size(1);
    config.pool.acquire_timeout_ms = 5_000;
    let (engine, _db) = setup(config, 0);
    let held_long = engine.connect().unwrap();

    let waiter = {
        let engine = engine.clone();
        thread::spawn(move || engine.connect().map(|_| ()))
    };
    thread::sleep(Duration::from_millis(50));
    drop(held_long);
    waiter.join().unwrap().unwrap();
    drop(held);
}

#[test]
fn test_dispose_orphans_checked_out_connections() {
    let (engine, db) = setup(EngineConfig::default(), 0);

    let mut orphan = engine.connect().unwrap();
    {
        let _idle = engine.connect().unwrap();
    }
    assert_eq!(db.connections_opened(), 2);

    engine.dispose().unwrap();
    // The idle connection is closed; the checked-out one keeps working.
    assert_eq!(db.connections_closed(), 1);
    orphan.execute(insert(&users()).value("id", 1).value("name", "a")).unwrap();
    orphan.commit().unwrap();
    assert_eq!(committed_ids(&db), vec![1]);

    drop(orphan);
    assert_eq!(db.connections_closed(), 2);
    assert_eq!(engine.pool_status().idle_connections, 0);

    let mut fresh = engine.connect().unwrap();
    assert_eq!(db.connections_opened(), 3);
    let mut result = fresh.execute(select_from(&users())).unwrap();
    assert_eq!(result.fetch_all().unwrap().len(), 1);
}

#[test]
fn test_invalidate_discards_physical_connection() {
    let (engine, db) = setup(EngineConfig::default(), 0);
    let mut conn = engine.connect().unwrap();
    conn.execute(insert(&users()).value("id", 1).value("name", "a")).unwrap();

    conn.invalidate();
    assert!(!conn.in_transaction());
    assert_eq!(db.connections_closed(), 1);
    assert_eq!(engine.pool_status().invalidated, 1);
    assert!(committed_ids(&db).is_empty());

    conn.execute(insert(&users()).value("id", 2).value("name", "b")).unwrap();
    conn.commit().unwrap();
    assert_eq!(committed_ids(&db), vec![2]);
    assert_eq!(db.connections_opened(), 2);
}

#[test]
fn test_raw_connection_borrow_fails_after_close() {
    let (engine, _db) = setup(EngineConfig::default(), 0);
    let mut conn = engine.connect().unwrap();

    let raw = conn.driver_connection().unwrap();
    let mut cursor = raw.execute("SELECT COUNT(*) FROM users", &[]).unwrap();
    assert_eq!(cursor.fetch_all().unwrap(), vec![vec![Value::Integer(0)]]);
    cursor.close();

    conn.close();
    assert!(conn.is_closed());
    assert!(matches!(
        conn.driver_connection(),
        Err(EngineError::ConnectionClosed)
    ));
}

#[test]
fn test_engine_is_shared_across_threads() {
    let (engine, db) = setup(EngineConfig::default().pool_size(4), 0);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = engine.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    let id = t * 100 + i;
                    engine
                        .transaction(|tx| {
                            tx.execute(
                                insert(&users())
                                    .value("id", id)
                                    .value("name", Value::String(format!("user{id}"))),
                            )
                            .map(|_| ())
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(committed_ids(&db).len(), 40);
    let stats = engine.cache_stats().unwrap();
    assert!(stats.hits() >= 30);
}

#[test]
fn test_config_loaded_from_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(
        &path,
        "isolation_level = \"SERIALIZABLE\"\n\n[cache]\ntarget_size = 8\n",
    )
    .unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    let (engine, _db) = setup(config, 0);
    assert_eq!(engine.compiled_cache().unwrap().target_size(), 8);

    let mut conn = engine.connect().unwrap();
    assert_eq!(conn.get_isolation_level().unwrap(), IsolationLevel::Serializable);
}
