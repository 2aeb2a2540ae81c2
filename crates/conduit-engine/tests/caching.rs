//! Compiled statement cache behavior observed through an engine.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use conduit_common::{EngineConfig, Value};
use conduit_engine::{CacheSetting, CompiledCache, EngineError, ExecutionOptions};
use conduit_sql::{
    callsite, lambda_stmt, select_from, text, Capture, CustomType, SqlError, SqlType, Table,
};

use common::{capture_logs, setup, users};

#[derive(Debug)]
struct Undeclared;

impl CustomType for Undeclared {
    fn name(&self) -> &str {
        "Undeclared"
    }

    fn ddl(&self) -> String {
        "TEXT".to_string()
    }
}

#[derive(Debug)]
struct Declared;

impl CustomType for Declared {
    fn name(&self) -> &str {
        "Declared"
    }

    fn ddl(&self) -> String {
        "TEXT".to_string()
    }

    fn cache_ok(&self) -> Option<bool> {
        Some(true)
    }
}

fn cache_len(engine: &conduit_engine::Engine) -> usize {
    engine.compiled_cache().map(|c| c.len()).unwrap_or(0)
}

#[test]
fn test_same_structure_different_literals_share_entry() {
    let (engine, db) = setup(EngineConfig::default(), 3);
    let users = users();
    let mut conn = engine.connect().unwrap();
    let before = cache_len(&engine);

    let first = conn
        .execute(select_from(&users).filter(users.c("id").unwrap().eq(1)))
        .unwrap();
    assert!(first.cache_outcome().is_miss());

    let mut second = conn
        .execute(select_from(&users).filter(users.c("id").unwrap().eq(2)))
        .unwrap();
    assert!(second.cache_outcome().is_hit());
    assert_eq!(db.last_params(), Some(vec![Value::Integer(2)]));
    assert_eq!(
        second.fetch_all().unwrap(),
        vec![vec![Value::Integer(2), Value::String("user2".to_string())]]
    );

    assert_eq!(cache_len(&engine), before + 1);
    let stats = engine.cache_stats().unwrap();
    assert!(stats.hits() >= 1);
}

#[test]
fn test_uncacheable_statements_never_stored() {
    let (engine, _db) = setup(EngineConfig::default(), 3);
    let users = users();
    let mut conn = engine.connect().unwrap();
    let before = cache_len(&engine);
    let no_key_before = engine.cache_stats().unwrap().no_key();

    for _ in 0..3 {
        let result = conn
            .execute(select_from(&users).filter(users.c("id").unwrap().literal_in([1, 2])))
            .unwrap();
        assert!(result.cache_outcome().is_no_key());

        let result = conn.exec_driver_sql("SELECT id FROM users", &[]).unwrap();
        assert_eq!(result.cache_outcome(), conduit_cache::CacheOutcome::RawSql);
    }

    assert_eq!(cache_len(&engine), before);
    assert_eq!(engine.cache_stats().unwrap().no_key(), no_key_before + 3);
}

#[test]
fn test_custom_types_must_declare_cache_safety() {
    let (engine, _db) = setup(EngineConfig::default(), 0);
    let undeclared = Table::new("notes").column("body", SqlType::Custom(Arc::new(Undeclared)));
    let declared = Table::new("labels").column("body", SqlType::Custom(Arc::new(Declared)));

    let mut conn = engine.connect().unwrap();
    conn.exec_driver_sql("CREATE TABLE notes (body TEXT)", &[]).unwrap();
    conn.exec_driver_sql("CREATE TABLE labels (body TEXT)", &[]).unwrap();

    let ((), logs) = capture_logs(|| {
        for _ in 0..2 {
            let result = conn.execute(select_from(&undeclared)).unwrap();
            assert!(result.cache_outcome().is_no_key());
        }
    });
    assert_eq!(logs.count("will not be cached"), 1);
    assert_eq!(logs.count("construct=\"Undeclared\""), 1);
    assert!(logs.contents().contains("WARN"));

    let ((), logs) = capture_logs(|| {
        let result = conn.execute(select_from(&declared)).unwrap();
        assert!(result.cache_outcome().is_miss());
        let result = conn.execute(select_from(&declared)).unwrap();
        assert!(result.cache_outcome().is_hit());
    });
    assert_eq!(logs.contents(), "");
}

#[test]
fn test_cache_prunes_back_to_target() {
    let (engine, _db) = setup(EngineConfig::default().cache_size(4), 10);
    let mut conn = engine.connect().unwrap();
    engine.compiled_cache().unwrap().clear();

    for limit in 1..=6 {
        conn.execute(text(format!("SELECT id FROM users LIMIT {limit}")))
            .unwrap();
        assert_eq!(cache_len(&engine), limit);
    }

    // The seventh distinct statement crosses 1.5x the target.
    conn.execute(text("SELECT id FROM users LIMIT 7")).unwrap();
    assert_eq!(cache_len(&engine), 4);

    for limit in 8..40 {
        conn.execute(text(format!("SELECT id FROM users LIMIT {limit}")))
            .unwrap();
        assert!(cache_len(&engine) <= 6);
    }
}

#[test]
fn test_per_call_cache_setting() {
    let (engine, _db) = setup(EngineConfig::default(), 3);
    let users = users();
    let mut conn = engine.connect().unwrap();
    let before = cache_len(&engine);

    let disabled = ExecutionOptions::new().compiled_cache(CacheSetting::Disabled);
    for _ in 0..2 {
        let result = conn
            .execute_with_options(select_from(&users), Default::default(), &disabled)
            .unwrap();
        assert!(matches!(
            result.cache_outcome(),
            conduit_cache::CacheOutcome::Disabled(_)
        ));
    }
    assert_eq!(cache_len(&engine), before);

    let private: Arc<CompiledCache> = Arc::new(CompiledCache::new(10));
    let shared = ExecutionOptions::new().compiled_cache(CacheSetting::Shared(Arc::clone(&private)));
    conn.execute_with_options(select_from(&users), Default::default(), &shared)
        .unwrap();
    assert_eq!(private.len(), 1);
    assert_eq!(cache_len(&engine), before);
}

#[test]
fn test_engine_without_cache() {
    let mut config = EngineConfig::default();
    config.cache.enabled = false;
    let (engine, _db) = setup(config, 1);

    assert!(engine.compiled_cache().is_none());
    let mut conn = engine.connect().unwrap();
    let result = conn.execute(select_from(&users())).unwrap();
    assert!(matches!(
        result.cache_outcome(),
        conduit_cache::CacheOutcome::Disabled(_)
    ));
}

#[test]
fn test_lambda_builds_once_and_rebinds_values() {
    let (engine, db) = setup(EngineConfig::default(), 12);
    let mut conn = engine.connect().unwrap();

    let mut outcomes = Vec::new();
    for id in [5i64, 10, 12] {
        let users = users();
        let stmt = lambda_stmt(callsite!(), move |args| {
            Ok(select_from(&users).filter(users.c("id")?.eq(args.bind("id"))).into())
        })
        .capture("id", Capture::Literal(id.into()));

        let mut result = conn.execute(stmt).unwrap();
        outcomes.push(result.cache_outcome());
        assert_eq!(db.last_params(), Some(vec![Value::Integer(id)]));
        assert_eq!(result.scalar().unwrap(), Some(Value::Integer(id)));
    }

    assert!(outcomes[0].is_miss());
    assert!(outcomes[1].is_hit());
    assert!(outcomes[2].is_hit());
    assert_eq!(engine.lambda_cache().builds(), 1);
}

#[test]
fn test_lambda_with_opaque_capture_fails() {
    let (engine, _db) = setup(EngineConfig::default(), 1);
    let mut conn = engine.connect().unwrap();
    let users = users();

    let stmt = lambda_stmt(callsite!(), move |_args| Ok(select_from(&users).into()))
        .capture("handle", Capture::opaque::<std::fs::File>());

    match conn.execute(stmt.clone()) {
        Err(EngineError::Sql(SqlError::UnstableCacheKey { name })) => assert_eq!(name, "handle"),
        other => panic!("unexpected result: {other:?}"),
    }

    // Opting out of tracking keys the statement on its call site alone.
    let result = conn.execute(stmt.track_closure_variables(false)).unwrap();
    assert!(result.cache_outcome().is_miss());
}

#[test]
fn test_expanding_in_shares_entry_across_lengths() {
    let (engine, db) = setup(EngineConfig::default(), 5);
    let users = users();
    let mut conn = engine.connect().unwrap();
    let id = users.c("id").unwrap();

    let mut result = conn
        .execute(select_from(&users).filter(id.clone().in_list([1, 2])))
        .unwrap();
    assert!(result.cache_outcome().is_miss());
    assert_eq!(result.fetch_all().unwrap().len(), 2);

    let mut result = conn
        .execute(select_from(&users).filter(id.clone().in_list([1, 3, 5])))
        .unwrap();
    assert!(result.cache_outcome().is_hit());
    assert_eq!(
        db.last_params(),
        Some(vec![Value::Integer(1), Value::Integer(3), Value::Integer(5)])
    );
    assert_eq!(result.fetch_all().unwrap().len(), 3);

    let mut result = conn
        .execute(select_from(&users).filter(id.clone().in_list(Vec::<i64>::new())))
        .unwrap();
    assert!(result.fetch_all().unwrap().is_empty());

    let mut result = conn
        .execute(select_from(&users).filter(id.not_in_list(Vec::<i64>::new())))
        .unwrap();
    assert_eq!(result.fetch_all().unwrap().len(), 5);
}

#[test]
fn test_schema_translation_reuses_compiled_form() {
    let (engine, _db) = setup(EngineConfig::default(), 0);
    let mut conn = engine.connect().unwrap();
    conn.exec_driver_sql("CREATE TABLE tenant_a.accounts (id INTEGER)", &[])
        .unwrap();
    conn.exec_driver_sql("CREATE TABLE tenant_b.accounts (id INTEGER)", &[])
        .unwrap();
    conn.exec_driver_sql("INSERT INTO tenant_a.accounts (id) VALUES (1)", &[])
        .unwrap();
    conn.exec_driver_sql("INSERT INTO tenant_b.accounts (id) VALUES (2)", &[])
        .unwrap();
    conn.commit().unwrap();

    let accounts = Table::new("accounts")
        .schema("tenant")
        .column("id", SqlType::Integer);

    let options = |target: &str| {
        let mut map = HashMap::new();
        map.insert(Some("tenant".to_string()), Some(target.to_string()));
        ExecutionOptions::new().schema_translate_map(map)
    };

    let mut a = conn
        .execute_with_options(select_from(&accounts), Default::default(), &options("tenant_a"))
        .unwrap();
    assert!(a.cache_outcome().is_miss());
    assert_eq!(a.scalar().unwrap(), Some(Value::Integer(1)));

    let mut b = conn
        .execute_with_options(select_from(&accounts), Default::default(), &options("tenant_b"))
        .unwrap();
    assert!(b.cache_outcome().is_hit());
    assert_eq!(b.scalar().unwrap(), Some(Value::Integer(2)));
}
