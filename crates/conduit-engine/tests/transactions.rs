//! Transaction state machine tests.

mod common;

use conduit_common::{EngineConfig, IsolationLevel, Value};
use conduit_engine::{EngineError, TransactionState};
use conduit_sql::{insert, select_from};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::{committed_ids, setup, users};

fn insert_user(id: i64) -> conduit_sql::Insert {
    insert(&users())
        .value("id", id)
        .value("name", Value::String(format!("user{id}")))
}

#[test]
fn test_commit_then_rollback_durability() {
    let (engine, db) = setup(EngineConfig::default(), 0);
    let mut conn = engine.connect().unwrap();

    conn.execute(insert_user(1)).unwrap();
    assert_eq!(conn.transaction_state(), TransactionState::Active);
    conn.commit().unwrap();
    assert_eq!(conn.transaction_state(), TransactionState::NoTransaction);

    conn.execute(insert_user(2)).unwrap();
    assert!(conn.in_transaction());
    conn.rollback().unwrap();

    assert_eq!(committed_ids(&db), vec![1]);
    assert_eq!(db.commands(), vec!["BEGIN", "COMMIT", "BEGIN", "ROLLBACK"]);
    assert_eq!(conn.stats().autobegun, 2);
}

#[test]
fn test_begin_after_autobegin_fails_at_every_level() {
    for level in IsolationLevel::ALL {
        let (engine, _db) = setup(EngineConfig::default().isolation_level(level), 0);
        let mut conn = engine.connect().unwrap();
        conn.execute(select_from(&users())).unwrap();

        let err = conn.begin().unwrap_err();
        assert!(
            matches!(err, EngineError::InvalidTransactionState(_)),
            "{level:?}: {err}"
        );
    }
}

#[test]
fn test_autocommit_begin_after_two_statements_fails() {
    let config = EngineConfig::default().isolation_level(IsolationLevel::Autocommit);
    let (engine, db) = setup(config, 0);
    let mut conn = engine.connect().unwrap();

    conn.execute(insert_user(1)).unwrap();
    conn.execute(insert_user(2)).unwrap();

    // Each statement is durable without a physical transaction.
    assert_eq!(committed_ids(&db), vec![1, 2]);
    assert!(!db.commands().iter().any(|c| c == "BEGIN"));

    let err = conn.begin().unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransactionState(_)));

    conn.commit().unwrap();
    assert!(!db.commands().iter().any(|c| c == "COMMIT"));
    conn.begin().unwrap().commit().unwrap();
}

#[test]
fn test_noop_commit_and_rollback() {
    let (engine, db) = setup(EngineConfig::default(), 0);
    let mut conn = engine.connect().unwrap();

    conn.commit().unwrap();
    conn.rollback().unwrap();
    conn.commit().unwrap();

    assert!(db.commands().is_empty());
    assert_eq!(conn.stats().commits, 0);
}

#[test]
fn test_scoped_transaction_commits_on_ok() {
    let (engine, db) = setup(EngineConfig::default(), 0);
    let mut conn = engine.connect().unwrap();

    let inserted = conn
        .transaction(|tx| {
            tx.execute(insert_user(1))?;
            tx.execute(insert_user(2))?;
            Ok::<_, EngineError>(2)
        })
        .unwrap();

    assert_eq!(inserted, 2);
    assert!(!conn.in_transaction());
    assert_eq!(committed_ids(&db), vec![1, 2]);
}

#[test]
fn test_scoped_transaction_rolls_back_on_err() {
    let (engine, db) = setup(EngineConfig::default(), 0);

    let result: Result<(), EngineError> = engine.transaction(|tx| {
        tx.execute(insert_user(1))?;
        Err(EngineError::Driver("application failure".to_string()))
    });

    assert!(matches!(result, Err(EngineError::Driver(_))));
    assert!(committed_ids(&db).is_empty());
    assert_eq!(db.commands(), vec!["BEGIN", "ROLLBACK"]);
}

#[test]
fn test_manual_commit_inside_scope_ends_it() {
    let (engine, db) = setup(EngineConfig::default(), 0);
    let mut conn = engine.connect().unwrap();

    let result = conn.transaction(|tx| {
        tx.execute(insert_user(1))?;
        tx.commit()?;
        tx.execute(insert_user(2)).map(|_| ())
    });

    match result {
        Err(EngineError::InvalidTransactionState(msg)) => {
            assert_eq!(msg, "this transaction is inactive")
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(committed_ids(&db), vec![1]);
    assert!(!conn.in_transaction());
}

#[test]
fn test_manual_commit_inside_engine_scope_ends_it() {
    let (engine, db) = setup(EngineConfig::default(), 0);

    let result = engine.transaction(|tx| {
        tx.execute(insert_user(1))?;
        tx.commit()?;
        assert!(!tx.is_active());
        tx.execute(insert_user(2)).map(|_| ())
    });

    assert!(matches!(result, Err(EngineError::InvalidTransactionState(_))));
    assert_eq!(committed_ids(&db), vec![1]);
    assert_eq!(db.commands(), vec!["BEGIN", "COMMIT"]);
    assert_eq!(engine.pool_status().checked_out, 0);
}

#[test]
fn test_close_with_open_transaction_rolls_back() {
    let (engine, db) = setup(EngineConfig::default(), 0);
    {
        let mut conn = engine.connect().unwrap();
        conn.execute(insert_user(1)).unwrap();
    }
    assert!(committed_ids(&db).is_empty());
    assert_eq!(db.commands(), vec!["BEGIN", "ROLLBACK"]);
    assert_eq!(engine.pool_status().idle_connections, 1);
}

#[test]
fn test_savepoints_through_engine() {
    let (engine, db) = setup(EngineConfig::default(), 0);
    let mut conn = engine.connect().unwrap();

    let mut tx = conn.begin().unwrap();
    tx.execute(insert_user(1)).unwrap();
    {
        let mut sp = tx.begin_nested().unwrap();
        sp.execute(insert_user(2)).unwrap();
        // Dropped without commit: rolled back to the savepoint.
    }
    {
        let mut sp = tx.begin_nested().unwrap();
        sp.execute(insert_user(3)).unwrap();
        sp.commit().unwrap();
    }
    tx.commit().unwrap();
    drop(tx);

    assert_eq!(committed_ids(&db), vec![1, 3]);
    assert_eq!(conn.stats().savepoints, 2);
}

#[test]
fn test_random_sequences_always_autobegin_after_end() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for round in 0..20 {
        let level = if round % 2 == 0 {
            IsolationLevel::ReadCommitted
        } else {
            IsolationLevel::Autocommit
        };
        let (engine, _db) = setup(EngineConfig::default().isolation_level(level), 0);
        let mut conn = engine.connect().unwrap();

        let mut active = false;
        let mut expected_autobegins = 0;
        let mut next_id = 0;

        for _ in 0..50 {
            match rng.gen_range(0..3) {
                0 => {
                    if !active {
                        expected_autobegins += 1;
                    }
                    next_id += 1;
                    conn.execute(insert_user(next_id)).unwrap();
                    active = true;
                }
                1 => {
                    conn.commit().unwrap();
                    active = false;
                }
                _ => {
                    conn.rollback().unwrap();
                    active = false;
                }
            }
            assert_eq!(conn.in_transaction(), active);
            if active {
                assert!(matches!(
                    conn.begin(),
                    Err(EngineError::InvalidTransactionState(_))
                ));
            }
        }
        assert_eq!(conn.stats().autobegun, expected_autobegins);
    }
}
