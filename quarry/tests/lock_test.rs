//! Locking behavior observed through whole statements.

mod common;

use std::sync::Arc;

use common::{create_people_table, insert_row, row, scan_rids, scan_rows};
use granite::errors::{AbortReason, StorageError};
use granite::lock::{GroupLockMode, LockDataId};
use quarry::errors::EngineError;
use quarry::executor::{Condition, DeleteExec, Executor, SetClause, UpdateExec};
use quarry::value::{CmpOp, Value};

fn abort_reason(err: EngineError) -> AbortReason {
    match err {
        EngineError::Storage(StorageError::TxnAbort { reason, .. }) => reason,
        other => panic!("expected TxnAbort, got {other:?}"),
    }
}

#[test]
fn a_writer_aborts_a_concurrent_reader() {
    let db = common::setup();
    create_people_table(&db.engine);

    let setup_txn = db.engine.begin();
    let setup_ctx = db.engine.context(&setup_txn);
    let rid = insert_row(&db.engine, &setup_ctx, "t", row(1, "a"));
    db.engine.commit(&setup_txn).unwrap();

    // T1 takes X on the row through an update.
    let t1 = db.engine.begin();
    let ctx1 = db.engine.context(&t1);
    let mut update = UpdateExec::new(
        Arc::clone(db.engine.catalog()),
        "t",
        vec![SetClause::new("name", Value::Str("zz".into()))],
        vec![rid],
        ctx1.clone(),
    );
    update.begin().unwrap();

    // T2's read hits the X lock and is told to abort at once.
    let t2 = db.engine.begin();
    let ctx2 = db.engine.context(&t2);
    let fh = db.engine.catalog().file_handle("t").unwrap();
    let err = fh.get(rid, Some(&ctx2.txn_ctx())).unwrap_err();
    assert!(matches!(
        err,
        StorageError::TxnAbort {
            reason: AbortReason::DeadlockPrevention,
            ..
        }
    ));
    // T2 never got the record lock; rolling back releases what little it
    // holds and T1 is undisturbed.
    assert!(!t2.holds_lock(&LockDataId::Record(fh.file_id(), rid)));
    db.engine.abort(&t2).unwrap();
    db.engine.commit(&t1).unwrap();

    let reader = db.engine.begin();
    let reader_ctx = db.engine.context(&reader);
    assert_eq!(
        scan_rows(&db.engine, &reader_ctx, "t", vec![]),
        vec![row(1, "zz")]
    );
    db.engine.commit(&reader).unwrap();
}

#[test]
fn a_select_holds_is_on_the_table_and_s_on_the_row() {
    let db = common::setup();
    create_people_table(&db.engine);

    let setup_txn = db.engine.begin();
    let setup_ctx = db.engine.context(&setup_txn);
    let rid = insert_row(&db.engine, &setup_ctx, "t", row(1, "a"));
    db.engine.commit(&setup_txn).unwrap();

    let t1 = db.engine.begin();
    let ctx1 = db.engine.context(&t1);
    let hits = scan_rids(
        &db.engine,
        &ctx1,
        "t",
        vec![Condition::with_val("id", CmpOp::Eq, Value::Int(1))],
    );
    assert_eq!(hits, vec![rid]);

    let lm = db.engine.lock_manager();
    let file_id = db.engine.catalog().file_handle("t").unwrap().file_id();
    let table_id = LockDataId::Table(file_id);
    let record_id = LockDataId::Record(file_id, rid);

    assert!(t1.holds_lock(&table_id));
    assert!(t1.holds_lock(&record_id));
    assert_eq!(lm.group_mode(&table_id), GroupLockMode::IntentionShared);
    assert_eq!(lm.group_mode(&record_id), GroupLockMode::Shared);

    // Commit releases both; the queues empty out.
    db.engine.commit(&t1).unwrap();
    assert_eq!(t1.lock_set_len(), 0);
    assert_eq!(lm.request_count(&table_id), 0);
    assert_eq!(lm.request_count(&record_id), 0);
    assert_eq!(lm.group_mode(&table_id), GroupLockMode::NonLock);
    assert_eq!(lm.group_mode(&record_id), GroupLockMode::NonLock);
}

#[test]
fn read_then_write_upgrades_within_one_transaction() {
    let db = common::setup();
    create_people_table(&db.engine);

    let setup_txn = db.engine.begin();
    let setup_ctx = db.engine.context(&setup_txn);
    let rid = insert_row(&db.engine, &setup_ctx, "t", row(1, "a"));
    db.engine.commit(&setup_txn).unwrap();

    let t1 = db.engine.begin();
    let ctx1 = db.engine.context(&t1);
    // Read first (S), then delete the same row (S -> X upgrade).
    let victims = scan_rids(
        &db.engine,
        &ctx1,
        "t",
        vec![Condition::with_val("id", CmpOp::Eq, Value::Int(1))],
    );
    let mut delete = DeleteExec::new(
        Arc::clone(db.engine.catalog()),
        "t",
        victims,
        ctx1.clone(),
    );
    delete.begin().unwrap();
    assert_eq!(delete.rows_affected(), 1);

    let lm = db.engine.lock_manager();
    let file_id = db.engine.catalog().file_handle("t").unwrap().file_id();
    assert_eq!(
        lm.group_mode(&LockDataId::Record(file_id, rid)),
        GroupLockMode::Exclusive
    );
    db.engine.commit(&t1).unwrap();
}

#[test]
fn two_readers_block_either_from_writing() {
    let db = common::setup();
    create_people_table(&db.engine);

    let setup_txn = db.engine.begin();
    let setup_ctx = db.engine.context(&setup_txn);
    let rid = insert_row(&db.engine, &setup_ctx, "t", row(1, "a"));
    db.engine.commit(&setup_txn).unwrap();

    let t1 = db.engine.begin();
    let ctx1 = db.engine.context(&t1);
    let t2 = db.engine.begin();
    let ctx2 = db.engine.context(&t2);
    let fh = db.engine.catalog().file_handle("t").unwrap();
    fh.get(rid, Some(&ctx1.txn_ctx())).unwrap();
    fh.get(rid, Some(&ctx2.txn_ctx())).unwrap();

    // T1 cannot upgrade while T2 shares the row.
    let mut update = UpdateExec::new(
        Arc::clone(db.engine.catalog()),
        "t",
        vec![SetClause::new("name", Value::Str("b".into()))],
        vec![rid],
        ctx1.clone(),
    );
    let err = update.begin().unwrap_err();
    assert_eq!(abort_reason(err), AbortReason::UpgradeConflict);

    db.engine.abort(&t1).unwrap();
    db.engine.commit(&t2).unwrap();
}

#[test]
fn write_write_conflict_aborts_the_second_writer() {
    let db = common::setup();
    create_people_table(&db.engine);

    let setup_txn = db.engine.begin();
    let setup_ctx = db.engine.context(&setup_txn);
    let rid = insert_row(&db.engine, &setup_ctx, "t", row(1, "a"));
    db.engine.commit(&setup_txn).unwrap();

    let t1 = db.engine.begin();
    let ctx1 = db.engine.context(&t1);
    let mut update = UpdateExec::new(
        Arc::clone(db.engine.catalog()),
        "t",
        vec![SetClause::new("name", Value::Str("x".into()))],
        vec![rid],
        ctx1.clone(),
    );
    update.begin().unwrap();

    let t2 = db.engine.begin();
    let ctx2 = db.engine.context(&t2);
    let mut delete = DeleteExec::new(
        Arc::clone(db.engine.catalog()),
        "t",
        vec![rid],
        ctx2.clone(),
    );
    let err = delete.begin().unwrap_err();
    assert_eq!(abort_reason(err), AbortReason::DeadlockPrevention);

    db.engine.abort(&t2).unwrap();
    db.engine.commit(&t1).unwrap();
}

#[test]
fn no_locks_after_shrinking_begins() {
    let db = common::setup();
    create_people_table(&db.engine);

    let setup_txn = db.engine.begin();
    let setup_ctx = db.engine.context(&setup_txn);
    let rid = insert_row(&db.engine, &setup_ctx, "t", row(1, "a"));
    db.engine.commit(&setup_txn).unwrap();

    let t1 = db.engine.begin();
    let ctx1 = db.engine.context(&t1);
    let fh = db.engine.catalog().file_handle("t").unwrap();
    fh.get(rid, Some(&ctx1.txn_ctx())).unwrap();

    // Manually releasing one lock starts the shrinking phase.
    db.engine
        .lock_manager()
        .unlock(&t1, LockDataId::Record(fh.file_id(), rid))
        .unwrap();

    let err = fh.get(rid, Some(&ctx1.txn_ctx())).unwrap_err();
    assert!(matches!(
        err,
        StorageError::TxnAbort {
            reason: AbortReason::LockOnShrinking,
            ..
        }
    ));
    db.engine.abort(&t1).unwrap();
}
