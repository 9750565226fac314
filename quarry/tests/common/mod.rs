#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use granite::Rid;
use quarry::catalog::{ColDef, ColMeta};
use quarry::executor::{Condition, Executor, InsertExec, SeqScan};
use quarry::value::Value;
use quarry::{Context, Engine};

/// An engine rooted in a temp directory that lives as long as the test.
pub struct TestDb {
    pub engine: Engine,
    _dir: TempDir,
}

pub fn setup() -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    TestDb { engine, _dir: dir }
}

/// `t(id INT, name STRING(8))`, the workhorse fixture table.
pub fn create_people_table(engine: &Engine) {
    engine
        .catalog()
        .create_table("t", &[ColDef::int("id"), ColDef::string("name", 8)])
        .unwrap();
}

pub fn row(id: i32, name: &str) -> Vec<Value> {
    vec![Value::Int(id), Value::Str(name.to_string())]
}

/// Runs an insert executor and returns the new row's rid.
pub fn insert_row(engine: &Engine, ctx: &Context, table: &str, values: Vec<Value>) -> Rid {
    let mut exec = InsertExec::new(
        Arc::clone(engine.catalog()),
        table,
        values,
        ctx.clone(),
    );
    exec.begin().unwrap();
    exec.rid()
}

fn decode_row(cols: &[ColMeta], data: &[u8]) -> Vec<Value> {
    cols.iter()
        .map(|col| Value::decode(col.ty, &data[col.offset..col.offset + col.len]))
        .collect()
}

/// Drains any executor into decoded rows.
pub fn collect_rows(exec: &mut dyn Executor) -> Vec<Vec<Value>> {
    exec.begin().unwrap();
    let cols = exec.cols().to_vec();
    let mut rows = Vec::new();
    while !exec.is_end() {
        let record = exec.current().unwrap();
        rows.push(decode_row(&cols, &record.data));
        exec.next().unwrap();
    }
    rows
}

/// Full scan of `table`, decoded, in scan order.
pub fn scan_rows(
    engine: &Engine,
    ctx: &Context,
    table: &str,
    conds: Vec<Condition>,
) -> Vec<Vec<Value>> {
    let mut scan = SeqScan::new(engine.catalog(), table, conds, ctx.clone()).unwrap();
    collect_rows(&mut scan)
}

/// The rids matching a predicate, in scan order.
pub fn scan_rids(
    engine: &Engine,
    ctx: &Context,
    table: &str,
    conds: Vec<Condition>,
) -> Vec<Rid> {
    let mut scan = SeqScan::new(engine.catalog(), table, conds, ctx.clone()).unwrap();
    scan.begin().unwrap();
    let mut rids = Vec::new();
    while !scan.is_end() {
        rids.push(scan.rid());
        scan.next().unwrap();
    }
    rids
}

/// Sorts decoded rows so set-wise comparisons are stable.
pub fn sorted(mut rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    rows.sort_by_key(|row| format!("{row:?}"));
    rows
}
