//! Mutating executors: insert, update, delete.
//!
//! All three run their whole effect in `begin()` and emit no tuples. Every
//! mutation goes through the record file under an exclusive record lock
//! and appends a `WriteRecord` so the transaction can be rolled back; the
//! write record is appended only once the heap and every index agree, and
//! a failed index step is unwound locally before the error surfaces.

use std::sync::Arc;

use granite::transaction::WriteRecord;
use granite::{Record, Rid, INVALID_RID};
use log::debug;

use super::Executor;
use crate::catalog::{Catalog, ColMeta, TableMeta};
use crate::errors::{EngineError, EngineResult};
use crate::value::Value;
use crate::Context;

/// One `SET col = literal` assignment.
#[derive(Debug, Clone)]
pub struct SetClause {
    pub col_name: String,
    pub value: Value,
}

impl SetClause {
    pub fn new(col_name: impl Into<String>, value: Value) -> Self {
        Self {
            col_name: col_name.into(),
            value,
        }
    }
}

/// Inserts one tuple and its index entries.
pub struct InsertExec {
    catalog: Arc<Catalog>,
    table_name: String,
    values: Vec<Value>,
    ctx: Context,
    rid: Rid,
    done: bool,
}

impl InsertExec {
    pub fn new(
        catalog: Arc<Catalog>,
        table_name: impl Into<String>,
        values: Vec<Value>,
        ctx: Context,
    ) -> Self {
        Self {
            catalog,
            table_name: table_name.into(),
            values,
            ctx,
            rid: INVALID_RID,
            done: false,
        }
    }

    pub fn rows_affected(&self) -> usize {
        usize::from(self.done)
    }

    fn execute(&mut self) -> EngineResult<()> {
        let meta = self.catalog.get_table(&self.table_name)?;
        let fh = self.catalog.file_handle(&self.table_name)?;
        if self.values.len() != meta.cols.len() {
            return Err(EngineError::Internal(format!(
                "insert supplies {} values, table '{}' has {} columns",
                self.values.len(),
                self.table_name,
                meta.cols.len()
            )));
        }

        let mut buf = vec![0u8; meta.record_size()];
        for (col, value) in meta.cols.iter().zip(&self.values) {
            buf[col.offset..col.offset + col.len].copy_from_slice(&value.encode(col)?);
        }

        let rid = fh.insert(&buf, Some(&self.ctx.txn_ctx()))?;

        for (pos, index) in meta.indexes.iter().enumerate() {
            let ih = self.catalog.index_handle(&index.name)?;
            let key = Catalog::index_key(index, &buf);
            if let Err(err) = ih.insert_entry(&key, rid, Some(self.ctx.txn.as_ref())) {
                // Unwind this statement before surfacing the conflict.
                for earlier in meta.indexes.iter().take(pos) {
                    let ih = self.catalog.index_handle(&earlier.name)?;
                    ih.delete_entry(&Catalog::index_key(earlier, &buf), Some(self.ctx.txn.as_ref()))?;
                }
                fh.delete(rid, Some(&self.ctx.txn_ctx()))?;
                return Err(err.into());
            }
        }

        self.ctx
            .txn
            .append_write(WriteRecord::insert(self.table_name.as_str(), rid));
        self.rid = rid;
        debug!(
            "dml: txn {} inserted {rid} into '{}'",
            self.ctx.txn.id(),
            self.table_name
        );
        Ok(())
    }
}

impl Executor for InsertExec {
    fn begin(&mut self) -> EngineResult<()> {
        if self.done {
            return Ok(());
        }
        self.execute()?;
        self.done = true;
        Ok(())
    }

    fn next(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn current(&self) -> EngineResult<Record> {
        Err(EngineError::Internal("insert emits no tuples".to_string()))
    }

    fn is_end(&self) -> bool {
        true
    }

    fn cols(&self) -> &[ColMeta] {
        &[]
    }

    fn tuple_len(&self) -> usize {
        0
    }

    fn rid(&self) -> Rid {
        self.rid
    }
}

/// Applies set clauses to a pre-resolved rid list.
pub struct UpdateExec {
    catalog: Arc<Catalog>,
    table_name: String,
    set_clauses: Vec<SetClause>,
    rids: Vec<Rid>,
    ctx: Context,
    affected: usize,
    done: bool,
}

impl UpdateExec {
    pub fn new(
        catalog: Arc<Catalog>,
        table_name: impl Into<String>,
        set_clauses: Vec<SetClause>,
        rids: Vec<Rid>,
        ctx: Context,
    ) -> Self {
        Self {
            catalog,
            table_name: table_name.into(),
            set_clauses,
            rids,
            ctx,
            affected: 0,
            done: false,
        }
    }

    pub fn rows_affected(&self) -> usize {
        self.affected
    }

    fn execute(&mut self) -> EngineResult<()> {
        let meta = self.catalog.get_table(&self.table_name)?;
        let fh = self.catalog.file_handle(&self.table_name)?;

        let rids = self.rids.clone();
        for rid in rids {
            self.ctx
                .lock_manager
                .lock_exclusive_on_record(&self.ctx.txn, rid, fh.file_id())?;
            let old = fh.get(rid, Some(&self.ctx.txn_ctx()))?;

            let mut new_buf = old.data.clone();
            for clause in &self.set_clauses {
                let col = meta.col(&clause.col_name).ok_or_else(|| {
                    EngineError::ColumnNotFound(clause.col_name.clone())
                })?;
                new_buf[col.offset..col.offset + col.len]
                    .copy_from_slice(&clause.value.encode(col)?);
            }

            // Index entries move first: the delete is keyed by the
            // pre-update tuple, the insert by the new one.
            reindex(&self.catalog, &meta, &self.ctx, rid, &old.data, &new_buf)?;

            fh.update(rid, &new_buf, Some(&self.ctx.txn_ctx()))?;
            self.ctx
                .txn
                .append_write(WriteRecord::update(self.table_name.as_str(), rid, old));
            self.affected += 1;
        }
        debug!(
            "dml: txn {} updated {} rows in '{}'",
            self.ctx.txn.id(),
            self.affected,
            self.table_name
        );
        Ok(())
    }
}

/// Moves every index entry for `rid` from the old tuple's keys to the new
/// tuple's keys. On a conflict, the indexes already touched are restored
/// before the error is returned.
fn reindex(
    catalog: &Catalog,
    meta: &TableMeta,
    ctx: &Context,
    rid: Rid,
    old_tuple: &[u8],
    new_tuple: &[u8],
) -> EngineResult<()> {
    for (pos, index) in meta.indexes.iter().enumerate() {
        let old_key = Catalog::index_key(index, old_tuple);
        let new_key = Catalog::index_key(index, new_tuple);
        if old_key == new_key {
            continue;
        }
        let ih = catalog.index_handle(&index.name)?;
        ih.delete_entry(&old_key, Some(ctx.txn.as_ref()))?;
        if let Err(err) = ih.insert_entry(&new_key, rid, Some(ctx.txn.as_ref())) {
            ih.insert_entry(&old_key, rid, Some(ctx.txn.as_ref()))?;
            for earlier in meta.indexes.iter().take(pos) {
                let old_key = Catalog::index_key(earlier, old_tuple);
                let new_key = Catalog::index_key(earlier, new_tuple);
                if old_key == new_key {
                    continue;
                }
                let ih = catalog.index_handle(&earlier.name)?;
                ih.delete_entry(&new_key, Some(ctx.txn.as_ref()))?;
                ih.insert_entry(&old_key, rid, Some(ctx.txn.as_ref()))?;
            }
            return Err(err.into());
        }
    }
    Ok(())
}

impl Executor for UpdateExec {
    fn begin(&mut self) -> EngineResult<()> {
        if self.done {
            return Ok(());
        }
        self.execute()?;
        self.done = true;
        Ok(())
    }

    fn next(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn current(&self) -> EngineResult<Record> {
        Err(EngineError::Internal("update emits no tuples".to_string()))
    }

    fn is_end(&self) -> bool {
        true
    }

    fn cols(&self) -> &[ColMeta] {
        &[]
    }

    fn tuple_len(&self) -> usize {
        0
    }
}

/// Deletes a pre-resolved rid list.
pub struct DeleteExec {
    catalog: Arc<Catalog>,
    table_name: String,
    rids: Vec<Rid>,
    ctx: Context,
    affected: usize,
    done: bool,
}

impl DeleteExec {
    pub fn new(
        catalog: Arc<Catalog>,
        table_name: impl Into<String>,
        rids: Vec<Rid>,
        ctx: Context,
    ) -> Self {
        Self {
            catalog,
            table_name: table_name.into(),
            rids,
            ctx,
            affected: 0,
            done: false,
        }
    }

    pub fn rows_affected(&self) -> usize {
        self.affected
    }

    fn execute(&mut self) -> EngineResult<()> {
        let meta = self.catalog.get_table(&self.table_name)?;
        let fh = self.catalog.file_handle(&self.table_name)?;
        self.ctx
            .lock_manager
            .lock_ix_on_table(&self.ctx.txn, fh.file_id())?;

        let rids = self.rids.clone();
        for rid in rids {
            self.ctx
                .lock_manager
                .lock_exclusive_on_record(&self.ctx.txn, rid, fh.file_id())?;
            let old = fh.get(rid, Some(&self.ctx.txn_ctx()))?;

            for index in &meta.indexes {
                let ih = self.catalog.index_handle(&index.name)?;
                ih.delete_entry(&Catalog::index_key(index, &old.data), Some(self.ctx.txn.as_ref()))?;
            }

            fh.delete(rid, Some(&self.ctx.txn_ctx()))?;
            self.ctx
                .txn
                .append_write(WriteRecord::delete(self.table_name.as_str(), rid, old));
            self.affected += 1;
        }
        debug!(
            "dml: txn {} deleted {} rows from '{}'",
            self.ctx.txn.id(),
            self.affected,
            self.table_name
        );
        Ok(())
    }
}

impl Executor for DeleteExec {
    fn begin(&mut self) -> EngineResult<()> {
        if self.done {
            return Ok(());
        }
        self.execute()?;
        self.done = true;
        Ok(())
    }

    fn next(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn current(&self) -> EngineResult<Record> {
        Err(EngineError::Internal("delete emits no tuples".to_string()))
    }

    fn is_end(&self) -> bool {
        true
    }

    fn cols(&self) -> &[ColMeta] {
        &[]
    }

    fn tuple_len(&self) -> usize {
        0
    }
}
