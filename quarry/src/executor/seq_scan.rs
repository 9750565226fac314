//! Sequential scan with predicate push-down.

use std::sync::Arc;

use granite::{Record, RecordFile, RecordScan, Rid, INVALID_RID};

use super::eval::{self, Condition};
use super::Executor;
use crate::catalog::{Catalog, ColMeta};
use crate::errors::{EngineError, EngineResult};
use crate::Context;

/// Walks a table's heap file, skipping tuples that fail the predicate.
/// Every visited record is fetched through the record file, so the scan
/// holds a shared lock on each row it reads (and table IS transitively).
pub struct SeqScan {
    table_name: String,
    file: Arc<RecordFile>,
    cols: Vec<ColMeta>,
    len: usize,
    conds: Vec<Condition>,
    scan: Option<RecordScan>,
    rid: Rid,
    ctx: Context,
}

impl SeqScan {
    pub fn new(
        catalog: &Catalog,
        table_name: &str,
        conds: Vec<Condition>,
        ctx: Context,
    ) -> EngineResult<Self> {
        let meta = catalog.get_table(table_name)?;
        let file = catalog.file_handle(table_name)?;
        Ok(Self {
            table_name: table_name.to_string(),
            file,
            len: meta.record_size(),
            cols: meta.cols,
            conds,
            scan: None,
            rid: INVALID_RID,
            ctx,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Leaves the cursor on the first position at or after the current one
    /// whose tuple satisfies the predicate.
    fn seek_match(&mut self) -> EngineResult<()> {
        loop {
            let rid = match &self.scan {
                Some(scan) if !scan.is_end() => scan.rid(),
                _ => {
                    self.rid = INVALID_RID;
                    return Ok(());
                }
            };
            let record = self.file.get(rid, Some(&self.ctx.txn_ctx()))?;
            if eval::eval_conds(&self.cols, &self.conds, &record.data)? {
                self.rid = rid;
                return Ok(());
            }
            if let Some(scan) = self.scan.as_mut() {
                scan.next()?;
            }
        }
    }
}

impl Executor for SeqScan {
    fn begin(&mut self) -> EngineResult<()> {
        self.scan = Some(self.file.scan()?);
        self.seek_match()
    }

    fn next(&mut self) -> EngineResult<()> {
        if let Some(scan) = self.scan.as_mut() {
            scan.next()?;
        }
        self.seek_match()
    }

    fn current(&self) -> EngineResult<Record> {
        if self.is_end() {
            return Err(EngineError::Internal(
                "seq scan cursor is at end".to_string(),
            ));
        }
        Ok(self.file.get(self.rid, Some(&self.ctx.txn_ctx()))?)
    }

    fn is_end(&self) -> bool {
        self.scan.as_ref().map_or(true, RecordScan::is_end)
    }

    fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        self.len
    }

    fn rid(&self) -> Rid {
        self.rid
    }
}
