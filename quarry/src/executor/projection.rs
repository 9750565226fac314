//! Column projection.

use granite::Record;

use super::eval::{self, ColRef};
use super::Executor;
use crate::catalog::ColMeta;
use crate::errors::{EngineError, EngineResult};

/// Narrows the child's output to the selected columns, re-packed densely
/// left to right.
pub struct Projection {
    child: Box<dyn Executor>,
    cols: Vec<ColMeta>,
    sel_idxs: Vec<usize>,
    len: usize,
}

impl Projection {
    pub fn new(child: Box<dyn Executor>, sel_cols: &[ColRef]) -> EngineResult<Self> {
        let mut cols = Vec::with_capacity(sel_cols.len());
        let mut sel_idxs = Vec::with_capacity(sel_cols.len());
        let mut offset = 0;
        for sel in sel_cols {
            let idx = eval::find_col_idx(child.cols(), sel)?;
            let mut col = child.cols()[idx].clone();
            col.offset = offset;
            offset += col.len;
            sel_idxs.push(idx);
            cols.push(col);
        }
        Ok(Self {
            child,
            cols,
            sel_idxs,
            len: offset,
        })
    }
}

impl Executor for Projection {
    fn begin(&mut self) -> EngineResult<()> {
        self.child.begin()
    }

    fn next(&mut self) -> EngineResult<()> {
        self.child.next()
    }

    fn current(&self) -> EngineResult<Record> {
        if self.is_end() {
            return Err(EngineError::Internal(
                "projection cursor is at end".to_string(),
            ));
        }
        let child_cols = self.child.cols();
        let child_record = self.child.current()?;
        let mut data = vec![0u8; self.len];
        for (out_col, &idx) in self.cols.iter().zip(&self.sel_idxs) {
            let src = &child_cols[idx];
            data[out_col.offset..out_col.offset + out_col.len]
                .copy_from_slice(&child_record.data[src.offset..src.offset + src.len]);
        }
        Ok(Record { data })
    }

    fn is_end(&self) -> bool {
        self.child.is_end()
    }

    fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        self.len
    }
}
