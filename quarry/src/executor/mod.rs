//! Pull-based executor tree.
//!
//! Every operator exposes the same cursor surface and composes through
//! `Box<dyn Executor>`; tuples flow upward as opaque byte buffers shaped
//! by each operator's `cols()`.

pub mod dml;
pub mod eval;
pub mod join;
pub mod projection;
pub mod seq_scan;

pub use dml::{DeleteExec, InsertExec, SetClause, UpdateExec};
pub use eval::{ColRef, Condition, RhsExpr};
pub use join::NestedLoopJoin;
pub use projection::Projection;
pub use seq_scan::SeqScan;

use granite::{Record, Rid, INVALID_RID};

use crate::catalog::ColMeta;
use crate::errors::EngineResult;

/// The cursor surface every operator implements.
pub trait Executor {
    /// Positions the cursor on the first output tuple (or at end).
    fn begin(&mut self) -> EngineResult<()>;

    /// Advances past the current tuple.
    fn next(&mut self) -> EngineResult<()>;

    /// The tuple at the cursor. Only valid while `!is_end()`.
    fn current(&self) -> EngineResult<Record>;

    fn is_end(&self) -> bool;

    /// The output tuple layout.
    fn cols(&self) -> &[ColMeta];

    /// The output tuple width in bytes.
    fn tuple_len(&self) -> usize;

    /// The storage address of the current tuple; meaningful only for
    /// scan-like operators.
    fn rid(&self) -> Rid {
        INVALID_RID
    }
}
