//! Predicate evaluation over raw tuple bytes.

use crate::catalog::ColMeta;
use crate::errors::{EngineError, EngineResult};
use crate::value::{compare, CmpOp, Value};

/// A column reference, optionally qualified by table name.
#[derive(Debug, Clone, PartialEq)]
pub struct ColRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    fn display(&self) -> String {
        match &self.table {
            Some(table) => format!("{table}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// The right-hand side of a condition: another column or a literal.
#[derive(Debug, Clone)]
pub enum RhsExpr {
    Col(ColRef),
    Val(Value),
}

/// One conjunct of a predicate: `lhs op rhs`.
#[derive(Debug, Clone)]
pub struct Condition {
    pub lhs: ColRef,
    pub op: CmpOp,
    pub rhs: RhsExpr,
}

impl Condition {
    /// `col op literal`.
    pub fn with_val(lhs: impl Into<String>, op: CmpOp, value: Value) -> Self {
        Self {
            lhs: ColRef::new(lhs),
            op,
            rhs: RhsExpr::Val(value),
        }
    }

    /// `col op col`.
    pub fn with_col(lhs: ColRef, op: CmpOp, rhs: ColRef) -> Self {
        Self {
            lhs,
            op,
            rhs: RhsExpr::Col(rhs),
        }
    }
}

/// Resolves a column reference to its position in an operator's output
/// layout.
pub fn find_col_idx(cols: &[ColMeta], col_ref: &ColRef) -> EngineResult<usize> {
    cols.iter()
        .position(|col| {
            col.name == col_ref.name
                && col_ref
                    .table
                    .as_deref()
                    .map_or(true, |table| col.table == table)
        })
        .ok_or_else(|| EngineError::ColumnNotFound(col_ref.display()))
}

/// Resolves a column reference against an operator's output layout.
pub fn find_col<'a>(cols: &'a [ColMeta], col_ref: &ColRef) -> EngineResult<&'a ColMeta> {
    find_col_idx(cols, col_ref).map(|idx| &cols[idx])
}

/// A field addressed through a (possibly concatenated) layout: offsets
/// below `left.len()` read from `left`, the rest from `right` rebased by
/// the left width.
fn field<'a>(left: &'a [u8], right: &'a [u8], offset: usize, len: usize) -> &'a [u8] {
    if offset < left.len() {
        &left[offset..offset + len]
    } else {
        let base = offset - left.len();
        &right[base..base + len]
    }
}

/// Evaluates the conjunction of `conds` over the pair of tuple halves.
/// An empty list is vacuously true; the first failing conjunct
/// short-circuits.
pub fn eval_conds_pair(
    cols: &[ColMeta],
    conds: &[Condition],
    left: &[u8],
    right: &[u8],
) -> EngineResult<bool> {
    for cond in conds {
        let lhs_col = find_col(cols, &cond.lhs)?;
        let lhs = field(left, right, lhs_col.offset, lhs_col.len);

        let rhs_buf;
        let rhs: &[u8] = match &cond.rhs {
            RhsExpr::Val(value) => {
                rhs_buf = value.encode(lhs_col)?;
                &rhs_buf
            }
            RhsExpr::Col(col_ref) => {
                let rhs_col = find_col(cols, col_ref)?;
                if rhs_col.ty != lhs_col.ty || rhs_col.len != lhs_col.len {
                    return Err(EngineError::Internal(format!(
                        "cannot compare column '{}' with '{}'",
                        lhs_col.name, rhs_col.name
                    )));
                }
                field(left, right, rhs_col.offset, rhs_col.len)
            }
        };

        if !cond.op.matches(compare(lhs, rhs, lhs_col.ty)) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluates the conjunction over a single tuple.
pub fn eval_conds(cols: &[ColMeta], conds: &[Condition], tuple: &[u8]) -> EngineResult<bool> {
    eval_conds_pair(cols, conds, tuple, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColType;

    fn layout() -> Vec<ColMeta> {
        vec![
            ColMeta {
                table: "t".into(),
                name: "id".into(),
                ty: ColType::Int,
                len: 4,
                offset: 0,
            },
            ColMeta {
                table: "t".into(),
                name: "name".into(),
                ty: ColType::Str,
                len: 4,
                offset: 4,
            },
        ]
    }

    fn tuple(id: i32, name: &str) -> Vec<u8> {
        let mut buf = id.to_le_bytes().to_vec();
        let mut padded = name.as_bytes().to_vec();
        padded.resize(4, 0);
        buf.extend(padded);
        buf
    }

    #[test]
    fn empty_condition_list_is_vacuously_true() {
        assert!(eval_conds(&layout(), &[], &tuple(1, "a")).unwrap());
    }

    #[test]
    fn literal_comparisons_respect_type_and_operator() {
        let cols = layout();
        let row = tuple(5, "bb");

        let eq = Condition::with_val("id", CmpOp::Eq, Value::Int(5));
        assert!(eval_conds(&cols, &[eq], &row).unwrap());

        let lt = Condition::with_val("id", CmpOp::Lt, Value::Int(5));
        assert!(!eval_conds(&cols, &[lt], &row).unwrap());

        let ge = Condition::with_val("name", CmpOp::Ge, Value::Str("ba".into()));
        assert!(eval_conds(&cols, &[ge], &row).unwrap());
    }

    #[test]
    fn conjunction_short_circuits_on_first_failure() {
        let cols = layout();
        let row = tuple(5, "bb");
        let conds = vec![
            Condition::with_val("id", CmpOp::Ne, Value::Int(5)),
            // Would error on type mismatch if ever evaluated.
            Condition::with_val("id", CmpOp::Eq, Value::Str("x".into())),
        ];
        assert!(!eval_conds(&cols, &conds, &row).unwrap());
    }

    #[test]
    fn column_to_column_comparison_reads_both_sides() {
        let mut cols = layout();
        cols.push(ColMeta {
            table: "t".into(),
            name: "id2".into(),
            ty: ColType::Int,
            len: 4,
            offset: 8,
        });
        let mut row = tuple(5, "bb");
        row.extend(5i32.to_le_bytes());

        let cond = Condition::with_col(ColRef::new("id"), CmpOp::Eq, ColRef::new("id2"));
        assert!(eval_conds(&cols, &[cond], &row).unwrap());

        let cond = Condition::with_col(ColRef::new("id"), CmpOp::Eq, ColRef::new("name"));
        assert!(eval_conds(&cols, &[cond], &row).is_err());
    }

    #[test]
    fn unknown_columns_are_reported() {
        let err = eval_conds(
            &layout(),
            &[Condition::with_val("ghost", CmpOp::Eq, Value::Int(1))],
            &tuple(1, "a"),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::ColumnNotFound(name) if name == "ghost"));
    }

    #[test]
    fn split_evaluation_rebases_right_half_offsets() {
        // Two single-int tables joined: l.a at offset 0, r.b at offset 4.
        let cols = vec![
            ColMeta {
                table: "l".into(),
                name: "a".into(),
                ty: ColType::Int,
                len: 4,
                offset: 0,
            },
            ColMeta {
                table: "r".into(),
                name: "b".into(),
                ty: ColType::Int,
                len: 4,
                offset: 4,
            },
        ];
        let left = 3i32.to_le_bytes();
        let right = 3i32.to_le_bytes();
        let cond = Condition::with_col(
            ColRef::qualified("l", "a"),
            CmpOp::Eq,
            ColRef::qualified("r", "b"),
        );
        assert!(eval_conds_pair(&cols, &[cond.clone()], &left, &right).unwrap());

        let right = 4i32.to_le_bytes();
        assert!(!eval_conds_pair(&cols, &[cond], &left, &right).unwrap());
    }
}
