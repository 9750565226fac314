//! Typed values and the byte-wise comparisons the predicates run on.
//!
//! Tuples are opaque fixed-length byte buffers; a field is decoded on
//! demand from its `(offset, len, type)`. Scalars are stored little-endian,
//! strings zero-padded to their declared width.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::catalog::{ColMeta, ColType};
use crate::errors::{EngineError, EngineResult};

/// A typed literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
}

impl Value {
    pub fn col_type(&self) -> ColType {
        match self {
            Value::Int(_) => ColType::Int,
            Value::Float(_) => ColType::Float,
            Value::Str(_) => ColType::Str,
        }
    }

    /// Encodes the value into a column-shaped byte field.
    pub fn encode(&self, col: &ColMeta) -> EngineResult<Vec<u8>> {
        if self.col_type() != col.ty {
            return Err(EngineError::Internal(format!(
                "cannot store a {:?} value in {:?} column '{}'",
                self.col_type(),
                col.ty,
                col.name
            )));
        }
        match self {
            Value::Int(v) => Ok(v.to_le_bytes().to_vec()),
            Value::Float(v) => Ok(v.to_le_bytes().to_vec()),
            Value::Str(s) => {
                if s.len() > col.len {
                    return Err(EngineError::Internal(format!(
                        "string of {} bytes overflows column '{}' ({} bytes)",
                        s.len(),
                        col.name,
                        col.len
                    )));
                }
                let mut buf = vec![0u8; col.len];
                buf[..s.len()].copy_from_slice(s.as_bytes());
                Ok(buf)
            }
        }
    }

    /// Decodes a column-shaped byte field back into a value.
    pub fn decode(ty: ColType, bytes: &[u8]) -> Value {
        match ty {
            ColType::Int => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&bytes[..4]);
                Value::Int(i32::from_le_bytes(buf))
            }
            ColType::Float => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&bytes[..4]);
                Value::Float(f32::from_le_bytes(buf))
            }
            ColType::Str => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Value::Str(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
        }
    }
}

/// Compares two equally shaped fields under their declared column type.
pub fn compare(lhs: &[u8], rhs: &[u8], ty: ColType) -> Ordering {
    match ty {
        ColType::Int => {
            let mut a = [0u8; 4];
            let mut b = [0u8; 4];
            a.copy_from_slice(&lhs[..4]);
            b.copy_from_slice(&rhs[..4]);
            i32::from_le_bytes(a).cmp(&i32::from_le_bytes(b))
        }
        ColType::Float => {
            let mut a = [0u8; 4];
            let mut b = [0u8; 4];
            a.copy_from_slice(&lhs[..4]);
            b.copy_from_slice(&rhs[..4]);
            f32::from_le_bytes(a).total_cmp(&f32::from_le_bytes(b))
        }
        ColType::Str => lhs.cmp(rhs),
    }
}

/// The six relational operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CmpOp {
    pub fn matches(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}
