//! # Value Representation
//!
//! Dynamically typed values used for constant default expressions and for
//! building rows in tests and callers that do not want to hand-encode bytes.
//! Small values are stored inline; text and blob own their bytes.
//!
//! Values encode to the little-endian storage form of a target [`DataType`].
//! Integer values narrow to the column width by keeping the low-order bytes,
//! mirroring the byte-level semantics the storage layer uses when a column
//! is read at a width other than its stored width.

use eyre::{bail, Result};
use smallvec::SmallVec;

use crate::records::types::DataType;

pub type ValueBytes = SmallVec<[u8; 16]>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encode into the storage form of `ty`. `None` means SQL NULL.
    pub fn encode(&self, ty: DataType) -> Result<Option<ValueBytes>> {
        let bytes: ValueBytes = match (self, ty) {
            (Value::Null, _) => return Ok(None),
            (Value::Bool(b), DataType::Bool) => SmallVec::from_slice(&[*b as u8]),
            (Value::Int(v), DataType::Int2) => SmallVec::from_slice(&(*v as i16).to_le_bytes()),
            (Value::Int(v), DataType::Int4 | DataType::Date) => {
                SmallVec::from_slice(&(*v as i32).to_le_bytes())
            }
            (Value::Int(v), DataType::Int8 | DataType::Time | DataType::Timestamp) => {
                SmallVec::from_slice(&v.to_le_bytes())
            }
            (Value::Float(v), DataType::Float4) => {
                SmallVec::from_slice(&(*v as f32).to_le_bytes())
            }
            (Value::Float(v), DataType::Float8) => SmallVec::from_slice(&v.to_le_bytes()),
            (Value::Text(s), DataType::Text) => SmallVec::from_slice(s.as_bytes()),
            (Value::Blob(b), DataType::Blob) => SmallVec::from_slice(b),
            (v, ty) => bail!("value {v:?} cannot be encoded as {ty:?}"),
        };
        Ok(Some(bytes))
    }
}
