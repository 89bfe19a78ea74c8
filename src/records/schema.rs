//! # Schema Snapshots
//!
//! A [`Schema`] is an ordered list of column definitions, frozen at the
//! moment a layout version is registered. Columns are identified by a
//! catalog-assigned oid that stays stable across layout versions and across
//! renames; the per-layout physical column id is a storage concern and never
//! appears here.
//!
//! A column may carry a stored default expression. Only constant defaults
//! can be evaluated by the storage layer when it fills columns that are
//! absent from an older row; other expression kinds are kept so the error
//! can be reported at read time rather than silently treated as NULL.

use eyre::{ensure, Result};
use hashbrown::HashMap;

use crate::records::types::DataType;
use crate::records::ColumnOid;
use crate::types::Value;

/// A default expression as declared in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredExpr {
    Constant(Value),
    FunctionCall(String),
    ColumnRef(ColumnOid),
}

impl StoredExpr {
    pub fn is_constant(&self) -> bool {
        matches!(self, StoredExpr::Constant(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    oid: ColumnOid,
    data_type: DataType,
    nullable: bool,
    default: Option<StoredExpr>,
}

impl Column {
    pub fn new(name: impl Into<String>, oid: ColumnOid, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            oid,
            data_type,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, expr: StoredExpr) -> Self {
        self.default = Some(expr);
        self
    }

    pub fn with_default_value(self, value: Value) -> Self {
        self.with_default(StoredExpr::Constant(value))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn oid(&self) -> ColumnOid {
        self.oid
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn default(&self) -> Option<&StoredExpr> {
        self.default.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<Column>,
    by_oid: HashMap<ColumnOid, usize>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        ensure!(!columns.is_empty(), "schema must have at least one column");
        let mut by_oid = HashMap::with_capacity(columns.len());
        for (idx, col) in columns.iter().enumerate() {
            let prev = by_oid.insert(col.oid(), idx);
            ensure!(prev.is_none(), "duplicate column oid {} in schema", col.oid());
        }
        Ok(Self { columns, by_oid })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_by_oid(&self, oid: ColumnOid) -> Option<&Column> {
        self.by_oid.get(&oid).map(|&idx| &self.columns[idx])
    }

    pub fn oids(&self) -> Vec<ColumnOid> {
        self.columns.iter().map(|c| c.oid()).collect()
    }
}
