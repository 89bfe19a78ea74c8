//! # Strata — Versioned Tuple Storage
//!
//! Strata is an embedded, in-process storage engine for one kind of object:
//! a relational table whose schema changes over time. Columns can be added
//! (with defaults), dropped, or widened without touching a single stored
//! row; rows are migrated lazily, when an update forces them into a newer
//! layout.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ VersionedTable                              │
//! │   header translation · default back-fill    │
//! │   lazy migration · version registry         │
//! ├──────────────────────┬──────────────────────┤
//! │ DataTable (v0)       │ DataTable (v1) ...   │
//! │   per-version MVCC record store             │
//! ├──────────────────────┴──────────────────────┤
//! │ BlockStore                                  │
//! │   blocks · slot version chains              │
//! ├─────────────────────────────────────────────┤
//! │ Records                                     │
//! │   schemas · layouts · row codec ·           │
//! │   projection buffers                        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Transactions run under snapshot isolation ([`mvcc`]); writers that lose
//! a write-write race are marked must-abort and must roll back.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use strata::{
//!     BlockStore, Column, DataType, RecordId, Schema, TransactionManager,
//!     VersionedTable,
//! };
//!
//! let store = Arc::new(BlockStore::new());
//! let schema = Schema::new(vec![
//!     Column::new("id", 1, DataType::Int8),
//!     Column::new("name", 2, DataType::Text),
//! ])?;
//! let table = VersionedTable::new(Arc::clone(&store), schema)?;
//! let manager = TransactionManager::new(store);
//!
//! let mut txn = manager.begin()?;
//! let (init, map) = table.initializer_for_projected_row(&[1, 2], 0)?;
//! let mut row = init.init_row();
//! row.set_int8(map[&1], 42);
//! row.set_text(map[&2], "alice");
//! txn.stage_write(RecordId::INVALID, row);
//! let slot = table.insert(&mut txn, 0)?;
//! txn.commit()?;
//! ```

pub mod mvcc;
pub mod records;
pub mod storage;
pub mod table;
pub mod types;

pub use mvcc::{RedoRecord, Transaction, TransactionManager, TxnId};
pub use records::layout::{BlockLayout, ColumnMap};
pub use records::projection::{
    ProjectedColumns, ProjectedColumnsInitializer, ProjectedRow, ProjectedRowInitializer,
    ProjectionMap, RowView, SlotAccess,
};
pub use records::schema::{Column, Schema, StoredExpr};
pub use records::types::DataType;
pub use records::{ColumnId, ColumnOid, IGNORE_COLUMN_ID};
pub use storage::{BlockStore, DataTable, RecordId};
pub use table::{LayoutVersion, ScanCursor, VersionedTable, MAX_LAYOUT_VERSIONS};
pub use types::Value;
