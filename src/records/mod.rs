//! # Records
//!
//! The record type system: column data types, schema snapshots, per-version
//! block layouts, the stored row image codec, and projection buffers.
//!
//! Two column identities exist side by side. The *column oid* is assigned by
//! the catalog and stays stable for the life of the column, across renames
//! and layout versions. The *physical column id* is a slot index into one
//! layout version's block layout and is meaningless outside that version.
//! Everything above the storage layer speaks oids; everything below speaks
//! ids; [`layout::ColumnMap`] is the boundary.

pub mod layout;
pub mod projection;
pub mod row;
pub mod schema;
pub mod types;

/// Catalog-assigned logical column identity, stable across layout versions.
pub type ColumnOid = u32;

/// Physical slot index within one layout version's block layout.
pub type ColumnId = u16;

/// Header sentinel: the record store skips this position and leaves it NULL.
pub const IGNORE_COLUMN_ID: ColumnId = u16::MAX;

/// Reserved physical column holding the record's version pointer. Never
/// valid in a projection header.
pub const VERSION_POINTER_COLUMN_ID: ColumnId = 0;

/// Number of reserved physical columns at the head of every block layout.
pub const NUM_RESERVED_COLUMNS: usize = 1;
