//! # Storage
//!
//! The record store: blocks of mutex-guarded version-chain slots, the
//! process-wide block directory, and one [`data_table::DataTable`] per
//! layout version. Everything here speaks physical column ids; the
//! oid-to-id translation lives a layer up.

pub mod block;
pub mod data_table;

pub use block::{Block, BlockId, BlockStore, RecordId, BLOCK_CAPACITY};
pub use data_table::{AttrSizeMap, DataTable, SlotCursor};
