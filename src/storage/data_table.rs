//! # Data Tables
//!
//! One [`DataTable`] per layout version. It owns the blocks its rows live
//! in, materializes stored images into projection buffers, and applies
//! staged deltas under the MVCC write protocol. It knows nothing about
//! other layout versions: headers handed to it must already be expressed in
//! its own physical column ids, with [`IGNORE_COLUMN_ID`] marking positions
//! it should skip.
//!
//! ## Size overrides
//!
//! When a caller materializes a column at a width other than its stored
//! width, the attribute size map carries `column id -> desired width`. Reads
//! copy the stored low-order bytes into a zeroed slot of the desired width;
//! writes copy the delta's low-order bytes into a zeroed slot of the stored
//! width. The table does not interpret the bytes; the caller is responsible
//! for the conversion being meaningful.

use std::sync::Arc;

use eyre::{ensure, eyre, Result};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use crate::mvcc::transaction::{Transaction, WriteKind};
use crate::mvcc::version::{VersionHeader, WriteCheckResult};
use crate::records::layout::BlockLayout;
use crate::records::projection::{ProjectedColumns, ProjectedRow, RowWriter, SlotAccess};
use crate::records::row::{resize_low_order, RowImage};
use crate::records::{ColumnId, IGNORE_COLUMN_ID};
use crate::storage::block::{Block, BlockStore, RecordId, RecordVersion, SlotState};
use crate::table::LayoutVersion;

/// Per-column width overrides for cross-width materialization.
pub type AttrSizeMap = HashMap<ColumnId, u16>;

/// Scan position within one data table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotCursor {
    pub block_idx: usize,
    pub slot_idx: usize,
}

pub struct DataTable {
    layout_version: LayoutVersion,
    layout: BlockLayout,
    store: Arc<BlockStore>,
    blocks: RwLock<Vec<Arc<Block>>>,
    alloc_lock: Mutex<()>,
}

impl DataTable {
    pub fn new(store: Arc<BlockStore>, layout: BlockLayout, layout_version: LayoutVersion) -> Self {
        Self {
            layout_version,
            layout,
            store,
            blocks: RwLock::new(Vec::new()),
            alloc_lock: Mutex::new(()),
        }
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn layout_version(&self) -> LayoutVersion {
        self.layout_version
    }

    /// Materialize the record as visible to `txn`. Returns `false` when no
    /// version is visible.
    pub fn select(
        &self,
        txn: &Transaction<'_>,
        record: RecordId,
        out: &mut ProjectedRow,
        size_map: Option<&AttrSizeMap>,
    ) -> Result<bool> {
        let block = self.owned_block(record)?;
        let state = block.slot(record.slot)?.lock();
        match &*state {
            SlotState::Stored(version) => {
                match version.visible_version(txn.read_ts(), txn.id()) {
                    Some(visible) => {
                        self.materialize_into(&visible.image, size_map, out)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            SlotState::Vacant => Ok(false),
        }
    }

    /// Insert a new record built from the delta; positions absent from the
    /// delta are NULL. Always succeeds barring allocation failure.
    pub fn insert(&self, txn: &mut Transaction<'_>, delta: &ProjectedRow) -> Result<RecordId> {
        let mut values: Vec<Option<Vec<u8>>> = vec![None; self.layout.num_columns()];
        for (pos, &id) in delta.col_ids().iter().enumerate() {
            ensure!(
                id != IGNORE_COLUMN_ID,
                "insert delta cannot contain ignored positions"
            );
            if let Some(bytes) = delta.value(pos) {
                values[id as usize] = Some(self.stored_bytes(id, bytes));
            }
        }
        let refs: Vec<Option<&[u8]>> = values.iter().map(|v| v.as_deref()).collect();
        let image = RowImage::encode(&self.layout, &refs)?;

        let (block, slot_idx) = self.reserve_slot()?;
        {
            let mut state = block.slot(slot_idx)?.lock();
            *state = SlotState::Stored(RecordVersion {
                header: VersionHeader::locked(txn.id()),
                image,
                prev: None,
            });
        }
        let record = RecordId {
            block: block.id(),
            slot: slot_idx,
        };
        txn.record_write(record, WriteKind::Insert);
        Ok(record)
    }

    /// Apply the delta in place. Delta bytes are normalized to each
    /// column's stored width, so a delta expressed at another layout
    /// version's widths is applied with the same low-order-byte rule reads
    /// use. Returns `false` on a write-write conflict or when the record
    /// does not exist.
    pub fn update(
        &self,
        txn: &mut Transaction<'_>,
        record: RecordId,
        delta: &ProjectedRow,
    ) -> Result<bool> {
        let block = self.owned_block(record)?;
        let mut state = block.slot(record.slot)?.lock();
        let SlotState::Stored(head) = &mut *state else {
            return Ok(false);
        };
        if head.header.can_write(txn.id(), txn.read_ts()) != WriteCheckResult::CanWrite {
            return Ok(false);
        }

        let mut values = head.image.decode(&self.layout)?;
        for (pos, &id) in delta.col_ids().iter().enumerate() {
            if id == IGNORE_COLUMN_ID {
                continue;
            }
            values[id as usize] = delta.value(pos).map(|bytes| self.stored_bytes(id, bytes));
        }
        let refs: Vec<Option<&[u8]>> = values.iter().map(|v| v.as_deref()).collect();
        let image = RowImage::encode(&self.layout, &refs)?;

        let old = match std::mem::take(&mut *state) {
            SlotState::Stored(v) => v,
            SlotState::Vacant => unreachable!("state checked above"),
        };
        *state = SlotState::Stored(RecordVersion {
            header: VersionHeader::locked(txn.id()),
            image,
            prev: Some(Box::new(old)),
        });
        drop(state);

        txn.record_write(record, WriteKind::Update);
        Ok(true)
    }

    /// Write a tombstone. Returns `false` on a write-write conflict or when
    /// the record does not exist.
    pub fn delete(&self, txn: &mut Transaction<'_>, record: RecordId) -> Result<bool> {
        let block = self.owned_block(record)?;
        let mut state = block.slot(record.slot)?.lock();
        let SlotState::Stored(head) = &mut *state else {
            return Ok(false);
        };
        if head.header.can_write(txn.id(), txn.read_ts()) != WriteCheckResult::CanWrite {
            return Ok(false);
        }

        let old = match std::mem::take(&mut *state) {
            SlotState::Stored(v) => v,
            SlotState::Vacant => unreachable!("state checked above"),
        };
        let mut header = VersionHeader::locked(txn.id());
        header.set_deleted(true);
        *state = SlotState::Stored(RecordVersion {
            header,
            image: RowImage::vacant(&self.layout),
            prev: Some(Box::new(old)),
        });
        drop(state);

        txn.record_write(record, WriteKind::Delete);
        Ok(true)
    }

    /// Append visible records to the batch, starting at the cursor, until
    /// the batch fills or the table is exhausted. The cursor ends one past
    /// the last record consumed.
    pub fn scan(
        &self,
        txn: &Transaction<'_>,
        cursor: &mut SlotCursor,
        out: &mut ProjectedColumns,
        size_map: Option<&AttrSizeMap>,
    ) -> Result<()> {
        let blocks: Vec<Arc<Block>> = self.blocks.read().clone();
        while cursor.block_idx < blocks.len() {
            let block = &blocks[cursor.block_idx];
            let allocated = block.allocated();
            while cursor.slot_idx < allocated {
                let state = block.slot(cursor.slot_idx as u32)?.lock();
                if let SlotState::Stored(version) = &*state {
                    if let Some(visible) = version.visible_version(txn.read_ts(), txn.id()) {
                        if out.is_full() {
                            return Ok(());
                        }
                        let row = out.append_row();
                        let mut writer = out.row_mut(row);
                        self.materialize_into(&visible.image, size_map, &mut writer)?;
                    }
                }
                drop(state);
                cursor.slot_idx += 1;
            }
            cursor.block_idx += 1;
            cursor.slot_idx = 0;
        }
        Ok(())
    }

    fn materialize_into<W: RowWriter>(
        &self,
        image: &RowImage,
        size_map: Option<&AttrSizeMap>,
        out: &mut W,
    ) -> Result<()> {
        for pos in 0..out.header().len() {
            let id = out.header()[pos];
            if id == IGNORE_COLUMN_ID {
                out.set_null(pos);
                continue;
            }
            match image.value(&self.layout, id)? {
                None => out.set_null(pos),
                Some(bytes) => {
                    if self.layout.is_varlen(id) {
                        out.set_value(pos, bytes);
                    } else {
                        let width = size_map
                            .and_then(|m| m.get(&id).copied())
                            .unwrap_or(self.layout.attr_size(id))
                            as usize;
                        if width == bytes.len() {
                            out.set_value(pos, bytes);
                        } else {
                            out.set_value(pos, &resize_low_order(bytes, width));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Normalize delta bytes to the column's stored width.
    fn stored_bytes(&self, id: ColumnId, bytes: &[u8]) -> Vec<u8> {
        if self.layout.is_varlen(id) {
            bytes.to_vec()
        } else {
            resize_low_order(bytes, self.layout.slot_width(id))
        }
    }

    fn owned_block(&self, record: RecordId) -> Result<Arc<Block>> {
        let block = self.store.block(record.block)?;
        ensure!(
            block.layout_version() == self.layout_version,
            "record {record:?} belongs to layout version {}, not {}",
            block.layout_version(),
            self.layout_version
        );
        Ok(block)
    }

    fn reserve_slot(&self) -> Result<(Arc<Block>, u32)> {
        {
            let blocks = self.blocks.read();
            if let Some(block) = blocks.last() {
                if let Some(idx) = block.try_reserve() {
                    return Ok((Arc::clone(block), idx));
                }
            }
        }
        let _guard = self.alloc_lock.lock();
        {
            // Another writer may have allocated while we waited.
            let blocks = self.blocks.read();
            if let Some(block) = blocks.last() {
                if let Some(idx) = block.try_reserve() {
                    return Ok((Arc::clone(block), idx));
                }
            }
        }
        let block = self.store.allocate(self.layout_version);
        self.blocks.write().push(Arc::clone(&block));
        let idx = block
            .try_reserve()
            .ok_or_else(|| eyre!("fresh block has no free slots"))?;
        Ok((block, idx))
    }
}
