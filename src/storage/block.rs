//! # Blocks and the Block Store
//!
//! A [`Block`] is a fixed array of record slots, tagged with the layout
//! version its rows are physically written under. The tag is how a record
//! id resolves to its tuple version: the id names a block, the block names
//! the version.
//!
//! Slot state is a mutex-guarded version chain per slot; slot allocation
//! within a block is a lock-free atomic cursor. The [`BlockStore`] is the
//! process-wide block directory, shared by every data table of a table and
//! by the transaction layer, which finalizes or undoes slot versions at
//! commit and rollback time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{bail, eyre, Result};
use parking_lot::{Mutex, RwLock};

use crate::mvcc::transaction::{WriteEntry, WriteKind};
use crate::mvcc::version::{VersionHeader, VisibilityResult};
use crate::mvcc::TxnId;
use crate::records::row::RowImage;
use crate::table::LayoutVersion;

pub type BlockId = u32;

/// Record slots per block.
pub const BLOCK_CAPACITY: usize = 256;

/// Opaque handle naming one physical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub block: BlockId,
    pub slot: u32,
}

impl RecordId {
    pub const INVALID: RecordId = RecordId {
        block: u32::MAX,
        slot: u32::MAX,
    };

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// One version of a record, newest first in the chain.
#[derive(Debug, Clone)]
pub struct RecordVersion {
    pub header: VersionHeader,
    pub image: RowImage,
    pub prev: Option<Box<RecordVersion>>,
}

impl RecordVersion {
    /// Walk the chain to the first version `read_ts` can decide on.
    /// `None` means the record does not exist for this reader.
    pub fn visible_version(&self, read_ts: TxnId, reader_id: TxnId) -> Option<&RecordVersion> {
        let mut current = self;
        loop {
            match current.header.visibility(read_ts, reader_id) {
                VisibilityResult::Visible => return Some(current),
                VisibilityResult::Deleted => return None,
                VisibilityResult::Invisible => match &current.prev {
                    Some(prev) => current = prev,
                    None => return None,
                },
            }
        }
    }
}

#[derive(Debug, Default)]
pub enum SlotState {
    #[default]
    Vacant,
    Stored(RecordVersion),
}

pub struct Block {
    id: BlockId,
    layout_version: LayoutVersion,
    slots: Box<[Mutex<SlotState>]>,
    next_free: AtomicU32,
}

impl Block {
    fn new(id: BlockId, layout_version: LayoutVersion) -> Self {
        let slots = (0..BLOCK_CAPACITY)
            .map(|_| Mutex::new(SlotState::Vacant))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            id,
            layout_version,
            slots,
            next_free: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn layout_version(&self) -> LayoutVersion {
        self.layout_version
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots handed out so far; an upper bound for scans.
    pub fn allocated(&self) -> usize {
        (self.next_free.load(Ordering::Acquire) as usize).min(self.slots.len())
    }

    /// Claim the next free slot index, if any remain.
    pub fn try_reserve(&self) -> Option<u32> {
        self.next_free
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.slots.len() as u32).then_some(n + 1)
            })
            .ok()
    }

    pub fn slot(&self, idx: u32) -> Result<&Mutex<SlotState>> {
        self.slots
            .get(idx as usize)
            .ok_or_else(|| eyre!("slot {idx} out of range for block {}", self.id))
    }
}

pub struct BlockStore {
    blocks: RwLock<Vec<Arc<Block>>>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(Vec::new()),
        }
    }

    pub fn allocate(&self, layout_version: LayoutVersion) -> Arc<Block> {
        let mut blocks = self.blocks.write();
        let id = blocks.len() as BlockId;
        let block = Arc::new(Block::new(id, layout_version));
        blocks.push(Arc::clone(&block));
        block
    }

    pub fn block(&self, id: BlockId) -> Result<Arc<Block>> {
        self.blocks
            .read()
            .get(id as usize)
            .cloned()
            .ok_or_else(|| eyre!("unknown block {id}"))
    }

    /// The layout version the record was physically written under.
    pub fn tuple_version(&self, record: RecordId) -> Result<LayoutVersion> {
        Ok(self.block(record.block)?.layout_version())
    }

    /// Stamp the newest version of the slot with its commit timestamp and
    /// release the writer's lock.
    pub(crate) fn finalize_commit(&self, record: RecordId, commit_ts: TxnId) -> Result<()> {
        let block = self.block(record.block)?;
        let mut state = block.slot(record.slot)?.lock();
        match &mut *state {
            SlotState::Stored(version) => {
                version.header.txn_id = commit_ts;
                version.header.set_locked(false);
                Ok(())
            }
            SlotState::Vacant => bail!("commit finalization on vacant slot {record:?}"),
        }
    }

    /// Undo one applied write: vacate an inserted slot, or pop the chain
    /// head an update or delete pushed.
    pub(crate) fn rollback_entry(&self, entry: &WriteEntry) -> Result<()> {
        let block = self.block(entry.slot.block)?;
        let mut state = block.slot(entry.slot.slot)?.lock();
        match entry.kind {
            WriteKind::Insert => {
                *state = SlotState::Vacant;
                Ok(())
            }
            WriteKind::Update | WriteKind::Delete => match &mut *state {
                SlotState::Stored(version) => {
                    let prev = version
                        .prev
                        .take()
                        .ok_or_else(|| eyre!("undo chain empty at {:?}", entry.slot))?;
                    *version = *prev;
                    Ok(())
                }
                SlotState::Vacant => bail!("rollback on vacant slot {:?}", entry.slot),
            },
        }
    }
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new()
    }
}
