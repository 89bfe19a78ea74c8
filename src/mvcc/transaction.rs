//! # Transactions
//!
//! One atomic sequence generates both snapshot timestamps (handed out by
//! `begin`) and commit timestamps (allocated at commit), so snapshots and
//! commits order against each other without coordination. Live snapshots
//! are tracked in an ordered set; its minimum is republished to a cached
//! watermark whenever a transaction starts or retires:
//!
//! ```text
//! ts sequence ──> begin: sts ──> active_sts {sts₁ < sts₂ < ...}
//!                                    │ insert / remove
//!                                    ▼
//!                          min_active_sts (watermark)
//! ```
//!
//! Record versions older than the watermark are invisible to every live
//! snapshot and safe to reclaim.
//!
//! ## Redo buffer
//!
//! Writes are staged before they are applied: `stage_write` / `stage_delete`
//! push a [`RedoRecord`], and the table operation consumes the *last* staged
//! record. Insert and update write the resulting record id back into the
//! staged record, so the post-operation location is always known to the log
//! stream even when the caller does not ask for it.
//!
//! ## Must-abort
//!
//! When a table operation reports a write conflict, the transaction is
//! marked must-abort: the version chains it touched may reference its
//! in-flight versions, and only a rollback unwinds them correctly. Commit
//! refuses a must-abort transaction and rolls it back instead.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, eyre, Result};
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::records::projection::ProjectedRow;
use crate::storage::block::{BlockStore, RecordId};

pub type TxnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnState {
    #[default]
    Active,
    Committed,
    Aborted,
}

pub struct TransactionManager {
    /// Sequence shared by snapshot and commit timestamps.
    ts: AtomicU64,
    /// Snapshot timestamps of live transactions, oldest first.
    active_sts: Mutex<BTreeSet<TxnId>>,
    /// Cached minimum of `active_sts`; the next unissued timestamp while no
    /// transaction is live. Republished on every begin and retire.
    min_active_sts: AtomicU64,
    store: Arc<BlockStore>,
}

impl TransactionManager {
    pub fn new(store: Arc<BlockStore>) -> Self {
        Self {
            ts: AtomicU64::new(1),
            active_sts: Mutex::new(BTreeSet::new()),
            min_active_sts: AtomicU64::new(1),
            store,
        }
    }

    /// Start a transaction at a fresh snapshot timestamp.
    pub fn begin(&self) -> Transaction<'_> {
        let sts = self.ts.fetch_add(1, Ordering::SeqCst);
        let mut active = self.active_sts.lock();
        active.insert(sts);
        self.publish_watermark(&active);
        drop(active);
        Transaction::new(self, sts)
    }

    /// Oldest snapshot any live transaction may still read at. Record
    /// versions older than this are out of every snapshot's reach and
    /// reclaimable.
    pub fn watermark(&self) -> TxnId {
        self.min_active_sts.load(Ordering::Acquire)
    }

    fn allocate_commit_ts(&self) -> TxnId {
        self.ts.fetch_add(1, Ordering::SeqCst)
    }

    /// Drop a transaction's snapshot from the active set and advance the
    /// watermark past it if it was the oldest.
    fn retire(&self, sts: TxnId) {
        let mut active = self.active_sts.lock();
        active.remove(&sts);
        self.publish_watermark(&active);
    }

    fn publish_watermark(&self, active: &BTreeSet<TxnId>) {
        let min = active
            .first()
            .copied()
            .unwrap_or_else(|| self.ts.load(Ordering::Relaxed));
        self.min_active_sts.store(min, Ordering::Release);
    }
}

/// A staged write, the after-image of the operation being applied.
#[derive(Debug)]
pub enum RedoRecord {
    Write {
        slot: RecordId,
        delta: ProjectedRow,
    },
    Delete {
        slot: RecordId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

/// One applied write, for commit finalization and rollback undo.
#[derive(Debug, Clone, Copy)]
pub struct WriteEntry {
    pub slot: RecordId,
    pub kind: WriteKind,
}

pub struct Transaction<'a> {
    id: TxnId,
    state: TxnState,
    manager: &'a TransactionManager,
    store: Arc<BlockStore>,
    redo: Vec<RedoRecord>,
    write_entries: SmallVec<[WriteEntry; 16]>,
    must_abort: bool,
    finished: bool,
}

impl<'a> Transaction<'a> {
    fn new(manager: &'a TransactionManager, id: TxnId) -> Self {
        Self {
            id,
            state: TxnState::Active,
            manager,
            store: Arc::clone(&manager.store),
            redo: Vec::new(),
            write_entries: SmallVec::new(),
            must_abort: false,
            finished: false,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Snapshot timestamp; equal to the transaction id.
    pub fn read_ts(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn must_abort(&self) -> bool {
        self.must_abort
    }

    pub fn set_must_abort(&mut self) {
        self.must_abort = true;
    }

    /// Stage an insert or update. For an insert the slot must be
    /// [`RecordId::INVALID`]; for an update it names the intended record.
    pub fn stage_write(&mut self, slot: RecordId, delta: ProjectedRow) {
        self.redo.push(RedoRecord::Write { slot, delta });
    }

    pub fn stage_delete(&mut self, slot: RecordId) {
        self.redo.push(RedoRecord::Delete { slot });
    }

    pub fn last_redo(&self) -> Option<&RedoRecord> {
        self.redo.last()
    }

    pub fn redo_records(&self) -> &[RedoRecord] {
        &self.redo
    }

    pub fn write_entries(&self) -> &[WriteEntry] {
        &self.write_entries
    }

    /// Take the staged write out of the redo buffer for the duration of the
    /// operation; [`Transaction::restage`] puts it back with its final slot.
    pub(crate) fn take_staged_write(&mut self) -> Result<(RecordId, ProjectedRow)> {
        match self.redo.pop() {
            Some(RedoRecord::Write { slot, delta }) => Ok((slot, delta)),
            Some(other) => {
                self.redo.push(other);
                bail!("last staged record is not a write")
            }
            None => bail!("no staged write; stage_write must be called first"),
        }
    }

    pub(crate) fn restage(&mut self, slot: RecordId, delta: ProjectedRow) {
        self.redo.push(RedoRecord::Write { slot, delta });
    }

    pub(crate) fn record_write(&mut self, slot: RecordId, kind: WriteKind) {
        self.write_entries.push(WriteEntry { slot, kind });
    }

    /// Finalize every applied write with a fresh commit timestamp. A
    /// must-abort transaction cannot commit; its writes are rolled back and
    /// an error is returned.
    pub fn commit(mut self) -> Result<TxnId> {
        if self.must_abort {
            let id = self.id;
            self.rollback_in_place()?;
            bail!("transaction {id} was marked must-abort; rolled back instead of committing");
        }
        let commit_ts = self.manager.allocate_commit_ts();
        for entry in &self.write_entries {
            self.store.finalize_commit(entry.slot, commit_ts)?;
        }
        self.manager.retire(self.id);
        self.state = TxnState::Committed;
        self.finished = true;
        Ok(commit_ts)
    }

    /// Undo every applied write, newest first.
    pub fn rollback(mut self) -> Result<()> {
        self.rollback_in_place()
    }

    fn rollback_in_place(&mut self) -> Result<()> {
        for entry in std::mem::take(&mut self.write_entries).iter().rev() {
            self.store.rollback_entry(entry)?;
        }
        self.manager.retire(self.id);
        self.state = TxnState::Aborted;
        self.finished = true;
        Ok(())
    }

    /// The record id the last staged write ended up at.
    pub fn last_write_slot(&self) -> Result<RecordId> {
        match self.redo.last() {
            Some(RedoRecord::Write { slot, .. }) | Some(RedoRecord::Delete { slot }) => Ok(*slot),
            None => Err(eyre!("redo buffer is empty")),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.manager.retire(self.id);
        }
    }
}
