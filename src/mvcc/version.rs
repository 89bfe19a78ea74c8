//! # Version Headers and Visibility
//!
//! Every stored record version carries a small header: a flags byte and a
//! transaction id. While a writer holds the version, `LOCK_BIT` is set and
//! the id is the writer's transaction id; once the writer commits, the lock
//! clears and the id becomes the commit timestamp. Tombstones keep their
//! image and set `DELETE_BIT`.
//!
//! ## Visibility (snapshot isolation)
//!
//! A version is decidable for a reader at `read_ts` when it is unlocked
//! with `txn_id <= read_ts`, or locked by the reader itself
//! (read-own-writes). A decidable tombstone means the record is gone;
//! anything else means the reader must walk to an older version.
//!
//! ## Write claims
//!
//! A writer may claim a version when it is unlocked and committed at or
//! before the writer's snapshot, or when the writer already holds the lock.
//! Anything else is a write-write conflict and the operation reports
//! failure instead of blocking.

use super::transaction::TxnId;

pub mod flags {
    pub const LOCK_BIT: u8 = 0b0000_0001;
    pub const DELETE_BIT: u8 = 0b0000_0010;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionHeader {
    pub flags: u8,
    pub txn_id: TxnId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityResult {
    Visible,
    Invisible,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCheckResult {
    CanWrite,
    LockedByOther,
    ConcurrentModification,
}

impl VersionHeader {
    pub fn new(txn_id: TxnId) -> Self {
        Self { flags: 0, txn_id }
    }

    pub fn locked(txn_id: TxnId) -> Self {
        Self {
            flags: flags::LOCK_BIT,
            txn_id,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.flags & flags::LOCK_BIT != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & flags::DELETE_BIT != 0
    }

    pub fn set_locked(&mut self, locked: bool) {
        if locked {
            self.flags |= flags::LOCK_BIT;
        } else {
            self.flags &= !flags::LOCK_BIT;
        }
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        if deleted {
            self.flags |= flags::DELETE_BIT;
        } else {
            self.flags &= !flags::DELETE_BIT;
        }
    }

    pub fn visibility(&self, read_ts: TxnId, reader_id: TxnId) -> VisibilityResult {
        let decidable = if self.is_locked() {
            self.txn_id == reader_id
        } else {
            self.txn_id <= read_ts
        };
        if !decidable {
            return VisibilityResult::Invisible;
        }
        if self.is_deleted() {
            VisibilityResult::Deleted
        } else {
            VisibilityResult::Visible
        }
    }

    pub fn can_write(&self, writer_id: TxnId, writer_read_ts: TxnId) -> WriteCheckResult {
        if self.is_locked() {
            if self.txn_id == writer_id {
                return WriteCheckResult::CanWrite;
            }
            return WriteCheckResult::LockedByOther;
        }
        if self.txn_id > writer_read_ts {
            return WriteCheckResult::ConcurrentModification;
        }
        WriteCheckResult::CanWrite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_version_visible_at_or_after_its_timestamp() {
        let hdr = VersionHeader::new(50);
        assert_eq!(hdr.visibility(50, 99), VisibilityResult::Visible);
        assert_eq!(hdr.visibility(100, 99), VisibilityResult::Visible);
        assert_eq!(hdr.visibility(49, 99), VisibilityResult::Invisible);
    }

    #[test]
    fn locked_version_visible_only_to_owner() {
        let hdr = VersionHeader::locked(70);
        assert_eq!(hdr.visibility(100, 70), VisibilityResult::Visible);
        assert_eq!(hdr.visibility(100, 71), VisibilityResult::Invisible);
    }

    #[test]
    fn tombstone_reports_deleted_when_decidable() {
        let mut hdr = VersionHeader::new(50);
        hdr.set_deleted(true);
        assert_eq!(hdr.visibility(60, 99), VisibilityResult::Deleted);
        assert_eq!(hdr.visibility(40, 99), VisibilityResult::Invisible);
    }

    #[test]
    fn write_claim_respects_locks_and_snapshots() {
        let committed = VersionHeader::new(50);
        assert_eq!(committed.can_write(100, 60), WriteCheckResult::CanWrite);
        assert_eq!(
            committed.can_write(100, 40),
            WriteCheckResult::ConcurrentModification
        );

        let locked = VersionHeader::locked(70);
        assert_eq!(locked.can_write(70, 70), WriteCheckResult::CanWrite);
        assert_eq!(locked.can_write(71, 71), WriteCheckResult::LockedByOther);
    }

    #[test]
    fn flag_set_and_clear() {
        let mut hdr = VersionHeader::new(1);
        assert!(!hdr.is_locked());
        hdr.set_locked(true);
        assert!(hdr.is_locked());
        hdr.set_locked(false);
        assert!(!hdr.is_locked());

        hdr.set_deleted(true);
        assert!(hdr.is_deleted());
        hdr.set_deleted(false);
        assert!(!hdr.is_deleted());
    }
}
