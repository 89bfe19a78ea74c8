//! # Multi-Version Concurrency Control
//!
//! Snapshot isolation over in-memory record slots. Writers take row-level
//! locks stored in version headers; readers never block, they walk version
//! chains to the first version their snapshot can decide on.
//!
//! ```text
//!  slot (newest version)              older versions
//! +---------------------+    prev   +------------------+
//! | VersionHeader       | ────────> | VersionHeader    | ──> ...
//! |   flags, txn_id     |           |   flags, txn_id  |
//! | RowImage            |           | RowImage         |
//! +---------------------+           +------------------+
//! ```
//!
//! Conflict handling is abort-based: a writer that loses a write-write race
//! reports failure, the owning transaction is marked must-abort, and its
//! rollback pops the chain entries it pushed.

pub mod transaction;
pub mod version;

pub use transaction::{
    RedoRecord, Transaction, TransactionManager, TxnId, TxnState, WriteEntry, WriteKind,
};
pub use version::{VersionHeader, VisibilityResult, WriteCheckResult};
