//! A live transaction and its undo log.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::mvcc::{TransactionSnapshot, TxnId, TxnStatus};

/// A write that must be finalized when its transaction ends.
///
/// The storage layer registers one entry per append or delete. On commit the
/// entries run in registration order; on rollback in reverse.
pub trait UndoEntry: Send + Sync {
    /// Replace the transaction id stamps with `commit_id`.
    fn commit(&self, commit_id: TxnId);

    /// Remove every trace of the write.
    fn rollback(&self);
}

/// One transaction, shared by every operation running on its behalf.
pub struct Transaction {
    snapshot: TransactionSnapshot,
    /// 0 until committed.
    commit_id: AtomicU64,
    status: Mutex<TxnStatus>,
    undo: Mutex<Vec<Box<dyn UndoEntry>>>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("txn_id", &self.snapshot.txn_id)
            .field("start_time", &self.snapshot.start_time)
            .field("status", &*self.status.lock())
            .field("undo_entries", &self.undo.lock().len())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(snapshot: TransactionSnapshot) -> Self {
        Self {
            snapshot,
            commit_id: AtomicU64::new(0),
            status: Mutex::new(TxnStatus::Active),
            undo: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub fn id(&self) -> TxnId {
        self.snapshot.txn_id
    }

    #[inline]
    pub fn start_time(&self) -> TxnId {
        self.snapshot.start_time
    }

    #[inline]
    pub fn snapshot(&self) -> TransactionSnapshot {
        self.snapshot
    }

    /// Commit id, once the transaction committed.
    pub fn commit_id(&self) -> Option<TxnId> {
        match self.commit_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn status(&self) -> TxnStatus {
        *self.status.lock()
    }

    /// Register a write to finalize at commit or rollback.
    pub fn push_undo(&self, entry: Box<dyn UndoEntry>) {
        self.undo.lock().push(entry);
    }

    pub fn undo_len(&self) -> usize {
        self.undo.lock().len()
    }

    pub(crate) fn apply_commit(&self, commit_id: TxnId) {
        let entries = std::mem::take(&mut *self.undo.lock());
        for entry in &entries {
            entry.commit(commit_id);
        }
        self.commit_id.store(commit_id, Ordering::Release);
        *self.status.lock() = TxnStatus::Committed;
    }

    pub(crate) fn apply_rollback(&self) {
        let entries = std::mem::take(&mut *self.undo.lock());
        for entry in entries.iter().rev() {
            entry.rollback();
        }
        *self.status.lock() = TxnStatus::Aborted;
    }
}
