//! Id allocation and the visibility predicate.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use strata_result::{Error, Result};

use crate::transaction::Transaction;

/// Transaction id, start timestamp or commit id.
pub type TxnId = u64;

/// Insert stamp of rows that were loaded from storage rather than appended.
pub const TXN_ID_PERSISTED: TxnId = 0;

/// Delete stamp of rows that were never deleted.
pub const NOT_DELETED_ID: TxnId = TxnId::MAX;

/// First id handed to a live transaction. Timestamps stay below this value.
pub const TRANSACTION_ID_START: TxnId = 1 << 62;

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    Committed,
    Aborted,
}

impl TxnStatus {
    pub fn is_active(self) -> bool {
        matches!(self, TxnStatus::Active)
    }
}

/// Values captured when a transaction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSnapshot {
    /// Id stamped onto versions this transaction writes.
    pub txn_id: TxnId,
    /// Versions committed with an id below this value are visible.
    pub start_time: TxnId,
}

impl TransactionSnapshot {
    /// Is a version stamped with `version` visible to this snapshot?
    #[inline]
    pub fn sees(&self, version: TxnId) -> bool {
        version < self.start_time || version == self.txn_id
    }

    /// Visibility of a row given its insert and delete stamps.
    #[inline]
    pub fn row_visible(&self, inserted: TxnId, deleted: TxnId) -> bool {
        let visible = self.sees(inserted) && !self.sees(deleted);
        tracing::trace!(
            inserted,
            deleted,
            txn_id = self.txn_id,
            start_time = self.start_time,
            visible,
            "[MVCC] row_visible"
        );
        visible
    }
}

#[derive(Debug)]
struct ManagerState {
    /// Next start timestamp or commit id.
    current_timestamp: TxnId,
    /// Next transaction id.
    next_txn_id: TxnId,
    /// Start time of every live transaction.
    active: FxHashMap<TxnId, TxnId>,
}

/// Hands out transaction ids and timestamps and drives commit and rollback.
///
/// Commit ids and start timestamps come from one counter under one lock, and
/// a commit applies its undo log before releasing that lock. A transaction
/// that begins after a commit returned therefore sees all of its writes, and
/// one that began before sees none of them.
#[derive(Debug)]
pub struct TransactionManager {
    state: Mutex<ManagerState>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManagerState {
                current_timestamp: 1,
                next_txn_id: TRANSACTION_ID_START,
                active: FxHashMap::default(),
            }),
        }
    }

    /// Start a new transaction.
    pub fn begin(&self) -> Arc<Transaction> {
        let mut state = self.state.lock();
        let start_time = state.current_timestamp;
        state.current_timestamp += 1;
        let txn_id = state.next_txn_id;
        state.next_txn_id += 1;
        state.active.insert(txn_id, start_time);
        drop(state);

        tracing::debug!(txn_id, start_time, "begin transaction");
        Arc::new(Transaction::new(TransactionSnapshot {
            txn_id,
            start_time,
        }))
    }

    /// Commit `txn`, stamping its writes with a fresh commit id.
    pub fn commit(&self, txn: &Transaction) -> Result<TxnId> {
        let mut state = self.state.lock();
        if !txn.status().is_active() {
            return Err(Error::transaction_conflict(format!(
                "transaction {} is no longer active",
                txn.id()
            )));
        }
        let commit_id = state.current_timestamp;
        state.current_timestamp += 1;
        txn.apply_commit(commit_id);
        state.active.remove(&txn.id());
        drop(state);

        tracing::debug!(txn_id = txn.id(), commit_id, "commit transaction");
        Ok(commit_id)
    }

    /// Undo every write of `txn`.
    pub fn rollback(&self, txn: &Transaction) -> Result<()> {
        let mut state = self.state.lock();
        if !txn.status().is_active() {
            return Err(Error::transaction_conflict(format!(
                "transaction {} is no longer active",
                txn.id()
            )));
        }
        txn.apply_rollback();
        state.active.remove(&txn.id());
        drop(state);

        tracing::debug!(txn_id = txn.id(), "rollback transaction");
        Ok(())
    }

    /// Number of transactions that have begun but not finished.
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Smallest start time among live transactions, if any.
    pub fn lowest_active_start(&self) -> Option<TxnId> {
        self.state.lock().active.values().copied().min()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
