//! Transactions and MVCC visibility for strata.
//!
//! Every transaction receives a unique id from a range that never overlaps
//! commit timestamps, plus a start timestamp drawn from the same counter that
//! later hands out commit ids. Row versions store either a transaction id
//! (uncommitted) or a commit id, so one comparison decides visibility.
//!
//! # Reserved ids
//!
//! - **[`TXN_ID_PERSISTED`] (0)**: rows loaded from storage, visible to everyone
//! - **[`NOT_DELETED_ID`] (u64::MAX)**: the row has no deleter
//! - **[`TRANSACTION_ID_START`] (2^62) and up**: live transaction ids
//!
//! # Visibility
//!
//! A version stamp `v` is visible to transaction `T` when `v < T.start_time`
//! (committed before `T` began) or `v == T.txn_id` (written by `T` itself).
//! A row is visible when its insert stamp is visible and its delete stamp is not.
//!
//! # Architecture
//!
//! - [`TransactionManager`]: allocates ids and timestamps, commits and rolls back
//! - [`Transaction`]: one live transaction with its undo log
//! - [`UndoEntry`]: commit/rollback hook registered by the storage layer
//! - [`TransactionSnapshot`]: the two numbers a visibility check needs
pub mod mvcc;
pub mod transaction;

pub use mvcc::{
    NOT_DELETED_ID, TRANSACTION_ID_START, TXN_ID_PERSISTED, TransactionManager,
    TransactionSnapshot, TxnId, TxnStatus,
};
pub use transaction::{Transaction, UndoEntry};
