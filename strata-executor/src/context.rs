use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use strata_transaction::Transaction;

/// Client-side switch that stops running queries.
///
/// Once set it stays set until [`InterruptHandle::reset`] is called; every
/// query started by the owning executor in the meantime fails with
/// `Error::Interrupted`.
#[derive(Clone, Debug, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Per-query state visible to sources, operators and sinks.
#[derive(Clone)]
pub struct ExecutionContext {
    txn: Arc<Transaction>,
    interrupt: InterruptHandle,
}

impl ExecutionContext {
    pub fn new(txn: Arc<Transaction>, interrupt: InterruptHandle) -> Self {
        Self { txn, interrupt }
    }

    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.txn
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }
}
