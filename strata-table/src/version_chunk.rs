//! Per-row insert/delete stamps for one fixed range of row ids.
//!
//! A chunk covers [`VERSION_CHUNK_SIZE`] rows split into
//! [`VERSION_CHUNK_VECTOR_COUNT`] vectors. Version information is allocated
//! per vector on first write; a vector without information holds persisted
//! rows that every transaction sees. All stamps are atomics so visibility
//! checks never take a lock.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use strata_result::{Error, Result};
use strata_transaction::{NOT_DELETED_ID, TXN_ID_PERSISTED, TransactionSnapshot, TxnId};
use strata_types::{
    RowId, STANDARD_VECTOR_SIZE, SelectionVector, VERSION_CHUNK_SIZE, VERSION_CHUNK_VECTOR_COUNT,
};

struct VectorVersions {
    inserted: Box<[AtomicU64]>,
    deleted: Box<[AtomicU64]>,
    any_deleted: AtomicBool,
}

impl VectorVersions {
    fn new() -> Self {
        Self {
            inserted: (0..STANDARD_VECTOR_SIZE)
                .map(|_| AtomicU64::new(TXN_ID_PERSISTED))
                .collect(),
            deleted: (0..STANDARD_VECTOR_SIZE)
                .map(|_| AtomicU64::new(NOT_DELETED_ID))
                .collect(),
            any_deleted: AtomicBool::new(false),
        }
    }
}

/// Version bookkeeping for rows `[start, start + VERSION_CHUNK_SIZE)`.
pub struct VersionChunk {
    start: RowId,
    vectors: Box<[OnceLock<VectorVersions>]>,
}

impl std::fmt::Debug for VersionChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tracked = self.vectors.iter().filter(|v| v.get().is_some()).count();
        f.debug_struct("VersionChunk")
            .field("start", &self.start)
            .field("tracked_vectors", &tracked)
            .finish()
    }
}

#[inline]
fn split(local: usize) -> (usize, usize) {
    (local / STANDARD_VECTOR_SIZE, local % STANDARD_VECTOR_SIZE)
}

impl VersionChunk {
    pub fn new(start: RowId) -> Self {
        debug_assert!(start % VERSION_CHUNK_SIZE as u64 == 0);
        Self {
            start,
            vectors: (0..VERSION_CHUNK_VECTOR_COUNT)
                .map(|_| OnceLock::new())
                .collect(),
        }
    }

    #[inline]
    pub fn start(&self) -> RowId {
        self.start
    }

    fn versions(&self, vector: usize) -> &VectorVersions {
        self.vectors[vector].get_or_init(VectorVersions::new)
    }

    /// Positions in `[0, max_count)` of vector `vector` visible to `snapshot`.
    pub fn get_sel_vector(
        &self,
        snapshot: &TransactionSnapshot,
        vector: usize,
        max_count: usize,
    ) -> SelectionVector {
        let Some(info) = self.vectors[vector].get() else {
            return SelectionVector::incremental(max_count);
        };
        let mut sel = SelectionVector::with_capacity(max_count);
        let check_deleted = info.any_deleted.load(Ordering::Acquire);
        for idx in 0..max_count {
            let inserted = info.inserted[idx].load(Ordering::Acquire);
            if !snapshot.sees(inserted) {
                continue;
            }
            if check_deleted && snapshot.sees(info.deleted[idx].load(Ordering::Acquire)) {
                continue;
            }
            sel.push(idx as u32);
        }
        sel
    }

    /// Stamp `count` rows starting at chunk-local `local` as inserted by `txn_id`.
    pub fn append(&self, txn_id: TxnId, local: usize, count: usize) {
        for row in local..local + count {
            let (vector, idx) = split(row);
            let info = self.versions(vector);
            info.inserted[idx].store(txn_id, Ordering::Release);
            info.deleted[idx].store(NOT_DELETED_ID, Ordering::Release);
        }
    }

    /// Replace the insert stamps of `count` rows with `commit_id`.
    pub fn commit_append(&self, commit_id: TxnId, local: usize, count: usize) {
        for row in local..local + count {
            let (vector, idx) = split(row);
            self.versions(vector).inserted[idx].store(commit_id, Ordering::Release);
        }
    }

    /// Mark chunk-local `rows` as deleted by `snapshot.txn_id`.
    ///
    /// Returns the rows that were newly marked. Rows this transaction already
    /// deleted are skipped; a row deleted by anybody else is a write-write
    /// conflict, in which case the marks placed by this call are undone.
    pub fn delete(&self, snapshot: &TransactionSnapshot, rows: &[usize]) -> Result<Vec<usize>> {
        let mut marked = Vec::with_capacity(rows.len());
        for &row in rows {
            let (vector, idx) = split(row);
            let info = self.versions(vector);
            match info.deleted[idx].compare_exchange(
                NOT_DELETED_ID,
                snapshot.txn_id,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    info.any_deleted.store(true, Ordering::Release);
                    marked.push(row);
                }
                Err(current) if current == snapshot.txn_id => {}
                Err(current) => {
                    tracing::debug!(
                        row = self.start + row as u64,
                        deleted_by = current,
                        txn_id = snapshot.txn_id,
                        "delete conflict"
                    );
                    self.rollback_delete(&marked);
                    return Err(Error::transaction_conflict("Conflict on tuple deletion!"));
                }
            }
        }
        Ok(marked)
    }

    pub fn commit_delete(&self, commit_id: TxnId, rows: &[usize]) {
        for &row in rows {
            let (vector, idx) = split(row);
            self.versions(vector).deleted[idx].store(commit_id, Ordering::Release);
        }
    }

    pub fn rollback_delete(&self, rows: &[usize]) {
        for &row in rows {
            let (vector, idx) = split(row);
            self.versions(vector).deleted[idx].store(NOT_DELETED_ID, Ordering::Release);
        }
    }

    /// Is chunk-local `row` visible to `snapshot`?
    pub fn fetch(&self, snapshot: &TransactionSnapshot, row: usize) -> bool {
        let (vector, idx) = split(row);
        match self.vectors[vector].get() {
            None => true,
            Some(info) => snapshot.row_visible(
                info.inserted[idx].load(Ordering::Acquire),
                info.deleted[idx].load(Ordering::Acquire),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_transaction::TRANSACTION_ID_START;

    fn snapshot(txn_offset: u64, start_time: u64) -> TransactionSnapshot {
        TransactionSnapshot {
            txn_id: TRANSACTION_ID_START + txn_offset,
            start_time,
        }
    }

    #[test]
    fn untracked_vectors_are_fully_visible() {
        let chunk = VersionChunk::new(0);
        let sel = chunk.get_sel_vector(&snapshot(0, 1), 3, 100);
        assert!(sel.is_incremental(100));
        assert!(chunk.fetch(&snapshot(0, 1), 5000));
    }

    #[test]
    fn uncommitted_rows_only_visible_to_writer() {
        let chunk = VersionChunk::new(0);
        let writer = snapshot(0, 1);
        let reader = snapshot(1, 2);
        chunk.append(writer.txn_id, 0, 10);
        assert_eq!(chunk.get_sel_vector(&writer, 0, 10).len(), 10);
        assert_eq!(chunk.get_sel_vector(&reader, 0, 10).len(), 0);

        chunk.commit_append(3, 0, 10);
        assert_eq!(chunk.get_sel_vector(&reader, 0, 10).len(), 0);
        assert_eq!(chunk.get_sel_vector(&snapshot(2, 4), 0, 10).len(), 10);
    }

    #[test]
    fn delete_conflicts_and_rollback() {
        let chunk = VersionChunk::new(0);
        chunk.append(0, 0, 4);
        let a = snapshot(0, 5);
        let b = snapshot(1, 6);
        assert_eq!(chunk.delete(&a, &[1, 2]).unwrap(), vec![1, 2]);
        // Repeating our own delete is a no-op.
        assert!(chunk.delete(&a, &[1]).unwrap().is_empty());

        let err = chunk.delete(&b, &[0, 2]).unwrap_err();
        assert!(err.is_transaction_conflict());
        // Row 0 was released again by the failed call.
        assert!(chunk.fetch(&b, 0));
        assert_eq!(chunk.delete(&b, &[0]).unwrap(), vec![0]);

        chunk.rollback_delete(&[1, 2]);
        assert!(chunk.fetch(&b, 1));
        assert!(!chunk.fetch(&b, 0));
    }
}
