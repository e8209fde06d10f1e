//! The ordered chain of [`VersionChunk`]s covering `[0, total_rows)`.
//!
//! Structural changes (growing or truncating the chain) go through
//! [`VersionChainGuard`], the only handle that can reach the chunk list
//! mutably. Scans take a [`ChunkSnapshot`] once and then read stamps without
//! locking.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use strata_transaction::TxnId;
use strata_types::{RowId, VERSION_CHUNK_SIZE};

use crate::version_chunk::VersionChunk;

#[inline]
pub(crate) fn chunk_of(row: RowId) -> u64 {
    row / VERSION_CHUNK_SIZE as u64
}

#[inline]
fn chunk_index(row: RowId) -> usize {
    chunk_of(row) as usize
}

#[inline]
fn chunk_local(row: RowId) -> usize {
    (row % VERSION_CHUNK_SIZE as u64) as usize
}

/// Split `[row_start, row_start + count)` into per-chunk `(chunk, local, len)` runs.
pub(crate) fn chunk_runs(row_start: RowId, count: u64) -> impl Iterator<Item = (usize, usize, usize)> {
    let end = row_start + count;
    let mut row = row_start;
    std::iter::from_fn(move || {
        if row >= end {
            return None;
        }
        let local = chunk_local(row);
        let len = ((VERSION_CHUNK_SIZE - local) as u64).min(end - row) as usize;
        let run = (chunk_index(row), local, len);
        row += len as u64;
        Some(run)
    })
}

#[derive(Debug, Default)]
pub struct VersionChain {
    chunks: Mutex<Vec<Arc<VersionChunk>>>,
}

impl VersionChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain covering `rows` persisted rows, all visible to everybody.
    pub fn with_persisted_rows(rows: u64) -> Self {
        let chain = Self::new();
        chain.lock().ensure_rows(rows);
        chain
    }

    /// Exclusive access for structural changes.
    pub fn lock(&self) -> VersionChainGuard<'_> {
        VersionChainGuard {
            chunks: self.chunks.lock(),
        }
    }

    /// Stable view of the current chunks.
    pub fn snapshot(&self) -> ChunkSnapshot {
        self.lock().snapshot()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }
}

/// Scoped exclusive handle on the chunk list.
pub struct VersionChainGuard<'a> {
    chunks: MutexGuard<'a, Vec<Arc<VersionChunk>>>,
}

impl VersionChainGuard<'_> {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn snapshot(&self) -> ChunkSnapshot {
        ChunkSnapshot {
            chunks: self.chunks.clone(),
        }
    }

    pub fn chunk_for(&self, row: RowId) -> Option<&Arc<VersionChunk>> {
        self.chunks.get(chunk_index(row))
    }

    /// Grow the chain until it covers `rows` rows.
    fn ensure_rows(&mut self, rows: u64) {
        let needed = rows.div_ceil(VERSION_CHUNK_SIZE as u64) as usize;
        while self.chunks.len() < needed {
            let start = (self.chunks.len() * VERSION_CHUNK_SIZE) as u64;
            self.chunks.push(Arc::new(VersionChunk::new(start)));
        }
    }

    /// Stamp `count` rows from `row_start` as inserted by `txn_id`, appending
    /// chunks when the tail cannot hold them.
    pub fn append(&mut self, txn_id: TxnId, row_start: RowId, count: u64) {
        self.ensure_rows(row_start + count);
        for (chunk, local, len) in chunk_runs(row_start, count) {
            self.chunks[chunk].append(txn_id, local, len);
        }
    }

    /// Drop every chunk that starts at or after `total_rows`.
    pub fn truncate(&mut self, total_rows: u64) {
        let keep = total_rows.div_ceil(VERSION_CHUNK_SIZE as u64) as usize;
        self.chunks.truncate(keep);
    }
}

/// Chunk list captured at one point in time.
#[derive(Debug, Clone, Default)]
pub struct ChunkSnapshot {
    chunks: Vec<Arc<VersionChunk>>,
}

impl ChunkSnapshot {
    /// Chunk holding `row` and the row's offset inside it.
    #[inline]
    pub fn locate(&self, row: RowId) -> Option<(&VersionChunk, usize)> {
        self.chunks
            .get(chunk_index(row))
            .map(|chunk| (chunk.as_ref(), chunk_local(row)))
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn commit_append(&self, commit_id: TxnId, row_start: RowId, count: u64) {
        for (chunk, local, len) in chunk_runs(row_start, count) {
            if let Some(chunk) = self.chunks.get(chunk) {
                chunk.commit_append(commit_id, local, len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_split_on_chunk_boundaries() {
        let start = VERSION_CHUNK_SIZE as u64 - 10;
        let runs: Vec<_> = chunk_runs(start, 30).collect();
        assert_eq!(runs, vec![(0, VERSION_CHUNK_SIZE - 10, 10), (1, 0, 20)]);
        assert_eq!(chunk_runs(5, 0).count(), 0);
    }

    #[test]
    fn append_grows_and_truncate_shrinks() {
        let chain = VersionChain::new();
        let mut guard = chain.lock();
        guard.append(7, 0, VERSION_CHUNK_SIZE as u64 + 1);
        assert_eq!(guard.len(), 2);
        guard.truncate(VERSION_CHUNK_SIZE as u64);
        assert_eq!(guard.len(), 1);
        guard.truncate(0);
        assert!(guard.is_empty());
    }

    #[test]
    fn persisted_chain_covers_rows() {
        let chain = VersionChain::with_persisted_rows(1);
        assert_eq!(chain.chunk_count(), 1);
        let snapshot = chain.snapshot();
        let (chunk, local) = snapshot.locate(0).unwrap();
        assert_eq!((chunk.start(), local), (0, 0));
        assert!(snapshot.locate(VERSION_CHUNK_SIZE as u64).is_none());
    }
}
