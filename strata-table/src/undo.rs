//! Undo entries the table registers with a transaction.

use std::sync::Arc;

use strata_transaction::{TxnId, UndoEntry};
use strata_types::RowId;

use crate::table::Table;
use crate::version_chain::chunk_of;
use crate::version_chunk::VersionChunk;

pub(crate) struct AppendUndo {
    table: Arc<Table>,
    row_start: RowId,
    count: u64,
}

impl AppendUndo {
    pub(crate) fn new(table: Arc<Table>, row_start: RowId, count: u64) -> Self {
        Self {
            table,
            row_start,
            count,
        }
    }
}

impl UndoEntry for AppendUndo {
    fn commit(&self, commit_id: TxnId) {
        self.table.commit_append(commit_id, self.row_start, self.count);
    }

    fn rollback(&self) {
        if let Err(err) = self.table.revert_append(self.row_start, self.count) {
            tracing::error!(
                table = %self.table.info().table_name(),
                row_start = self.row_start,
                count = self.count,
                %err,
                "failed to revert append"
            );
        }
    }
}

pub(crate) struct DeleteUndo {
    table: Arc<Table>,
    /// Sorted row ids marked by the delete.
    rows: Vec<RowId>,
}

impl DeleteUndo {
    pub(crate) fn new(table: Arc<Table>, rows: Vec<RowId>) -> Self {
        Self { table, rows }
    }

    fn for_each_chunk(&self, mut f: impl FnMut(&VersionChunk, &[usize])) {
        let chunks = self.table.versions.snapshot();
        for run in self.rows.chunk_by(|a, b| chunk_of(*a) == chunk_of(*b)) {
            if let Some((chunk, _)) = chunks.locate(run[0]) {
                let locals: Vec<usize> = run.iter().map(|&r| (r - chunk.start()) as usize).collect();
                f(chunk, &locals);
            }
        }
    }
}

impl UndoEntry for DeleteUndo {
    fn commit(&self, commit_id: TxnId) {
        self.for_each_chunk(|chunk, locals| chunk.commit_delete(commit_id, locals));
    }

    fn rollback(&self) {
        self.for_each_chunk(|chunk, locals| chunk.rollback_delete(locals));
    }
}
