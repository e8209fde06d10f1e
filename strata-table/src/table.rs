//! The table: column stores, the shared version chain and secondary indexes.
//!
//! Row ids are assigned in append order under the append lock. Versions are
//! stamped and the chain extended before `total_rows` is published, so a
//! scan that observes a row count always finds version information for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use arrow::array::{ArrayRef, RecordBatch, UInt64Array};
use parking_lot::{Mutex, MutexGuard, RwLock};
use strata_column_map::{ColumnScanState, ColumnStore};
use strata_result::{Error, Result};
use strata_transaction::{Transaction, TxnId};
use strata_types::{ColumnId, RowId, STANDARD_VECTOR_SIZE, is_row_id_column};

use crate::catalog::{BoundConstraint, TableDefinition};
use crate::config::StorageConfig;
use crate::constraints;
use crate::index::{Index, IndexLock};
use crate::undo::{AppendUndo, DeleteUndo};
use crate::version_chain::{VersionChain, VersionChainGuard, chunk_of};

const VECTOR: u64 = STANDARD_VECTOR_SIZE as u64;

/// State shared by every instance of one logical table.
#[derive(Debug)]
pub struct DataTableInfo {
    schema_name: String,
    table_name: String,
    indexes: RwLock<Vec<Arc<Index>>>,
    /// Committed row count.
    cardinality: AtomicU64,
}

impl DataTableInfo {
    fn new(schema_name: String, table_name: String, cardinality: u64) -> Self {
        Self {
            schema_name,
            table_name,
            indexes: RwLock::new(Vec::new()),
            cardinality: AtomicU64::new(cardinality),
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Current index list.
    pub fn indexes(&self) -> Vec<Arc<Index>> {
        self.indexes.read().clone()
    }

    pub fn cardinality(&self) -> u64 {
        self.cardinality.load(Ordering::Acquire)
    }
}

/// Whether an instance may still accept writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TableState {
    Active = 0,
    /// A schema change produced a newer instance.
    Superseded = 1,
}

#[derive(Debug)]
pub(crate) struct TableStateCell(AtomicU8);

impl TableStateCell {
    fn new() -> Self {
        Self(AtomicU8::new(TableState::Active as u8))
    }

    pub(crate) fn get(&self) -> TableState {
        match self.0.load(Ordering::Acquire) {
            0 => TableState::Active,
            _ => TableState::Superseded,
        }
    }

    pub(crate) fn supersede(&self) {
        self.0.store(TableState::Superseded as u8, Ordering::Release);
    }
}

/// Row cursor guarded by the append lock.
#[derive(Debug)]
pub(crate) struct AppendCursor {
    pub(crate) total_rows: u64,
}

/// Locks and reservation held for the duration of one append.
pub struct TableAppendState<'a> {
    cursor: MutexGuard<'a, AppendCursor>,
    index_locks: Vec<IndexLock<'a>>,
    pub row_start: RowId,
    pub count: usize,
}

/// One instance of a table.
#[derive(Debug)]
pub struct Table {
    pub(crate) info: Arc<DataTableInfo>,
    pub(crate) definition: Arc<TableDefinition>,
    pub(crate) config: StorageConfig,
    pub(crate) columns: Vec<Arc<ColumnStore>>,
    pub(crate) versions: Arc<VersionChain>,
    pub(crate) state: TableStateCell,
    pub(crate) append_lock: Mutex<AppendCursor>,
    total_rows: AtomicU64,
}

impl Table {
    /// Create an empty table.
    pub fn new(definition: TableDefinition, config: StorageConfig) -> Result<Arc<Self>> {
        let columns = definition
            .columns
            .iter()
            .enumerate()
            .map(|(id, c)| Ok(Arc::new(ColumnStore::new(id, c.data_type.clone(), config.segment_vectors)?)))
            .collect::<Result<Vec<_>>>()?;
        Self::build(definition, config, columns, Arc::new(VersionChain::new()), 0)
    }

    /// Create a table over previously persisted column data, one list of
    /// arrays per column. Every column must hold the same number of rows.
    pub fn with_persisted(
        definition: TableDefinition,
        config: StorageConfig,
        persisted: Vec<Vec<ArrayRef>>,
    ) -> Result<Arc<Self>> {
        if persisted.len() != definition.column_count() {
            return Err(Error::CatalogError(format!(
                "table {} has {} columns but persisted data for {} was supplied",
                definition.table_name,
                definition.column_count(),
                persisted.len()
            )));
        }
        let columns = definition
            .columns
            .iter()
            .zip(&persisted)
            .enumerate()
            .map(|(id, (c, arrays))| {
                ColumnStore::with_persisted(id, c.data_type.clone(), config.segment_vectors, arrays)
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;
        let rows = columns.first().map_or(0, |c| c.row_count());
        if let Some((bad, column)) = columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.row_count() != rows)
        {
            return Err(Error::CatalogError(format!(
                "column length mismatch in table {}: column {} has {} rows, expected {rows}",
                definition.table_name,
                definition.columns[bad].name,
                column.row_count()
            )));
        }
        tracing::debug!(table = %definition.table_name, rows, "loaded persisted table");
        Self::build(
            definition,
            config,
            columns,
            Arc::new(VersionChain::with_persisted_rows(rows)),
            rows,
        )
    }

    fn build(
        definition: TableDefinition,
        config: StorageConfig,
        columns: Vec<Arc<ColumnStore>>,
        versions: Arc<VersionChain>,
        rows: u64,
    ) -> Result<Arc<Self>> {
        definition.validate()?;
        let info = Arc::new(DataTableInfo::new(
            definition.schema_name.clone(),
            definition.table_name.clone(),
            rows,
        ));
        let table = Arc::new(Self {
            info,
            definition: Arc::new(definition),
            config,
            columns,
            versions,
            state: TableStateCell::new(),
            append_lock: Mutex::new(AppendCursor { total_rows: rows }),
            total_rows: AtomicU64::new(rows),
        });
        for constraint in &table.definition.constraints {
            if let BoundConstraint::Unique {
                columns,
                is_primary_key,
            } = constraint
            {
                let kind = if *is_primary_key { "pk" } else { "unique" };
                let name = format!("{}_{kind}_{}", table.info.table_name, table.info.indexes.read().len());
                table.create_index(name, columns.clone(), true)?;
            }
        }
        Ok(table)
    }

    /// Instance derived from `parent` by a schema change. Shares the version
    /// chain and table info; `columns` reuse the parent's stores where the
    /// column did not change.
    pub(crate) fn derived(
        parent: &Table,
        definition: TableDefinition,
        columns: Vec<Arc<ColumnStore>>,
        total_rows: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            info: Arc::clone(&parent.info),
            definition: Arc::new(definition),
            config: parent.config.clone(),
            columns,
            versions: Arc::clone(&parent.versions),
            state: TableStateCell::new(),
            append_lock: Mutex::new(AppendCursor { total_rows }),
            total_rows: AtomicU64::new(total_rows),
        })
    }

    pub fn info(&self) -> &Arc<DataTableInfo> {
        &self.info
    }

    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn state(&self) -> TableState {
        self.state.get()
    }

    pub fn is_root(&self) -> bool {
        self.state() == TableState::Active
    }

    /// Upper bound of assigned row ids, including uncommitted rows.
    pub fn total_rows(&self) -> u64 {
        self.total_rows.load(Ordering::Acquire)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, column_id: ColumnId) -> Result<&Arc<ColumnStore>> {
        self.columns.get(column_id).ok_or_else(|| {
            Error::CatalogError(format!(
                "table {} has no column with id {column_id}",
                self.info.table_name
            ))
        })
    }

    pub fn version_chunk_count(&self) -> usize {
        self.versions.chunk_count()
    }

    fn publish_total_rows(&self, cursor: &mut AppendCursor, total_rows: u64) {
        cursor.total_rows = total_rows;
        self.total_rows.store(total_rows, Ordering::Release);
    }

    pub(crate) fn ensure_active(&self, action: &str) -> Result<()> {
        if self.is_root() {
            Ok(())
        } else {
            Err(Error::transaction_conflict(format!(
                "Transaction conflict: {action} a table that has been altered!"
            )))
        }
    }

    fn check_batch_shape(&self, batch: &RecordBatch) -> Result<()> {
        if batch.num_columns() != self.columns.len() {
            return Err(Error::CatalogError(format!(
                "table {} has {} columns but {} values were supplied",
                self.info.table_name,
                self.columns.len(),
                batch.num_columns()
            )));
        }
        let named = self.definition.columns.iter().zip(&self.columns);
        for ((definition, column), array) in named.zip(batch.columns()) {
            if array.data_type() != column.data_type() {
                return Err(Error::CatalogError(format!(
                    "column {} of table {} expects {:?}, got {:?}",
                    definition.name,
                    self.info.table_name,
                    column.data_type(),
                    array.data_type()
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Append
    // ------------------------------------------------------------------

    /// Append `batch` on behalf of `txn`.
    ///
    /// NOT NULL and CHECK constraints are evaluated before any lock is taken.
    /// Uniqueness is enforced by the index inserts, which run under the
    /// append lock against the index list read under that same lock. The
    /// rows stay invisible to other transactions until `txn` commits; a
    /// rollback reverts them.
    pub fn append(self: &Arc<Self>, txn: &Transaction, batch: &RecordBatch) -> Result<()> {
        self.check_batch_shape(batch)?;
        if batch.num_rows() == 0 {
            return Ok(());
        }
        constraints::verify_append(&self.definition, batch)?;

        let mut indexes = Vec::new();
        let mut state = self.initialize_append(txn, &mut indexes, batch.num_rows())?;
        if let Err(err) = self.append_to_indexes(&mut state, batch) {
            self.revert_append_internal(&mut state.cursor, state.row_start, state.count as u64);
            return Err(err);
        }
        if let Err(err) = self.append_columns(&state, batch) {
            let (row_start, count) = (state.row_start, state.count);
            self.remove_keys_locked(&mut state.index_locks, batch, row_start)?;
            self.revert_append_internal(&mut state.cursor, row_start, count as u64);
            return Err(err);
        }
        let (row_start, count) = (state.row_start, state.count as u64);
        drop(state);

        txn.push_undo(Box::new(AppendUndo::new(Arc::clone(self), row_start, count)));
        Ok(())
    }

    /// Take the append lock, load the table's index list into `indexes` and
    /// lock every index, then reserve `count` row ids stamped with `txn`'s id.
    ///
    /// The list is read while the append lock is held, so an index created
    /// concurrently is either part of this append or backfilled after it.
    pub fn initialize_append<'a>(
        &'a self,
        txn: &Transaction,
        indexes: &'a mut Vec<Arc<Index>>,
        count: usize,
    ) -> Result<TableAppendState<'a>> {
        let mut cursor = self.append_lock.lock();
        self.ensure_active("adding entries to")?;
        *indexes = self.info.indexes();
        let indexes: &'a [Arc<Index>] = indexes;
        let index_locks = indexes.iter().map(|i| i.lock()).collect();

        let row_start = cursor.total_rows;
        self.versions.lock().append(txn.id(), row_start, count as u64);
        self.publish_total_rows(&mut cursor, row_start + count as u64);
        tracing::trace!(
            table = %self.info.table_name,
            txn_id = txn.id(),
            row_start,
            count,
            "reserved rows"
        );
        Ok(TableAppendState {
            cursor,
            index_locks,
            row_start,
            count,
        })
    }

    /// Insert the batch's keys into every index. Unique indexes are checked
    /// first so a duplicate is reported before any index changes; on any
    /// other failure, keys already added to earlier indexes are removed again.
    pub fn append_to_indexes(&self, state: &mut TableAppendState<'_>, batch: &RecordBatch) -> Result<()> {
        for lock in state.index_locks.iter().filter(|l| l.index().is_unique()) {
            lock.verify_append(&project(batch, lock.index().column_ids()))?;
        }
        let row_ids: Vec<RowId> = (state.row_start..state.row_start + state.count as u64).collect();
        for i in 0..state.index_locks.len() {
            let keys = project(batch, state.index_locks[i].index().column_ids());
            if let Err(err) = state.index_locks[i].insert(&keys, &row_ids) {
                for lock in &mut state.index_locks[..i] {
                    let keys = project(batch, lock.index().column_ids());
                    lock.delete(&keys, &row_ids)?;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn remove_keys_locked(
        &self,
        locks: &mut [IndexLock<'_>],
        batch: &RecordBatch,
        row_start: RowId,
    ) -> Result<()> {
        let row_ids: Vec<RowId> = (row_start..row_start + batch.num_rows() as u64).collect();
        for lock in locks {
            let keys = project(batch, lock.index().column_ids());
            lock.delete(&keys, &row_ids)?;
        }
        Ok(())
    }

    /// Write the batch into the column stores at the reserved position.
    fn append_columns(&self, state: &TableAppendState<'_>, batch: &RecordBatch) -> Result<()> {
        for (column, array) in self.columns.iter().zip(batch.columns()) {
            if column.row_count() != state.row_start {
                return Err(Error::Internal(format!(
                    "column {} holds {} rows but the append starts at {}",
                    column.column_id(),
                    column.row_count(),
                    state.row_start
                )));
            }
            column.append(array.as_ref())?;
        }
        Ok(())
    }

    /// Make `count` rows from `row_start` permanent under `commit_id`.
    pub fn commit_append(&self, commit_id: TxnId, row_start: RowId, count: u64) {
        let _cursor = self.append_lock.lock();
        self.versions.snapshot().commit_append(commit_id, row_start, count);
        self.info.cardinality.fetch_add(count, Ordering::AcqRel);
        tracing::trace!(table = %self.info.table_name, commit_id, row_start, count, "committed append");
    }

    /// Undo an uncommitted append.
    ///
    /// Only the most recent append can be reverted: if rows were appended
    /// after `[row_start, row_start + count)` this is a no-op and the reverted
    /// rows stay in place, never visible to anybody. Row ids are never reused
    /// while later rows exist.
    pub fn revert_append(&self, row_start: RowId, count: u64) -> Result<()> {
        let mut cursor = self.append_lock.lock();
        if cursor.total_rows != row_start + count {
            if cursor.total_rows > row_start + count {
                tracing::warn!(
                    table = %self.info.table_name,
                    row_start,
                    count,
                    total_rows = cursor.total_rows,
                    "append interleaved with a later one; leaving rows in place"
                );
            }
            return Ok(());
        }
        let indexed = self.indexed_columns();
        if !indexed.is_empty() {
            self.scan_table_segment(row_start, count, &indexed, |batch, row_ids| {
                self.remove_keys(batch, row_ids)
            })?;
        }
        if !self.is_root() {
            // The stores are shared with a newer instance that already counts
            // these rows.
            tracing::warn!(
                table = %self.info.table_name,
                row_start,
                count,
                "table was altered; leaving reverted rows in place"
            );
            return Ok(());
        }
        self.revert_append_internal(&mut cursor, row_start, count);
        Ok(())
    }

    fn revert_append_internal(&self, cursor: &mut AppendCursor, row_start: RowId, count: u64) {
        if cursor.total_rows != row_start + count {
            return;
        }
        for column in &self.columns {
            column.revert_append(row_start);
        }
        self.versions.lock().truncate(row_start);
        self.publish_total_rows(cursor, row_start);
        self.info.cardinality.fetch_min(row_start, Ordering::AcqRel);
        tracing::debug!(table = %self.info.table_name, row_start, count, "reverted append");
    }

    // ------------------------------------------------------------------
    // Indexes
    // ------------------------------------------------------------------

    /// Columns used by any index, ascending.
    fn indexed_columns(&self) -> Vec<ColumnId> {
        let mut columns: Vec<ColumnId> = self
            .info
            .indexes
            .read()
            .iter()
            .flat_map(|i| i.column_ids().to_vec())
            .collect();
        columns.sort_unstable();
        columns.dedup();
        columns
    }

    /// Delete the keys of `row_ids` from every index. `batch` holds the
    /// columns returned by [`Self::indexed_columns`], in that order.
    fn remove_keys(&self, batch: &RecordBatch, row_ids: &[RowId]) -> Result<()> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        let indexed = self.indexed_columns();
        for index in self.info.indexes.read().iter() {
            let keys = index
                .column_ids()
                .iter()
                .map(|c| {
                    let pos = indexed.iter().position(|i| i == c).ok_or_else(|| {
                        Error::Internal(format!("index column {c} missing from scan"))
                    })?;
                    Ok(Arc::clone(batch.column(pos)))
                })
                .collect::<Result<Vec<_>>>()?;
            index.lock().delete(&keys, row_ids)?;
        }
        Ok(())
    }

    /// Remove `row_ids` from every index.
    pub fn remove_from_indexes(&self, row_ids: &[RowId]) -> Result<()> {
        let indexed = self.indexed_columns();
        if indexed.is_empty() || row_ids.is_empty() {
            return Ok(());
        }
        let arrays = indexed
            .iter()
            .map(|&c| self.columns[c].fetch_rows(row_ids))
            .collect::<Result<Vec<_>>>()?;
        let schema = self.definition.projected_schema(&indexed)?;
        let batch = RecordBatch::try_new(schema, arrays)?;
        self.remove_keys(&batch, row_ids)
    }

    /// Build a new index over the existing rows and register it.
    ///
    /// Appends and deletes are excluded for the duration of the backfill.
    /// Every stored row is indexed, including deleted ones.
    pub fn create_index(
        &self,
        name: impl Into<String>,
        column_ids: Vec<ColumnId>,
        unique: bool,
    ) -> Result<Arc<Index>> {
        if column_ids.is_empty() {
            return Err(Error::InvalidArgumentError("an index needs at least one column".into()));
        }
        for &c in &column_ids {
            self.column(c)?;
        }
        let index = Arc::new(Index::new(name, column_ids, unique));
        let cursor = self.append_lock.lock();
        let _chain = self.versions.lock();
        self.ensure_active("cannot add an index to")?;
        {
            let mut lock = index.lock();
            self.scan_table_segment(0, cursor.total_rows, index.column_ids(), |batch, row_ids| {
                lock.insert(batch.columns(), row_ids).map_err(|err| {
                    if err.is_constraint() {
                        Error::constraint(
                            "Cant create unique index, table contains duplicate data on indexed column(s)",
                        )
                    } else {
                        err
                    }
                })
            })?;
        }
        self.info.indexes.write().push(Arc::clone(&index));
        tracing::debug!(
            table = %self.info.table_name,
            index = index.name(),
            rows = index.len(),
            "created index"
        );
        Ok(index)
    }

    /// Read raw rows `[row_start, row_start + count)` of `column_ids` in
    /// vector-sized batches, ignoring visibility.
    pub fn scan_table_segment<F>(
        &self,
        row_start: RowId,
        count: u64,
        column_ids: &[ColumnId],
        mut f: F,
    ) -> Result<()>
    where
        F: FnMut(&RecordBatch, &[RowId]) -> Result<()>,
    {
        if count == 0 {
            return Ok(());
        }
        let end = row_start + count;
        let schema = self.definition.projected_schema(column_ids)?;
        let mut window = row_start - row_start % VECTOR;
        let mut scans: Vec<ColumnScanState> = column_ids
            .iter()
            .map(|_| ColumnScanState::at(window))
            .collect();
        while window < end {
            let from = row_start.max(window);
            let to = end.min(window + VECTOR);
            let offset = (from - window) as usize;
            let len = (to - from) as usize;
            let arrays = column_ids
                .iter()
                .zip(scans.iter_mut())
                .map(|(&c, scan)| {
                    if is_row_id_column(c) {
                        scan.next_vector();
                        Ok(Arc::new(UInt64Array::from_iter_values(from..to)) as ArrayRef)
                    } else {
                        let full = self.column(c)?.index_scan(scan, offset + len)?;
                        Ok(full.slice(offset, len))
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            let batch = RecordBatch::try_new(Arc::clone(&schema), arrays)?;
            let row_ids: Vec<RowId> = (from..to).collect();
            f(&batch, &row_ids)?;
            window += VECTOR;
        }
        Ok(())
    }

    /// Exclusive handle used while rewriting a column under a schema change.
    pub(crate) fn lock_for_rewrite(&self) -> (MutexGuard<'_, AppendCursor>, VersionChainGuard<'_>) {
        let cursor = self.append_lock.lock();
        let chain = self.versions.lock();
        (cursor, chain)
    }

    // ------------------------------------------------------------------
    // Delete / Update / Fetch
    // ------------------------------------------------------------------

    /// Mark `row_ids` deleted by `txn`. Returns how many rows were newly
    /// marked. A row already deleted by another transaction is a conflict.
    pub fn delete(self: &Arc<Self>, txn: &Transaction, row_ids: &[RowId]) -> Result<usize> {
        let total = self.total_rows();
        if let Some(&bad) = row_ids.iter().find(|&&r| r >= total) {
            return Err(Error::InvalidArgumentError(format!(
                "row id {bad} is out of range for table {}",
                self.info.table_name
            )));
        }
        let snapshot = txn.snapshot();
        let chain = self.versions.lock();
        self.ensure_active("deleting from")?;

        let mut sorted = row_ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut marked: Vec<RowId> = Vec::with_capacity(sorted.len());
        let mut result = Ok(());
        for run in sorted.chunk_by(|a, b| chunk_of(*a) == chunk_of(*b)) {
            let Some(chunk) = chain.chunk_for(run[0]) else {
                result = Err(Error::Internal(format!("row {} has no version chunk", run[0])));
                break;
            };
            let locals: Vec<usize> = run.iter().map(|&r| (r - chunk.start()) as usize).collect();
            match chunk.delete(&snapshot, &locals) {
                Ok(done) => marked.extend(done.into_iter().map(|l| chunk.start() + l as u64)),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        drop(chain);

        let deleted = marked.len();
        if !marked.is_empty() {
            txn.push_undo(Box::new(DeleteUndo::new(Arc::clone(self), marked)));
        }
        result.map(|()| deleted)
    }

    /// Overwrite `column_ids` of `row_ids` with the columns of `updates`.
    ///
    /// Updates are in place and not versioned. Indexed columns must not be
    /// updated; callers rewrite those as delete plus insert.
    pub fn update(
        &self,
        txn: &Transaction,
        row_ids: &[RowId],
        column_ids: &[ColumnId],
        updates: &RecordBatch,
    ) -> Result<()> {
        if updates.num_rows() == 0 {
            return Ok(());
        }
        self.ensure_active("updating")?;
        if updates.num_columns() != column_ids.len() || updates.num_rows() != row_ids.len() {
            return Err(Error::InvalidArgumentError(
                "update batch does not match its column and row ids".into(),
            ));
        }
        for &c in column_ids {
            if is_row_id_column(c) {
                return Err(Error::InvalidArgumentError("the row id column cannot be updated".into()));
            }
            self.column(c)?;
        }
        let indexes = self.info.indexes();
        constraints::verify_update(&self.definition, &indexes, column_ids, updates)?;
        for (&c, values) in column_ids.iter().zip(updates.columns()) {
            self.columns[c].update(values.as_ref(), row_ids)?;
        }
        tracing::trace!(table = %self.info.table_name, txn_id = txn.id(), rows = row_ids.len(), "updated rows");
        Ok(())
    }

    /// Fetch `column_ids` for those of `row_ids` visible to `txn`, in order.
    pub fn fetch(&self, txn: &Transaction, column_ids: &[ColumnId], row_ids: &[RowId]) -> Result<RecordBatch> {
        let snapshot = txn.snapshot();
        let total = self.total_rows();
        let chunks = self.versions.snapshot();
        let visible: Vec<RowId> = row_ids
            .iter()
            .copied()
            .filter(|&row| {
                row < total
                    && chunks
                        .locate(row)
                        .is_some_and(|(chunk, local)| chunk.fetch(&snapshot, local))
            })
            .collect();
        let schema = self.definition.projected_schema(column_ids)?;
        let arrays = column_ids
            .iter()
            .map(|&c| {
                if is_row_id_column(c) {
                    Ok(Arc::new(UInt64Array::from(visible.clone())) as ArrayRef)
                } else {
                    self.column(c)?.fetch_rows(&visible)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RecordBatch::try_new(schema, arrays)?)
    }

    /// Rows visible to `txn`, counted by a full scan.
    pub fn visible_row_count(&self, txn: &Transaction) -> Result<u64> {
        let batches = self.scan_all(txn, &[strata_types::ROW_ID_COLUMN_ID], Vec::new())?;
        Ok(batches.iter().map(|b| b.num_rows() as u64).sum())
    }
}

fn project(batch: &RecordBatch, column_ids: &[ColumnId]) -> Vec<ArrayRef> {
    column_ids.iter().map(|&c| Arc::clone(batch.column(c))).collect()
}
