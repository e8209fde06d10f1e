//! Vector-at-a-time table scans with zonemap pruning and adaptive filter
//! ordering, plus the morsel protocol used by parallel scans.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arrow::array::{ArrayRef, UInt64Array};
use arrow::compute::take;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use strata_column_map::ColumnScanState;
use strata_result::{Error, Result};
use strata_transaction::{Transaction, TransactionSnapshot};
use strata_types::{
    ColumnId, STANDARD_VECTOR_SIZE, SelectionVector, TableFilter, is_row_id_column,
};

use crate::table::Table;
use crate::version_chain::ChunkSnapshot;

const VECTOR: u64 = STANDARD_VECTOR_SIZE as u64;

/// Weight of the latest window in the running pass-rate estimate.
const SELECTIVITY_ALPHA: f64 = 0.3;

/// Orders filtered columns so the most selective one runs first.
///
/// Keeps an exponentially weighted estimate of the fraction of rows each
/// filtered column lets through and re-sorts after every window.
#[derive(Debug, Clone)]
pub struct AdaptiveFilter {
    /// `(projection index, estimated pass rate)` in evaluation order.
    order: Vec<(usize, f64)>,
}

impl AdaptiveFilter {
    pub fn new(columns: impl IntoIterator<Item = usize>) -> Self {
        Self {
            order: columns.into_iter().map(|c| (c, 1.0)).collect(),
        }
    }

    /// Projection indexes in the order they should be evaluated.
    pub fn permutation(&self) -> Vec<usize> {
        self.order.iter().map(|(c, _)| *c).collect()
    }

    pub fn record(&mut self, column: usize, before: usize, after: usize) {
        if before == 0 {
            return;
        }
        let rate = after as f64 / before as f64;
        if let Some(entry) = self.order.iter_mut().find(|(c, _)| *c == column) {
            entry.1 = SELECTIVITY_ALPHA * rate + (1.0 - SELECTIVITY_ALPHA) * entry.1;
        }
    }

    pub fn adapt(&mut self) {
        self.order.sort_by(|a, b| a.1.total_cmp(&b.1));
    }
}

/// Cursor of one (possibly range-restricted) table scan.
#[derive(Debug)]
pub struct TableScanState {
    pub(crate) column_ids: Vec<ColumnId>,
    pub(crate) column_scans: Vec<ColumnScanState>,
    /// Filters grouped by the projection index they apply to.
    pub(crate) filters: BTreeMap<usize, Vec<TableFilter>>,
    pub(crate) adaptive: AdaptiveFilter,
    pub(crate) chunks: ChunkSnapshot,
    pub(crate) schema: SchemaRef,
    pub(crate) current_row: u64,
    pub(crate) max_row: u64,
    segments_skipped: u64,
}

impl TableScanState {
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn current_row(&self) -> u64 {
        self.current_row
    }

    pub fn max_row(&self) -> u64 {
        self.max_row
    }

    /// Segments this scan passed over on the strength of their zonemaps.
    pub fn segments_skipped(&self) -> u64 {
        self.segments_skipped
    }

    fn skip_vectors(&mut self, vectors: u64) {
        for scan in &mut self.column_scans {
            scan.skip_vectors(vectors);
        }
        self.current_row += vectors * VECTOR;
    }
}

/// Shared cursor handing out morsels of a table to parallel scanners.
#[derive(Debug)]
pub struct ParallelTableScanState {
    next_row: AtomicU64,
    max_row: u64,
    morsel_rows: u64,
}

impl ParallelTableScanState {
    pub fn max_row(&self) -> u64 {
        self.max_row
    }

    pub fn morsel_rows(&self) -> u64 {
        self.morsel_rows
    }
}

enum Window {
    Exhausted,
    Skipped,
    Batch(RecordBatch),
}

fn row_id_sequence(start: u64, count: usize) -> ArrayRef {
    Arc::new(UInt64Array::from_iter_values(start..start + count as u64))
}

fn row_ids_for(start: u64, sel: &SelectionVector) -> ArrayRef {
    Arc::new(UInt64Array::from_iter_values(
        sel.iter().map(|pos| start + pos as u64),
    ))
}

impl Table {
    /// Start a scan over the whole table as of now.
    pub fn initialize_scan(
        &self,
        column_ids: &[ColumnId],
        filters: Vec<TableFilter>,
    ) -> Result<TableScanState> {
        self.initialize_scan_with_offset(column_ids, filters, 0, u64::MAX)
    }

    /// Start a scan over `[start_row, end_row)`. `start_row` must be a
    /// multiple of the vector size.
    pub fn initialize_scan_with_offset(
        &self,
        column_ids: &[ColumnId],
        filters: Vec<TableFilter>,
        start_row: u64,
        end_row: u64,
    ) -> Result<TableScanState> {
        if column_ids.is_empty() {
            return Err(Error::InvalidArgumentError(
                "a scan must project at least one column".into(),
            ));
        }
        if start_row % VECTOR != 0 {
            return Err(Error::InvalidArgumentError(format!(
                "scan offset {start_row} is not vector aligned"
            )));
        }
        let schema = self.definition.projected_schema(column_ids)?;

        let mut grouped: BTreeMap<usize, Vec<TableFilter>> = BTreeMap::new();
        for filter in filters {
            let Some(&column_id) = column_ids.get(filter.column_index) else {
                return Err(Error::InvalidArgumentError(format!(
                    "filter references projection index {} of {}",
                    filter.column_index,
                    column_ids.len()
                )));
            };
            if is_row_id_column(column_id) {
                return Err(Error::NotImplemented(
                    "filters on the row id column".into(),
                ));
            }
            grouped.entry(filter.column_index).or_default().push(filter);
        }

        // Rows become visible to readers only after the chain covers them,
        // so read the bound first.
        let total_rows = self.total_rows();
        let chunks = self.versions.snapshot();
        Ok(TableScanState {
            column_ids: column_ids.to_vec(),
            column_scans: column_ids
                .iter()
                .map(|_| ColumnScanState::at(start_row))
                .collect(),
            adaptive: AdaptiveFilter::new(grouped.keys().copied()),
            filters: grouped,
            chunks,
            schema,
            current_row: start_row,
            max_row: end_row.min(total_rows),
            segments_skipped: 0,
        })
    }

    /// Next non-empty batch of rows visible to `txn`, or `None` when done.
    pub fn scan(&self, txn: &Transaction, state: &mut TableScanState) -> Result<Option<RecordBatch>> {
        let snapshot = txn.snapshot();
        loop {
            match self.scan_window(&snapshot, state)? {
                Window::Exhausted => return Ok(None),
                Window::Skipped => continue,
                Window::Batch(batch) => return Ok(Some(batch)),
            }
        }
    }

    /// Run a full scan to completion.
    pub fn scan_all(
        &self,
        txn: &Transaction,
        column_ids: &[ColumnId],
        filters: Vec<TableFilter>,
    ) -> Result<Vec<RecordBatch>> {
        let mut state = self.initialize_scan(column_ids, filters)?;
        let mut out = Vec::new();
        while let Some(batch) = self.scan(txn, &mut state)? {
            out.push(batch);
        }
        Ok(out)
    }

    fn scan_window(
        &self,
        snapshot: &TransactionSnapshot,
        state: &mut TableScanState,
    ) -> Result<Window> {
        if state.current_row >= state.max_row {
            return Ok(Window::Exhausted);
        }
        let row_start = state.current_row;
        let count = (state.max_row - row_start).min(VECTOR) as usize;

        if self.config.zonemap_pruning && !state.filters.is_empty() {
            let mut skip_to = None;
            for (&proj, filters) in &state.filters {
                let column = &self.columns[state.column_ids[proj]];
                if let Some(end) = column.check_zonemap(&mut state.column_scans[proj], filters)? {
                    skip_to = Some(end);
                    break;
                }
            }
            if let Some(end) = skip_to {
                let vectors = (end - row_start).div_ceil(VECTOR).max(1);
                tracing::trace!(row_start, vectors, "zonemap skip");
                state.segments_skipped += 1;
                state.skip_vectors(vectors);
                return Ok(Window::Skipped);
            }
        }

        let sel = state
            .chunks
            .locate(row_start)
            .map(|(chunk, local)| chunk.get_sel_vector(snapshot, local / STANDARD_VECTOR_SIZE, count));
        let mut sel = match sel {
            Some(sel) if !sel.is_empty() => sel,
            _ => {
                state.skip_vectors(1);
                return Ok(Window::Skipped);
            }
        };

        let width = state.column_ids.len();
        let mut outputs: Vec<ArrayRef> = Vec::with_capacity(width);

        if state.filters.is_empty() {
            let full = sel.len() == count;
            for i in 0..width {
                let column_id = state.column_ids[i];
                let array = if is_row_id_column(column_id) {
                    state.column_scans[i].next_vector();
                    if full {
                        row_id_sequence(row_start, count)
                    } else {
                        row_ids_for(row_start, &sel)
                    }
                } else if full {
                    self.columns[column_id].scan(&mut state.column_scans[i], count)?
                } else {
                    self.columns[column_id].filter_scan(&mut state.column_scans[i], &sel)?
                };
                outputs.push(array);
            }
        } else {
            let mut windows: Vec<Option<ArrayRef>> = vec![None; width];
            for proj in state.adaptive.permutation() {
                if sel.is_empty() {
                    break;
                }
                let column = &self.columns[state.column_ids[proj]];
                let before = sel.len();
                let window = column.select(
                    &mut state.column_scans[proj],
                    count,
                    &mut sel,
                    &state.filters[&proj],
                )?;
                state.adaptive.record(proj, before, sel.len());
                windows[proj] = Some(window);
            }
            state.adaptive.adapt();

            if sel.is_empty() {
                for (i, window) in windows.iter().enumerate() {
                    if window.is_none() {
                        state.column_scans[i].next_vector();
                    }
                }
                state.current_row += VECTOR;
                return Ok(Window::Skipped);
            }

            let indices = sel.to_indices();
            for (i, window) in windows.into_iter().enumerate() {
                let column_id = state.column_ids[i];
                let array = match window {
                    Some(window) => take(window.as_ref(), &indices, None)?,
                    None if is_row_id_column(column_id) => {
                        state.column_scans[i].next_vector();
                        row_ids_for(row_start, &sel)
                    }
                    None => self.columns[column_id].filter_scan(&mut state.column_scans[i], &sel)?,
                };
                outputs.push(array);
            }
        }

        state.current_row += VECTOR;
        let batch = RecordBatch::try_new(Arc::clone(&state.schema), outputs)?;
        Ok(Window::Batch(batch))
    }

    /// Upper bound on useful scan parallelism for the current table size:
    /// one thread per morsel.
    pub fn max_threads(&self) -> usize {
        (self.total_rows() / self.config.morsel_rows()) as usize + 1
    }

    pub fn initialize_parallel_scan(&self) -> ParallelTableScanState {
        ParallelTableScanState {
            next_row: AtomicU64::new(0),
            max_row: self.total_rows(),
            morsel_rows: self.config.morsel_rows(),
        }
    }

    /// Claim the next morsel, or `None` once the table is exhausted.
    pub fn next_parallel_scan(
        &self,
        parallel: &ParallelTableScanState,
        column_ids: &[ColumnId],
        filters: Vec<TableFilter>,
    ) -> Result<Option<TableScanState>> {
        let start = parallel
            .next_row
            .fetch_add(parallel.morsel_rows, Ordering::AcqRel);
        if start >= parallel.max_row {
            return Ok(None);
        }
        let end = (start + parallel.morsel_rows).min(parallel.max_row);
        self.initialize_scan_with_offset(column_ids, filters, start, end)
            .map(Some)
    }

    /// Split `[0, total_rows)` into at most `n` disjoint vector-aligned ranges.
    /// Always returns at least one range.
    pub fn partition_ranges(&self, n: usize) -> Vec<(u64, u64)> {
        let total = self.total_rows();
        let vectors = total.div_ceil(VECTOR).max(1);
        let per = vectors.div_ceil(n.max(1) as u64) * VECTOR;
        let mut ranges = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + per).min(total);
            ranges.push((start, end));
            start = end;
            if start >= total {
                break;
            }
        }
        ranges
    }
}
