//! The per-column store: an append-only chain of segments behind a lock.
//!
//! Writers (append, update, revert) take the write lock for the duration of
//! one call; readers take the read lock per vector-sized window. The table
//! layer serializes writers, so contention is limited to readers overlapping
//! a single append.

use arrow::array::{Array, ArrayRef, new_null_array};
use arrow::compute::kernels::interleave::interleave;
use arrow::datatypes::DataType;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use strata_result::{Error, Result};
use strata_types::{ColumnId, Literal, RowId, STANDARD_VECTOR_SIZE, SelectionVector, TableFilter};

use crate::is_supported_type;
use crate::segment::{Segment, SegmentId, comparison_type};
use crate::zonemap::{ZoneMap, ensure_comparator};

/// Cursor over a column, positioned at the start of a vector-sized window.
#[derive(Debug, Clone, Default)]
pub struct ColumnScanState {
    row: u64,
    /// Segment whose zonemap was already consulted for the current window.
    checked_segment: Option<SegmentId>,
}

impl ColumnScanState {
    pub fn at(row: u64) -> Self {
        debug_assert!(row % STANDARD_VECTOR_SIZE as u64 == 0);
        Self {
            row,
            checked_segment: None,
        }
    }

    #[inline]
    pub fn row(&self) -> u64 {
        self.row
    }

    /// Advance past the current window without reading it.
    #[inline]
    pub fn next_vector(&mut self) {
        self.row += STANDARD_VECTOR_SIZE as u64;
    }

    /// Advance past `vectors` windows at once.
    #[inline]
    pub fn skip_vectors(&mut self, vectors: u64) {
        self.row += vectors * STANDARD_VECTOR_SIZE as u64;
    }
}

#[derive(Debug, Default)]
struct SegmentArena {
    segments: Vec<Segment>,
    row_count: u64,
}

impl SegmentArena {
    /// Segment holding `row`, if any data was ever stored there.
    fn lookup(&self, row: u64) -> Option<&Segment> {
        let idx = self.segments.partition_point(|s| s.end() <= row);
        self.segments.get(idx).filter(|s| s.start <= row)
    }

    fn position(&self, row: u64) -> Option<usize> {
        let idx = self.segments.partition_point(|s| s.end() <= row);
        self.segments.get(idx).filter(|s| s.start <= row).map(|_| idx)
    }
}

/// Storage for one column of a table.
#[derive(Debug)]
pub struct ColumnStore {
    column_id: ColumnId,
    data_type: DataType,
    rows_per_segment: usize,
    arena: RwLock<SegmentArena>,
}

impl ColumnStore {
    /// Create an empty column whose segments hold `segment_vectors` vectors each.
    pub fn new(column_id: ColumnId, data_type: DataType, segment_vectors: usize) -> Result<Self> {
        if !is_supported_type(&data_type) {
            return Err(Error::NotImplemented(format!(
                "column storage for type {data_type:?}"
            )));
        }
        Ok(Self {
            column_id,
            data_type,
            rows_per_segment: segment_vectors.max(1) * STANDARD_VECTOR_SIZE,
            arena: RwLock::new(SegmentArena::default()),
        })
    }

    /// Create a column pre-populated with previously persisted arrays.
    pub fn with_persisted(
        column_id: ColumnId,
        data_type: DataType,
        segment_vectors: usize,
        persisted: &[ArrayRef],
    ) -> Result<Self> {
        let store = Self::new(column_id, data_type, segment_vectors)?;
        for array in persisted {
            store.append(array.as_ref())?;
        }
        Ok(store)
    }

    pub fn column_id(&self) -> ColumnId {
        self.column_id
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn rows_per_segment(&self) -> usize {
        self.rows_per_segment
    }

    /// Rows physically stored.
    pub fn row_count(&self) -> u64 {
        self.arena.read().row_count
    }

    pub fn segment_count(&self) -> usize {
        self.arena.read().segments.len()
    }

    /// Zonemaps of every segment, in chain order.
    pub fn zonemaps(&self) -> Vec<ZoneMap> {
        let arena = self.arena.read();
        let mut out = Vec::with_capacity(arena.segments.len());
        let mut cursor = arena.segments.first().map(|s| s.id);
        while let Some(id) = cursor {
            let segment = &arena.segments[id.index()];
            out.push(segment.stats.clone());
            cursor = segment.next;
        }
        out
    }

    // ------------------------------------------------------------------
    // Scan
    // ------------------------------------------------------------------

    pub fn initialize_scan(&self) -> ColumnScanState {
        ColumnScanState::at(0)
    }

    pub fn initialize_scan_with_offset(&self, start_row: u64) -> ColumnScanState {
        ColumnScanState::at(start_row)
    }

    /// Read the next `count` rows and advance the cursor by one vector.
    pub fn scan(&self, state: &mut ColumnScanState, count: usize) -> Result<ArrayRef> {
        let out = self.read_window(state.row, count);
        state.next_vector();
        out
    }

    /// Raw window read used by index construction; identical to [`Self::scan`]
    /// because column data carries no versions.
    pub fn index_scan(&self, state: &mut ColumnScanState, count: usize) -> Result<ArrayRef> {
        self.scan(state, count)
    }

    /// Evaluate `filters` on the positions in `sel`, dropping those that fail.
    ///
    /// Returns the whole `count`-row window so the caller can slice it with
    /// the final selection once every filtered column had its say.
    pub fn select(
        &self,
        state: &mut ColumnScanState,
        count: usize,
        sel: &mut SelectionVector,
        filters: &[TableFilter],
    ) -> Result<ArrayRef> {
        for filter in filters {
            comparison_type(&self.data_type, &filter.constant)?;
        }
        let arena = self.arena.read();
        let out = match arena.lookup(state.row) {
            Some(segment) => {
                let local = (state.row - segment.start) as usize;
                segment.refine(local, count, sel, filters)
            }
            None => {
                sel.clear();
                Ok(new_null_array(&self.data_type, count))
            }
        };
        drop(arena);
        state.next_vector();
        out
    }

    /// Gather only the positions in `sel` from the current window.
    pub fn filter_scan(
        &self,
        state: &mut ColumnScanState,
        sel: &SelectionVector,
    ) -> Result<ArrayRef> {
        let arena = self.arena.read();
        let out = match arena.lookup(state.row) {
            Some(segment) => segment.gather((state.row - segment.start) as usize, sel),
            None => Ok(new_null_array(&self.data_type, sel.len())),
        };
        drop(arena);
        state.next_vector();
        out
    }

    /// Consult the zonemap of the segment under the cursor.
    ///
    /// Returns `Some(end_row)` when no row of that segment can satisfy all of
    /// `filters`; the caller may then skip straight to `end_row`. Each segment
    /// is checked at most once per cursor.
    pub fn check_zonemap(
        &self,
        state: &mut ColumnScanState,
        filters: &[TableFilter],
    ) -> Result<Option<u64>> {
        let arena = self.arena.read();
        let Some(segment) = arena.lookup(state.row) else {
            return Ok(None);
        };
        if state.checked_segment == Some(segment.id) {
            return Ok(None);
        }
        state.checked_segment = Some(segment.id);
        if segment.count() == 0 {
            return Ok(None);
        }
        for filter in filters {
            if !segment.stats.might_match(&self.data_type, filter)? {
                tracing::trace!(
                    column = self.column_id,
                    segment = segment.id.index(),
                    "zonemap prunes segment"
                );
                return Ok(Some(segment.end()));
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Point reads
    // ------------------------------------------------------------------

    pub fn fetch_row(&self, row_id: RowId) -> Result<Literal> {
        let arena = self.arena.read();
        let segment = arena.lookup(row_id).ok_or(Error::NotFound)?;
        let local = (row_id - segment.start) as usize;
        if local >= segment.count() {
            return Err(Error::NotFound);
        }
        segment.value(local)
    }

    /// Gather the values of `row_ids` into one array, in the given order.
    ///
    /// Every chunk touched is referenced once and the rows are picked out of
    /// them with a single `interleave`.
    pub fn fetch_rows(&self, row_ids: &[RowId]) -> Result<ArrayRef> {
        if row_ids.is_empty() {
            return Ok(new_null_array(&self.data_type, 0));
        }
        let arena = self.arena.read();
        let mut sources: Vec<&dyn Array> = Vec::new();
        let mut source_of: FxHashMap<(usize, usize), usize> = FxHashMap::default();
        let mut picks: Vec<(usize, usize)> = Vec::with_capacity(row_ids.len());
        for &row_id in row_ids {
            let segment = arena.lookup(row_id).ok_or(Error::NotFound)?;
            let (chunk, within) = segment
                .locate((row_id - segment.start) as usize)
                .ok_or(Error::NotFound)?;
            let source = *source_of
                .entry((segment.id.index(), chunk))
                .or_insert_with(|| {
                    sources.push(segment.chunk(chunk).as_ref());
                    sources.len() - 1
                });
            picks.push((source, within));
        }
        Ok(interleave(&sources, &picks)?)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Append `array` after the last stored row, opening new segments as the
    /// active one fills up.
    pub fn append(&self, array: &dyn Array) -> Result<()> {
        if array.data_type() != &self.data_type {
            return Err(Error::InvalidArgumentError(format!(
                "column {} expects {:?}, got {:?}",
                self.column_id,
                self.data_type,
                array.data_type()
            )));
        }
        let mut arena = self.arena.write();
        let mut offset = 0usize;
        while offset < array.len() {
            if arena.segments.last().is_none_or(Segment::is_full) {
                let start = arena.row_count;
                let id = SegmentId(arena.segments.len());
                let segment = Segment::new(id, start, self.rows_per_segment, &self.data_type);
                if let Some(tail) = arena.segments.last_mut() {
                    tail.next = Some(id);
                }
                arena.segments.push(segment);
            }
            let tail = arena
                .segments
                .last_mut()
                .ok_or_else(|| Error::Internal("segment chain is empty".into()))?;
            let room = tail.capacity - tail.count();
            let len = room.min(array.len() - offset);
            tail.append(array, offset, len)?;
            offset += len;
            arena.row_count += len as u64;
        }
        Ok(())
    }

    /// Overwrite the values at `row_ids` with `values[i]`. Not versioned.
    pub fn update(&self, values: &dyn Array, row_ids: &[RowId]) -> Result<()> {
        if values.len() != row_ids.len() {
            return Err(Error::InvalidArgumentError(
                "update values and row ids differ in length".into(),
            ));
        }
        if values.data_type() != &self.data_type {
            return Err(Error::InvalidArgumentError(format!(
                "column {} expects {:?}, got {:?}",
                self.column_id,
                self.data_type,
                values.data_type()
            )));
        }
        let mut arena = self.arena.write();
        let mut per_segment: FxHashMap<usize, Vec<(usize, usize)>> = FxHashMap::default();
        for (src, &row_id) in row_ids.iter().enumerate() {
            let idx = arena.position(row_id).ok_or(Error::NotFound)?;
            let segment = &arena.segments[idx];
            let local = (row_id - segment.start) as usize;
            if local >= segment.count() {
                return Err(Error::NotFound);
            }
            per_segment.entry(idx).or_default().push((local, src));
        }
        for (idx, pairs) in per_segment {
            arena.segments[idx].update(values, &pairs)?;
        }
        Ok(())
    }

    /// Discard every row at or after `start_row`.
    pub fn revert_append(&self, start_row: u64) {
        let mut arena = self.arena.write();
        if start_row >= arena.row_count {
            return;
        }
        let keep = arena.segments.partition_point(|s| s.end() <= start_row);
        arena.segments.truncate(keep + 1);
        if let Some(tail) = arena.segments.last_mut() {
            if tail.start >= start_row {
                arena.segments.pop();
            } else {
                tail.truncate((start_row - tail.start) as usize);
            }
        }
        if let Some(tail) = arena.segments.last_mut() {
            tail.next = None;
        }
        arena.row_count = start_row;
    }

    /// Whether pushdown filters on this column can be checked against zonemaps.
    pub fn supports_zonemap(&self) -> bool {
        ensure_comparator(&self.data_type).is_ok()
    }

    fn read_window(&self, row: u64, count: usize) -> Result<ArrayRef> {
        let arena = self.arena.read();
        match arena.lookup(row) {
            Some(segment) => segment.read((row - segment.start) as usize, count),
            None => Ok(new_null_array(&self.data_type, count)),
        }
    }
}
