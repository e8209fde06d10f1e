//! Segment arena for a single column.
//!
//! Segments live in an arena indexed by a monotonically assigned
//! [`SegmentId`]; the chain order is expressed through `next` links rather
//! than owned pointers. Every segment covers a fixed, vector-aligned row
//! capacity, so a scan window never straddles two segments.
//!
//! Segment data is a list of Arrow chunks. Appends store zero-copy slices of
//! the incoming array; a chunk shorter than one vector is merged with its
//! successor so windows rarely need more than two chunks.

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Scalar, UInt32Array, new_null_array};
use arrow::compute;
use arrow::compute::kernels::interleave::interleave;
use arrow::datatypes::{DataType, Float64Type, UInt32Type};
use strata_result::{Error, Result};
use strata_types::{Literal, STANDARD_VECTOR_SIZE, SelectionVector, TableFilter};

use crate::zonemap::ZoneMap;

/// Arena index of a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub(crate) usize);

impl SegmentId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// One contiguous run of rows of a column.
#[derive(Debug, Clone)]
pub struct Segment {
    pub(crate) id: SegmentId,
    pub(crate) start: u64,
    pub(crate) capacity: usize,
    data_type: DataType,
    chunks: Vec<ArrayRef>,
    /// Local row of the first value of each chunk.
    offsets: Vec<usize>,
    count: usize,
    pub(crate) stats: ZoneMap,
    pub(crate) next: Option<SegmentId>,
}

impl Segment {
    pub(crate) fn new(id: SegmentId, start: u64, capacity: usize, data_type: &DataType) -> Self {
        Self {
            id,
            start,
            capacity,
            data_type: data_type.clone(),
            chunks: Vec::new(),
            offsets: Vec::new(),
            count: 0,
            stats: ZoneMap::default(),
            next: None,
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// First row id stored in this segment.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Rows currently stored.
    pub fn count(&self) -> usize {
        self.count
    }

    /// One past the last row id this segment may ever hold.
    pub fn end(&self) -> u64 {
        self.start + self.capacity as u64
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.capacity
    }

    pub fn next(&self) -> Option<SegmentId> {
        self.next
    }

    pub fn stats(&self) -> &ZoneMap {
        &self.stats
    }

    pub(crate) fn chunk(&self, idx: usize) -> &ArrayRef {
        &self.chunks[idx]
    }

    /// `(chunk index, row within chunk)` of a stored local row.
    pub(crate) fn locate(&self, local: usize) -> Option<(usize, usize)> {
        if local >= self.count {
            return None;
        }
        let idx = self.offsets.partition_point(|&o| o <= local) - 1;
        Some((idx, local - self.offsets[idx]))
    }

    /// Append `len` values of `array` starting at `offset`.
    pub(crate) fn append(&mut self, array: &dyn Array, offset: usize, len: usize) -> Result<()> {
        let incoming = array.slice(offset, len);
        self.stats.record(incoming.as_ref())?;
        match self.chunks.last_mut() {
            Some(tail) if tail.len() < STANDARD_VECTOR_SIZE => {
                *tail = compute::concat(&[tail.as_ref(), incoming.as_ref()])?;
            }
            _ => {
                self.offsets.push(self.count);
                self.chunks.push(incoming);
            }
        }
        self.count += len;
        Ok(())
    }

    /// Overwrite `local` rows with `values[src]` for every `(local, src)` pair.
    ///
    /// The segment is rebuilt into a single chunk. The range widens with the
    /// new values and the null count is recomputed exactly.
    pub(crate) fn update(&mut self, values: &dyn Array, pairs: &[(usize, usize)]) -> Result<()> {
        let current = self.read(0, self.count)?;
        let mut picks: Vec<(usize, usize)> = (0..self.count).map(|row| (0, row)).collect();
        for &(local, src) in pairs {
            let slot = picks.get_mut(local).ok_or(Error::NotFound)?;
            *slot = (1, src);
        }
        let rebuilt = interleave(&[current.as_ref(), values], &picks)?;

        let srcs = UInt32Array::from_iter_values(pairs.iter().map(|&(_, src)| src as u32));
        let written = compute::take(values, &srcs, None)?;
        self.stats.record_range(written.as_ref())?;
        self.stats.null_count = rebuilt.null_count() as u64;

        self.chunks = vec![rebuilt];
        self.offsets = vec![0];
        Ok(())
    }

    /// Drop every row at or after `local`. Statistics stay conservative.
    pub(crate) fn truncate(&mut self, local: usize) {
        let Some((idx, within)) = self.locate(local) else {
            return;
        };
        self.chunks.truncate(idx + 1);
        self.offsets.truncate(idx + 1);
        if within == 0 {
            self.chunks.pop();
            self.offsets.pop();
        } else if let Some(tail) = self.chunks.last_mut() {
            *tail = tail.slice(0, within);
        }
        self.count = local;
    }

    /// `count` rows from `local`, padding rows past the stored end with NULL.
    pub(crate) fn read(&self, local: usize, count: usize) -> Result<ArrayRef> {
        let end = (local + count).min(self.count);
        let mut parts: Vec<ArrayRef> = Vec::new();
        if let Some((first, _)) = self.locate(local) {
            for (chunk, &offset) in self.chunks[first..].iter().zip(&self.offsets[first..]) {
                if offset >= end {
                    break;
                }
                let from = local.max(offset) - offset;
                let to = end.min(offset + chunk.len()) - offset;
                parts.push(chunk.slice(from, to - from));
            }
        }
        let stored = end.saturating_sub(local);
        if stored < count {
            parts.push(new_null_array(&self.data_type, count - stored));
        }
        match parts.len() {
            0 => Ok(new_null_array(&self.data_type, 0)),
            1 => Ok(parts.remove(0)),
            _ => {
                let refs: Vec<&dyn Array> = parts.iter().map(|a| a.as_ref()).collect();
                Ok(compute::concat(&refs)?)
            }
        }
    }

    /// The positions in `sel` of the window starting at `local`.
    pub(crate) fn gather(&self, local: usize, sel: &SelectionVector) -> Result<ArrayRef> {
        let window_len = sel.iter().max().map_or(0, |p| p + 1);
        let window = self.read(local, window_len)?;
        Ok(compute::take(window.as_ref(), &sel.to_indices(), None)?)
    }

    /// Read the `count`-row window at `local` and keep only the positions of
    /// `sel` whose value satisfies every filter.
    pub(crate) fn refine(
        &self,
        local: usize,
        count: usize,
        sel: &mut SelectionVector,
        filters: &[TableFilter],
    ) -> Result<ArrayRef> {
        let window = self.read(local, count)?;
        if filters.is_empty() || sel.is_empty() {
            return Ok(window);
        }
        let mut positions = sel.to_indices();
        for table_filter in filters {
            if positions.is_empty() {
                break;
            }
            let values = compute::take(window.as_ref(), &positions, None)?;
            let keep = evaluate_filter(values.as_ref(), table_filter)?;
            positions = compute::filter(&positions, &keep)?
                .as_primitive::<UInt32Type>()
                .clone();
        }
        *sel = SelectionVector::from_positions(positions.values().to_vec());
        Ok(window)
    }

    pub(crate) fn value(&self, local: usize) -> Result<Literal> {
        match self.locate(local) {
            Some((idx, within)) => Literal::from_array(self.chunks[idx].as_ref(), within),
            None => Ok(Literal::Null),
        }
    }
}

/// Type both sides of `column <op> constant` are compared in.
pub(crate) fn comparison_type(column: &DataType, constant: &Literal) -> Result<DataType> {
    let numeric = matches!(column, DataType::Int32 | DataType::Int64 | DataType::Float64);
    match (column, constant) {
        (_, Literal::Null) => Ok(column.clone()),
        (_, Literal::Float64(_)) if numeric => Ok(DataType::Float64),
        (DataType::Float64, Literal::Int64(_)) => Ok(DataType::Float64),
        (_, Literal::Int64(_)) if numeric => Ok(DataType::Int64),
        (DataType::Utf8, Literal::String(_)) | (DataType::Boolean, Literal::Boolean(_)) => {
            Ok(column.clone())
        }
        _ => Err(Error::InvalidArgumentError(format!(
            "filter constant {constant:?} is not comparable with {column:?}"
        ))),
    }
}

/// Boolean mask of the rows of `values` satisfying `filter`.
///
/// NULL and NaN satisfy nothing, which keeps results in line with the
/// zonemap ranges that leave them out.
fn evaluate_filter(values: &dyn Array, filter: &TableFilter) -> Result<BooleanArray> {
    let target = comparison_type(values.data_type(), &filter.constant)?;
    if matches!(filter.constant, Literal::Float64(c) if c.is_nan()) {
        return Ok(BooleanArray::from(vec![false; values.len()]));
    }
    let widened;
    let lhs: &dyn Array = if values.data_type() == &target {
        values
    } else {
        widened = compute::cast(values, &target)?;
        widened.as_ref()
    };
    let rhs = Scalar::new(filter.constant.to_array(&target, 1)?);
    let mask = filter.op.evaluate(&lhs, &rhs)?;
    if target != DataType::Float64 {
        return Ok(mask);
    }
    let numbers = BooleanArray::from_unary(lhs.as_primitive::<Float64Type>(), |v| !v.is_nan());
    Ok(compute::and(&mask, &numbers)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int32Array, Int64Array};
    use strata_types::CompareOp;

    fn segment_with(chunks: &[&[i64]]) -> Segment {
        let mut seg = Segment::new(SegmentId(0), 0, 4 * STANDARD_VECTOR_SIZE, &DataType::Int64);
        for chunk in chunks {
            let array = Int64Array::from(chunk.to_vec());
            seg.append(&array, 0, array.len()).unwrap();
        }
        seg
    }

    #[test]
    fn small_appends_merge_into_one_chunk() {
        let seg = segment_with(&[&[1, 2], &[3], &[4, 5, 6]]);
        assert_eq!(seg.chunks.len(), 1);
        assert_eq!(seg.count(), 6);
        let window = seg.read(1, 4).unwrap();
        assert_eq!(
            window.as_primitive::<arrow::datatypes::Int64Type>().values().to_vec(),
            vec![2, 3, 4, 5]
        );
    }

    #[test]
    fn windows_span_chunk_boundaries() {
        let big: Vec<i64> = (0..STANDARD_VECTOR_SIZE as i64).collect();
        let seg = segment_with(&[&big, &[-1, -2]]);
        assert_eq!(seg.chunks.len(), 2);
        let window = seg.read(STANDARD_VECTOR_SIZE - 1, 4).unwrap();
        let window = window.as_primitive::<arrow::datatypes::Int64Type>();
        assert_eq!(window.len(), 4);
        assert_eq!(window.value(0), STANDARD_VECTOR_SIZE as i64 - 1);
        assert_eq!(window.value(2), -2);
        assert!(window.is_null(3));
        assert_eq!(seg.locate(STANDARD_VECTOR_SIZE + 1), Some((1, 1)));
    }

    #[test]
    fn refine_widens_integer_windows_for_float_constants() {
        let mut seg = Segment::new(SegmentId(0), 0, STANDARD_VECTOR_SIZE, &DataType::Int32);
        let array = Int32Array::from(vec![Some(1), Some(5), None, Some(6)]);
        seg.append(&array, 0, 4).unwrap();
        let mut sel = SelectionVector::incremental(4);
        seg.refine(0, 4, &mut sel, &[TableFilter::new(0, CompareOp::GreaterThan, 5.5)])
            .unwrap();
        assert_eq!(sel.as_slice(), &[3]);
    }

    #[test]
    fn nan_satisfies_no_filter() {
        let mut seg = Segment::new(SegmentId(0), 0, STANDARD_VECTOR_SIZE, &DataType::Float64);
        let array = Float64Array::from(vec![1.0, f64::NAN, 10.0]);
        seg.append(&array, 0, 3).unwrap();
        for (op, expected) in [
            (CompareOp::GreaterThan, vec![2]),
            (CompareOp::NotEqual, vec![0, 2]),
            (CompareOp::LessThan, vec![0]),
        ] {
            let mut sel = SelectionVector::incremental(3);
            seg.refine(0, 3, &mut sel, &[TableFilter::new(0, op, 5.0)]).unwrap();
            assert_eq!(sel.as_slice(), expected.as_slice(), "{op:?}");
        }
        let mut sel = SelectionVector::incremental(3);
        seg.refine(0, 3, &mut sel, &[TableFilter::new(0, CompareOp::Equal, f64::NAN)])
            .unwrap();
        assert!(sel.is_empty());
    }

    #[test]
    fn update_rebuilds_and_recounts_nulls() {
        let mut seg = segment_with(&[&[1, 2, 3]]);
        let values = Int64Array::from(vec![None, Some(40)]);
        seg.update(&values, &[(0, 0), (2, 1)]).unwrap();
        assert_eq!(seg.value(0).unwrap(), Literal::Null);
        assert_eq!(seg.value(2).unwrap(), Literal::from(40));
        assert_eq!(seg.stats.null_count, 1);
        assert_eq!(seg.stats.max, Literal::from(40));
        assert!(seg.update(&values, &[(7, 0)]).is_err());
    }

    #[test]
    fn truncate_inside_and_at_chunk_start() {
        let big: Vec<i64> = (0..STANDARD_VECTOR_SIZE as i64).collect();
        let mut seg = segment_with(&[&big, &[7, 8, 9]]);
        seg.truncate(STANDARD_VECTOR_SIZE + 1);
        assert_eq!(seg.count(), STANDARD_VECTOR_SIZE + 1);
        assert_eq!(seg.value(STANDARD_VECTOR_SIZE).unwrap(), Literal::from(7));
        seg.truncate(STANDARD_VECTOR_SIZE);
        assert_eq!(seg.chunks.len(), 1);
        seg.truncate(10);
        assert_eq!(seg.count(), 10);
        assert_eq!(seg.value(10).unwrap(), Literal::Null);
    }
}
