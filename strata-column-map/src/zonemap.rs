//! Per-segment min/max statistics and the pruning check built on them.

use std::cmp::Ordering;

use arrow::array::{Array, AsArray, BooleanArray};
use arrow::compute;
use arrow::datatypes::{DataType, Float64Type, Int32Type, Int64Type};
use strata_result::{Error, Result};
use strata_types::{CompareOp, Literal, TableFilter};

/// Cached statistics for one segment.
///
/// `min`/`max` only ever widen: updates fold new values in and reverts leave
/// them untouched, so the range is always a superset of the stored values.
/// NULL and NaN never enter the range; neither satisfies any filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneMap {
    pub min: Literal,
    pub max: Literal,
    pub null_count: u64,
}

impl Default for ZoneMap {
    fn default() -> Self {
        Self {
            min: Literal::Null,
            max: Literal::Null,
            null_count: 0,
        }
    }
}

impl ZoneMap {
    /// `true` once at least one non-null value was recorded.
    pub fn has_values(&self) -> bool {
        !self.min.is_null()
    }

    pub(crate) fn widen(&mut self, min: Literal, max: Literal) {
        if self.min.is_null() || min.compare(&self.min) == Some(Ordering::Less) {
            self.min = min;
        }
        if self.max.is_null() || max.compare(&self.max) == Some(Ordering::Greater) {
            self.max = max;
        }
    }

    /// Fold a freshly stored run of values into the statistics.
    pub(crate) fn record(&mut self, array: &dyn Array) -> Result<()> {
        self.null_count += array.null_count() as u64;
        self.record_range(array)
    }

    /// Widen the range with `array` without touching the null count.
    pub(crate) fn record_range(&mut self, array: &dyn Array) -> Result<()> {
        if let Some((min, max)) = value_range(array)? {
            self.widen(min, max);
        }
        Ok(())
    }

    /// Can a segment described by these statistics contain a row matching
    /// `filter`? `false` means the whole segment may be skipped.
    ///
    /// A constant the statistics cannot be ordered against never prunes; the
    /// scan itself decides what such a filter selects.
    pub fn might_match(&self, data_type: &DataType, filter: &TableFilter) -> Result<bool> {
        ensure_comparator(data_type)?;
        let constant = &filter.constant;
        if constant.is_null() || !self.has_values() {
            return Ok(false);
        }
        let (Some(vs_min), Some(vs_max)) =
            (constant.compare(&self.min), constant.compare(&self.max))
        else {
            return Ok(true);
        };
        Ok(match filter.op {
            CompareOp::Equal => vs_min != Ordering::Less && vs_max != Ordering::Greater,
            CompareOp::NotEqual => !(vs_min == Ordering::Equal && vs_max == Ordering::Equal),
            CompareOp::GreaterThanOrEqual => vs_max != Ordering::Greater,
            CompareOp::GreaterThan => vs_max == Ordering::Less,
            CompareOp::LessThanOrEqual => vs_min != Ordering::Less,
            CompareOp::LessThan => vs_min == Ordering::Greater,
        })
    }
}

/// Smallest and largest non-null value of `array`; NaN is left out.
fn value_range(array: &dyn Array) -> Result<Option<(Literal, Literal)>> {
    let range = match array.data_type() {
        DataType::Int32 => {
            let values = array.as_primitive::<Int32Type>();
            compute::min(values)
                .zip(compute::max(values))
                .map(|(lo, hi)| (Literal::from(lo), Literal::from(hi)))
        }
        DataType::Int64 => {
            let values = array.as_primitive::<Int64Type>();
            compute::min(values)
                .zip(compute::max(values))
                .map(|(lo, hi)| (Literal::from(lo), Literal::from(hi)))
        }
        DataType::Float64 => {
            let values = array.as_primitive::<Float64Type>();
            let numbers = BooleanArray::from_unary(values, |v| !v.is_nan());
            let kept = compute::filter(values, &numbers)?;
            let kept = kept.as_primitive::<Float64Type>();
            compute::min(kept)
                .zip(compute::max(kept))
                .map(|(lo, hi)| (Literal::from(lo), Literal::from(hi)))
        }
        DataType::Utf8 => {
            let values = array.as_string::<i32>();
            compute::min_string(values)
                .zip(compute::max_string(values))
                .map(|(lo, hi)| (Literal::from(lo), Literal::from(hi)))
        }
        DataType::Boolean => {
            let values = array.as_boolean();
            compute::min_boolean(values)
                .zip(compute::max_boolean(values))
                .map(|(lo, hi)| (Literal::from(lo), Literal::from(hi)))
        }
        other => {
            return Err(Error::NotImplemented(format!(
                "column storage for type {other:?}"
            )));
        }
    };
    Ok(range)
}

/// Zonemaps exist for numeric and string columns only.
pub fn ensure_comparator(data_type: &DataType) -> Result<()> {
    match data_type {
        DataType::Int32 | DataType::Int64 | DataType::Float64 | DataType::Utf8 => Ok(()),
        other => Err(Error::NotImplemented(format!(
            "unimplemented type for zonemaps: {other:?}"
        ))),
    }
}
