//! Column storage for strata tables.
//!
//! A [`ColumnStore`] holds one column as an ordered chain of fixed-capacity
//! segments. Segments only grow (append) or are truncated (revert); values
//! can be replaced in place (update). Each segment keeps min/max statistics
//! ([`ZoneMap`]) so filtered scans can skip whole segments.
//!
//! Segment data is held as Arrow arrays; windows, gathers and filters are
//! produced with the `arrow::compute` slice, take, filter and comparison
//! kernels.
#![forbid(unsafe_code)]

pub mod column_store;
pub mod segment;
pub mod zonemap;

pub use column_store::{ColumnScanState, ColumnStore};
pub use segment::{Segment, SegmentId};
pub use strata_result::{Error, Result};
pub use zonemap::ZoneMap;

use arrow::datatypes::DataType;

/// Column types the store can hold.
pub fn is_supported_type(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int32 | DataType::Int64 | DataType::Float64 | DataType::Utf8 | DataType::Boolean
    )
}
