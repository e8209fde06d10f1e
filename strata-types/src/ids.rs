//! Identifiers and sizing constants.

/// Position of a row within a table. Row ids are assigned in strictly
/// increasing append order and are never reused.
pub type RowId = u64;

/// Index of a column inside a table's schema.
pub type ColumnId = usize;

/// Pseudo column id that asks a scan or fetch for the row id itself.
pub const ROW_ID_COLUMN_ID: ColumnId = ColumnId::MAX;

/// Canonical Arrow field name for the synthesized row-id column.
pub const ROW_ID_COLUMN_NAME: &str = "rowid";

/// Number of rows processed per vector (one scan window).
pub const STANDARD_VECTOR_SIZE: usize = 1024;

/// Vectors covered by a single version chunk.
pub const VERSION_CHUNK_VECTOR_COUNT: usize = 100;

/// Rows covered by a single version chunk.
pub const VERSION_CHUNK_SIZE: usize = STANDARD_VECTOR_SIZE * VERSION_CHUNK_VECTOR_COUNT;

#[inline]
pub fn is_row_id_column(column_id: ColumnId) -> bool {
    column_id == ROW_ID_COLUMN_ID
}
