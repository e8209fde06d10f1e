//! Transactional column tables for strata.
//!
//! A [`Table`] owns one [`ColumnStore`](strata_column_map::ColumnStore) per
//! column, shares a [`VersionChain`] of per-row insert/delete stamps with
//! every instance derived from it by a schema change, and maintains its
//! secondary [`Index`]es.
//!
//! # Writes
//!
//! - [`Table::append`]: constraints first, then reserve row ids under the
//!   append lock, insert index keys, write columns, register undo.
//! - [`Table::delete`]: stamp delete markers; conflicts are reported.
//! - [`Table::update`]: in-place, non-versioned value replacement.
//!
//! Commit and rollback reach the table through the
//! [`UndoEntry`](strata_transaction::UndoEntry) hooks it registers with the
//! transaction.
//!
//! # Reads
//!
//! [`Table::scan`] walks vector-sized windows, pruning segments with
//! zonemaps, filtering visibility through the version chain and evaluating
//! pushdown filters in adaptive order. [`Table::next_parallel_scan`] hands
//! out morsels to concurrent scanners.
#![forbid(unsafe_code)]

pub mod catalog;
pub mod config;
mod constraints;
pub mod expr;
pub mod index;
pub mod scan;
mod schema_change;
pub mod table;
mod undo;
pub mod version_chain;
pub mod version_chunk;

pub use catalog::{BoundConstraint, ColumnDefinition, TableDefinition};
pub use config::StorageConfig;
pub use expr::{ExprRef, Expression};
pub use index::{Index, IndexLock};
pub use scan::{AdaptiveFilter, ParallelTableScanState, TableScanState};
pub use table::{DataTableInfo, Table, TableAppendState, TableState};
pub use version_chain::{ChunkSnapshot, VersionChain, VersionChainGuard};
pub use version_chunk::VersionChunk;

pub use strata_result::{Error, Result};
