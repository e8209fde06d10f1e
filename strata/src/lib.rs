//! strata: a transactional columnar storage core with a parallel executor.
//!
//! This crate is the entry point of the workspace. It wires the
//! `strata-*` crates together behind an [`Engine`] and re-exports the types a
//! caller needs to define tables, write rows and run physical plans.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use arrow::array::{Int64Array, RecordBatch};
//! use arrow::datatypes::DataType;
//! use strata::{ColumnDefinition, Engine, EngineConfig, PlanRef, TableDefinition, TableScanExec};
//!
//! let engine = Engine::new(EngineConfig { threads: 2, ..EngineConfig::default() }).unwrap();
//! let table = engine
//!     .create_table(
//!         TableDefinition::new("main", "numbers")
//!             .with_column(ColumnDefinition::new("n", DataType::Int64)),
//!     )
//!     .unwrap();
//!
//! let txn = engine.begin();
//! let batch = RecordBatch::try_new(
//!     table.definition().arrow_schema(),
//!     vec![Arc::new(Int64Array::from(vec![1, 2, 3]))],
//! )
//! .unwrap();
//! table.append(&txn, &batch).unwrap();
//! engine.commit(&txn).unwrap();
//!
//! let plan: PlanRef = Arc::new(TableScanExec::new(table, vec![0], Vec::new()).unwrap());
//! let batches = engine.execute(&engine.begin(), &plan).unwrap();
//! assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 3);
//! ```
//!
//! # Architecture
//!
//! - **Storage** (`strata-column-map`): per-column segments with zonemaps.
//! - **Tables** (`strata-table`): MVCC row versions, constraints, indexes,
//!   copy-on-write schema changes, pruned and parallel scans.
//! - **Transactions** (`strata-transaction`): ids, timestamps, undo logs.
//! - **Execution** (`strata-scheduler`, `strata-executor`): a worker pool and
//!   dependency-ordered pipelines of physical operators.
#![forbid(unsafe_code)]

pub mod config;
mod engine;

pub use config::EngineConfig;
pub use engine::Engine;

pub use strata_executor::{
    AggregateExpr, AggregateFunction, ComparisonJoinExec, ExecutionContext, Executor, FilterExec,
    InterruptHandle, JoinCondition, PhysicalPlan, PlanRef, SimpleAggregateExec, TableScanExec,
};
pub use strata_result::{Error, Result};
pub use strata_scheduler::TaskScheduler;
pub use strata_table::{
    BoundConstraint, ColumnDefinition, Index, StorageConfig, Table, TableDefinition, expr,
};
pub use strata_transaction::{Transaction, TransactionManager, TxnId};
pub use strata_types::{
    ColumnId, CompareOp, Literal, ROW_ID_COLUMN_ID, RowId, STANDARD_VECTOR_SIZE, TableFilter,
};
