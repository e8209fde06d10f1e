//! Parallel query execution for strata.
//!
//! A tree of [`PhysicalPlan`] nodes is broken into [`Pipeline`]s: each runs a
//! source through streaming operators into a sink. Nodes that must see all of
//! their input before producing output (a join's build side, an aggregate)
//! end a pipeline and start a new one that depends on it. Pipelines fan out
//! into one task per source partition on the shared
//! [`TaskScheduler`](strata_scheduler::TaskScheduler).
//!
//! ```text
//!   scan(orders) -> probe ----------------> collect      (root)
//!                     ^ depends on
//!   scan(customers) -> join build sink                    (build)
//! ```
//!
//! The [`Executor`] schedules every pipeline without unfinished
//! dependencies, then helps drain the task queue until the root pipeline
//! finished or a pipeline failed. A failure is returned only after every
//! task of the query has stopped running.
#![forbid(unsafe_code)]

pub mod context;
pub mod executor;
pub mod physical_plan;
pub mod pipeline;

pub use context::{ExecutionContext, InterruptHandle};
pub use executor::Executor;
pub use physical_plan::aggregate::{AggregateExpr, AggregateFunction, SimpleAggregateExec};
pub use physical_plan::collect::CollectSink;
pub use physical_plan::filter::FilterExec;
pub use physical_plan::join::{ComparisonJoinExec, JoinCondition};
pub use physical_plan::scan::TableScanExec;
pub use physical_plan::{PhysicalPlan, PlanRef};
pub use pipeline::{
    LocalSink, PhysicalOperator, PhysicalSink, PhysicalSource, Pipeline, PipelineBuilder,
    PipelineId, PipelineState, SourcePartition,
};

pub use strata_result::{Error, Result};
