use std::sync::Arc;
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use strata_result::{Error, Result};
use strata_scheduler::TaskScheduler;
use strata_transaction::Transaction;

use crate::context::{ExecutionContext, InterruptHandle};
use crate::physical_plan::PlanRef;
use crate::physical_plan::collect::CollectSink;
use crate::pipeline::{PipelineBuilder, PipelineState, QueryRun};

/// How long the calling thread waits for a queued task before re-checking
/// whether the query is done.
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Turns physical plans into pipelines and runs them on a [`TaskScheduler`].
///
/// The calling thread takes part in execution: while waiting it pulls tasks
/// from the scheduler queue, so a scheduler without workers still makes
/// progress.
#[derive(Clone, Debug)]
pub struct Executor {
    scheduler: Arc<TaskScheduler>,
    parallelism: Option<usize>,
    interrupt: InterruptHandle,
}

impl Executor {
    pub fn new(scheduler: Arc<TaskScheduler>) -> Self {
        Self {
            scheduler,
            parallelism: None,
            interrupt: InterruptHandle::default(),
        }
    }

    /// Cap on tasks per pipeline. Defaults to the scheduler's thread count.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism.max(1));
        self
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// Run `plan` as of `txn` and return the rows of its root, in order.
    pub fn execute(&self, txn: &Arc<Transaction>, plan: &PlanRef) -> Result<Vec<RecordBatch>> {
        let mut builder = PipelineBuilder::new();
        let collector = Arc::new(CollectSink::new(plan.schema()));
        let root = builder.add_pipeline(Arc::clone(&collector) as _);
        plan.build_pipelines(&mut builder, root)?;
        self.run(txn, builder)?;
        Ok(collector.take_batches())
    }

    /// Run every pipeline in `builder` to completion.
    ///
    /// Returns the first error raised by any pipeline, reported only after
    /// all tasks of the failing pipeline finished.
    pub fn run(&self, txn: &Arc<Transaction>, builder: PipelineBuilder) -> Result<()> {
        let pipelines = builder.build()?;
        if pipelines.is_empty() {
            return Ok(());
        }
        let parallelism = self
            .parallelism
            .unwrap_or_else(|| self.scheduler.thread_count().max(1));
        let ctx = ExecutionContext::new(Arc::clone(txn), self.interrupt.clone());
        let run = Arc::new(QueryRun::new(
            pipelines,
            ctx,
            self.scheduler.create_producer(),
            parallelism,
        ));
        tracing::debug!(
            pipelines = run.pipelines.len(),
            parallelism,
            txn_id = txn.id(),
            "executing query"
        );

        for pipeline in &run.pipelines {
            if pipeline.state() == PipelineState::Pending && pipeline.pending_dependencies() == 0 {
                if let Err(err) = pipeline.schedule(&run) {
                    run.fail(err);
                }
            }
        }

        loop {
            if run.is_complete() {
                return Ok(());
            }
            if let Some(err) = run.drained_error() {
                return Err(err);
            }
            if run.in_flight() == 0 && !run.is_complete() && !run.should_stop() {
                return Err(Error::Internal(
                    "pipelines stalled with unfinished dependencies".into(),
                ));
            }
            self.scheduler.try_execute_one(DRAIN_POLL);
        }
    }
}
