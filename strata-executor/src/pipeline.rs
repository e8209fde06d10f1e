//! Pipelines and their life cycle.
//!
//! A pipeline is a source, a chain of streaming operators and a sink. It is
//! scheduled once every pipeline it depends on has finished, fans out into
//! one task per source partition, and finalizes its sink exactly once after
//! the last task completed.
//!
//! ```text
//! Pending -> Scheduled -> Running -> Finalizing -> Finished
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use strata_result::{Error, Result};
use strata_scheduler::ProducerToken;

use crate::context::ExecutionContext;

pub type PipelineId = usize;

/// One independently scannable slice of a source.
pub trait SourcePartition: Send {
    fn next_batch(&mut self, ctx: &ExecutionContext) -> Result<Option<RecordBatch>>;
}

pub trait PhysicalSource: Send + Sync {
    /// How many partitions the source can usefully be split into.
    fn max_threads(&self) -> usize {
        1
    }

    /// Split into at most `count` partitions. Called when the pipeline is
    /// scheduled, so state produced by dependencies is available.
    fn partitions(
        &self,
        ctx: &ExecutionContext,
        count: usize,
    ) -> Result<Vec<Box<dyn SourcePartition>>>;
}

pub trait PhysicalOperator: Send + Sync {
    /// Transform one batch; `None` drops it.
    fn execute(&self, ctx: &ExecutionContext, batch: RecordBatch) -> Result<Option<RecordBatch>>;
}

/// Per-task sink state.
pub trait LocalSink: Send {
    fn sink(&mut self, ctx: &ExecutionContext, batch: RecordBatch) -> Result<()>;

    /// Merge into the shared sink state once the task's partition is drained.
    fn combine(self: Box<Self>) -> Result<()>;
}

pub trait PhysicalSink: Send + Sync {
    /// Whether partial states of concurrent tasks can be combined. A sink
    /// that is not parallel gets a single task, which keeps batch order.
    fn is_parallel(&self) -> bool;

    fn local_sink(&self) -> Box<dyn LocalSink>;

    /// Called once, after every task combined its local state.
    fn finalize(&self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Pending = 0,
    Scheduled = 1,
    Running = 2,
    Finalizing = 3,
    Finished = 4,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Pending,
            1 => PipelineState::Scheduled,
            2 => PipelineState::Running,
            3 => PipelineState::Finalizing,
            _ => PipelineState::Finished,
        }
    }
}

struct EmptyPartition;

impl SourcePartition for EmptyPartition {
    fn next_batch(&mut self, _ctx: &ExecutionContext) -> Result<Option<RecordBatch>> {
        Ok(None)
    }
}

pub struct Pipeline {
    id: PipelineId,
    source: Arc<dyn PhysicalSource>,
    operators: Vec<Arc<dyn PhysicalOperator>>,
    sink: Arc<dyn PhysicalSink>,
    /// Pipelines waiting on this one.
    dependents: Vec<PipelineId>,
    pending_dependencies: AtomicUsize,
    state: AtomicU8,
    total_tasks: AtomicUsize,
    finished_tasks: AtomicUsize,
    error: Mutex<Option<Error>>,
}

impl Pipeline {
    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn pending_dependencies(&self) -> usize {
        self.pending_dependencies.load(Ordering::Acquire)
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Fan out into tasks. A no-op unless the pipeline is still pending.
    pub(crate) fn schedule(self: &Arc<Self>, run: &Arc<QueryRun>) -> Result<()> {
        if run.should_stop() {
            return Ok(());
        }
        if self
            .state
            .compare_exchange(
                PipelineState::Pending as u8,
                PipelineState::Scheduled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }

        let units = if self.sink.is_parallel() {
            self.source.max_threads().min(run.parallelism).max(1)
        } else {
            1
        };
        let mut partitions = self.source.partitions(&run.ctx, units)?;
        if partitions.is_empty() {
            partitions.push(Box::new(EmptyPartition));
        }
        let total = partitions.len();
        self.total_tasks.store(total, Ordering::Release);
        run.in_flight.fetch_add(total, Ordering::AcqRel);
        self.set_state(PipelineState::Running);
        tracing::debug!(pipeline = self.id, tasks = total, "pipeline scheduled");

        for partition in partitions {
            let pipeline = Arc::clone(self);
            let task_run = Arc::clone(run);
            let task = Box::new(move || pipeline.run_task(&task_run, partition));
            if let Err(err) = run.token.enqueue(task) {
                run.in_flight.fetch_sub(1, Ordering::AcqRel);
                run.fail(err);
            }
        }
        Ok(())
    }

    fn run_task(&self, run: &Arc<QueryRun>, partition: Box<dyn SourcePartition>) {
        let outcome = if run.should_stop() {
            Err(Error::Interrupted)
        } else {
            catch_unwind(AssertUnwindSafe(|| self.execute_partition(run, partition)))
                .unwrap_or_else(|_| {
                    Err(Error::Internal(format!("task of pipeline {} panicked", self.id)))
                })
        };
        if let Err(err) = outcome {
            let mut slot = self.error.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        let done = self.finished_tasks.fetch_add(1, Ordering::AcqRel) + 1;
        if done == self.total_tasks.load(Ordering::Acquire) {
            self.finish(run);
        }
        run.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn execute_partition(
        &self,
        run: &QueryRun,
        mut partition: Box<dyn SourcePartition>,
    ) -> Result<()> {
        let ctx = &run.ctx;
        let mut local = self.sink.local_sink();
        while let Some(batch) = partition.next_batch(ctx)? {
            if run.should_stop() {
                return Err(Error::Interrupted);
            }
            let mut current = Some(batch);
            for operator in &self.operators {
                let Some(batch) = current.take() else { break };
                current = operator.execute(ctx, batch)?;
            }
            if let Some(batch) = current {
                local.sink(ctx, batch)?;
            }
        }
        local.combine()
    }

    /// Runs on the thread that completed the last task.
    fn finish(&self, run: &Arc<QueryRun>) {
        self.set_state(PipelineState::Finalizing);
        let task_error = self.error.lock().take();
        if let Some(err) = task_error {
            self.set_state(PipelineState::Finished);
            tracing::debug!(pipeline = self.id, error = %err, "pipeline failed");
            run.fail(err);
            return;
        }
        let finalized = catch_unwind(AssertUnwindSafe(|| self.sink.finalize())).unwrap_or_else(
            |_| Err(Error::Internal(format!("sink of pipeline {} panicked", self.id))),
        );
        self.set_state(PipelineState::Finished);
        if let Err(err) = finalized {
            run.fail(err);
            return;
        }
        tracing::debug!(pipeline = self.id, "pipeline finished");
        run.finished.fetch_add(1, Ordering::AcqRel);

        for &dependent in &self.dependents {
            let parent = &run.pipelines[dependent];
            if parent.pending_dependencies.fetch_sub(1, Ordering::AcqRel) == 1 {
                if let Err(err) = parent.schedule(run) {
                    run.fail(err);
                }
            }
        }
    }
}

/// Shared state of one query execution.
pub(crate) struct QueryRun {
    pub(crate) pipelines: Vec<Arc<Pipeline>>,
    pub(crate) ctx: ExecutionContext,
    token: ProducerToken,
    parallelism: usize,
    finished: AtomicUsize,
    in_flight: AtomicUsize,
    cancelled: AtomicBool,
    error: Mutex<Option<Error>>,
}

impl QueryRun {
    pub(crate) fn new(
        pipelines: Vec<Arc<Pipeline>>,
        ctx: ExecutionContext,
        token: ProducerToken,
        parallelism: usize,
    ) -> Self {
        Self {
            pipelines,
            ctx,
            token,
            parallelism: parallelism.max(1),
            finished: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    /// Record `err` (the first one wins) and stop everything still running.
    pub(crate) fn fail(&self, err: Error) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            tracing::debug!(error = %err, "query failed");
            *slot = Some(err);
        }
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.ctx.is_interrupted()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.finished.load(Ordering::Acquire) == self.pipelines.len()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// The error to report once no task is left running, if any.
    pub(crate) fn drained_error(&self) -> Option<Error> {
        if self.in_flight() != 0 || !self.should_stop() {
            return None;
        }
        Some(self.error.lock().take().unwrap_or(Error::Interrupted))
    }
}

struct PipelineSpec {
    source: Option<Arc<dyn PhysicalSource>>,
    operators: Vec<Arc<dyn PhysicalOperator>>,
    sink: Arc<dyn PhysicalSink>,
    dependencies: Vec<PipelineId>,
}

/// Collects pipelines while a plan is walked.
#[derive(Default)]
pub struct PipelineBuilder {
    specs: Vec<PipelineSpec>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Start a pipeline ending in `sink`. Its source and operators are
    /// supplied by the plan below it.
    pub fn add_pipeline(&mut self, sink: Arc<dyn PhysicalSink>) -> PipelineId {
        self.specs.push(PipelineSpec {
            source: None,
            operators: Vec::new(),
            sink,
            dependencies: Vec::new(),
        });
        self.specs.len() - 1
    }

    fn spec_mut(&mut self, id: PipelineId) -> Result<&mut PipelineSpec> {
        self.specs
            .get_mut(id)
            .ok_or_else(|| Error::Internal(format!("unknown pipeline {id}")))
    }

    pub fn set_source(&mut self, id: PipelineId, source: Arc<dyn PhysicalSource>) -> Result<()> {
        let spec = self.spec_mut(id)?;
        if spec.source.is_some() {
            return Err(Error::Internal(format!("pipeline {id} already has a source")));
        }
        spec.source = Some(source);
        Ok(())
    }

    /// Append an operator; operators run in the order they are pushed.
    pub fn push_operator(&mut self, id: PipelineId, operator: Arc<dyn PhysicalOperator>) -> Result<()> {
        self.spec_mut(id)?.operators.push(operator);
        Ok(())
    }

    /// `id` starts only after `depends_on` finished.
    pub fn add_dependency(&mut self, id: PipelineId, depends_on: PipelineId) -> Result<()> {
        self.spec_mut(depends_on)?;
        if id == depends_on {
            return Err(Error::Internal(format!("pipeline {id} cannot depend on itself")));
        }
        self.spec_mut(id)?.dependencies.push(depends_on);
        Ok(())
    }

    pub(crate) fn build(self) -> Result<Vec<Arc<Pipeline>>> {
        let n = self.specs.len();
        let mut dependents: Vec<Vec<PipelineId>> = vec![Vec::new(); n];
        for (id, spec) in self.specs.iter().enumerate() {
            for &dep in &spec.dependencies {
                dependents[dep].push(id);
            }
        }
        ensure_acyclic(&self.specs, &dependents)?;

        self.specs
            .into_iter()
            .zip(dependents)
            .enumerate()
            .map(|(id, (spec, dependents))| {
                let source = spec
                    .source
                    .ok_or_else(|| Error::Internal(format!("pipeline {id} has no source")))?;
                Ok(Arc::new(Pipeline {
                    id,
                    source,
                    operators: spec.operators,
                    sink: spec.sink,
                    dependents,
                    pending_dependencies: AtomicUsize::new(spec.dependencies.len()),
                    state: AtomicU8::new(PipelineState::Pending as u8),
                    total_tasks: AtomicUsize::new(0),
                    finished_tasks: AtomicUsize::new(0),
                    error: Mutex::new(None),
                }))
            })
            .collect()
    }
}

fn ensure_acyclic(specs: &[PipelineSpec], dependents: &[Vec<PipelineId>]) -> Result<()> {
    let mut waiting: Vec<usize> = specs.iter().map(|s| s.dependencies.len()).collect();
    let mut ready: Vec<PipelineId> = (0..specs.len()).filter(|&i| waiting[i] == 0).collect();
    let mut seen = 0;
    while let Some(id) = ready.pop() {
        seen += 1;
        for &d in &dependents[id] {
            waiting[d] -= 1;
            if waiting[d] == 0 {
                ready.push(d);
            }
        }
    }
    if seen != specs.len() {
        return Err(Error::Internal("pipeline dependencies form a cycle".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoSink;

    impl PhysicalSink for NoSink {
        fn is_parallel(&self) -> bool {
            false
        }
        fn local_sink(&self) -> Box<dyn LocalSink> {
            unreachable!()
        }
        fn finalize(&self) -> Result<()> {
            Ok(())
        }
    }

    struct NoSource;

    impl PhysicalSource for NoSource {
        fn partitions(&self, _: &ExecutionContext, _: usize) -> Result<Vec<Box<dyn SourcePartition>>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn build_rejects_cycles_and_missing_sources() {
        let mut builder = PipelineBuilder::new();
        let a = builder.add_pipeline(Arc::new(NoSink));
        let b = builder.add_pipeline(Arc::new(NoSink));
        builder.set_source(a, Arc::new(NoSource)).unwrap();
        assert!(builder.set_source(a, Arc::new(NoSource)).is_err());
        builder.set_source(b, Arc::new(NoSource)).unwrap();
        builder.add_dependency(a, b).unwrap();
        builder.add_dependency(b, a).unwrap();
        assert!(builder.build().is_err());

        let mut builder = PipelineBuilder::new();
        builder.add_pipeline(Arc::new(NoSink));
        assert!(builder.build().is_err());
        assert!(PipelineBuilder::new().add_dependency(0, 0).is_err());
    }

    #[test]
    fn dependents_are_recorded() {
        let mut builder = PipelineBuilder::new();
        let root = builder.add_pipeline(Arc::new(NoSink));
        let build = builder.add_pipeline(Arc::new(NoSink));
        builder.set_source(root, Arc::new(NoSource)).unwrap();
        builder.set_source(build, Arc::new(NoSource)).unwrap();
        builder.add_dependency(root, build).unwrap();
        let pipelines = builder.build().unwrap();
        assert_eq!(pipelines[build].dependents, vec![root]);
        assert_eq!(pipelines[root].pending_dependencies.load(Ordering::Relaxed), 1);
        assert_eq!(pipelines[root].state(), PipelineState::Pending);
    }
}
