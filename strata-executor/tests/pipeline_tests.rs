use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use arrow::array::{Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use strata_executor::{
    Error, ExecutionContext, Executor, LocalSink, PhysicalSink, PhysicalSource, PipelineBuilder,
    Result, SourcePartition,
};
use strata_scheduler::TaskScheduler;
use strata_transaction::TransactionManager;

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]))
}

fn one_row(v: i64) -> RecordBatch {
    RecordBatch::try_new(schema(), vec![Arc::new(Int64Array::from(vec![v]))]).unwrap()
}

/// Partition behavior for [`TestSource`].
#[derive(Clone)]
enum Mode {
    /// Emit one row, then end.
    Single,
    /// Partition 0 fails; the others sleep, bump the counter and end.
    FailFirst(Arc<AtomicUsize>),
    /// Emit rows until stopped.
    Endless,
}

struct TestSource {
    max_threads: usize,
    mode: Mode,
    /// Set when `partitions` is called; records whether `gate` was already set.
    saw_gate: Option<(Arc<AtomicBool>, Arc<AtomicBool>)>,
}

impl TestSource {
    fn new(max_threads: usize, mode: Mode) -> Self {
        Self {
            max_threads,
            mode,
            saw_gate: None,
        }
    }
}

impl PhysicalSource for TestSource {
    fn max_threads(&self) -> usize {
        self.max_threads
    }

    fn partitions(&self, _ctx: &ExecutionContext, count: usize) -> Result<Vec<Box<dyn SourcePartition>>> {
        if let Some((gate, seen)) = &self.saw_gate {
            seen.store(gate.load(Ordering::SeqCst), Ordering::SeqCst);
        }
        Ok((0..count)
            .map(|index| {
                Box::new(TestPartition {
                    index,
                    mode: self.mode.clone(),
                    done: false,
                }) as Box<dyn SourcePartition>
            })
            .collect())
    }
}

struct TestPartition {
    index: usize,
    mode: Mode,
    done: bool,
}

impl SourcePartition for TestPartition {
    fn next_batch(&mut self, _ctx: &ExecutionContext) -> Result<Option<RecordBatch>> {
        match &self.mode {
            Mode::Single => {
                if self.done {
                    return Ok(None);
                }
                self.done = true;
                Ok(Some(one_row(self.index as i64)))
            }
            Mode::FailFirst(counter) => {
                if self.index == 0 {
                    return Err(Error::InvalidArgumentError("boom".into()));
                }
                thread::sleep(Duration::from_millis(20));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
            Mode::Endless => {
                thread::sleep(Duration::from_millis(1));
                Ok(Some(one_row(0)))
            }
        }
    }
}

#[derive(Default)]
struct CountingSink {
    parallel: bool,
    rows: Arc<AtomicUsize>,
    combines: Arc<AtomicUsize>,
    finalizes: Arc<AtomicUsize>,
    /// Raised on finalize.
    gate: Arc<AtomicBool>,
}

impl CountingSink {
    fn parallel() -> Self {
        Self {
            parallel: true,
            ..Self::default()
        }
    }
}

impl PhysicalSink for CountingSink {
    fn is_parallel(&self) -> bool {
        self.parallel
    }

    fn local_sink(&self) -> Box<dyn LocalSink> {
        Box::new(CountingLocal {
            rows: 0,
            total: Arc::clone(&self.rows),
            combines: Arc::clone(&self.combines),
        })
    }

    fn finalize(&self) -> Result<()> {
        self.finalizes.fetch_add(1, Ordering::SeqCst);
        self.gate.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct CountingLocal {
    rows: usize,
    total: Arc<AtomicUsize>,
    combines: Arc<AtomicUsize>,
}

impl LocalSink for CountingLocal {
    fn sink(&mut self, _ctx: &ExecutionContext, batch: RecordBatch) -> Result<()> {
        self.rows += batch.num_rows();
        Ok(())
    }

    fn combine(self: Box<Self>) -> Result<()> {
        self.total.fetch_add(self.rows, Ordering::SeqCst);
        self.combines.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn executor(threads: usize) -> Executor {
    Executor::new(Arc::new(TaskScheduler::new(threads).unwrap())).with_parallelism(64)
}

#[test]
fn test_parallel_sink_finalizes_exactly_once() {
    strata_test_utils::init_tracing_for_tests();
    let mgr = TransactionManager::new();
    let exec = executor(4);
    for k in [1usize, 4, 64] {
        let sink = Arc::new(CountingSink::parallel());
        let mut builder = PipelineBuilder::new();
        let id = builder.add_pipeline(Arc::clone(&sink) as _);
        builder
            .set_source(id, Arc::new(TestSource::new(k, Mode::Single)))
            .unwrap();

        let txn = mgr.begin();
        exec.run(&txn, builder).unwrap();
        assert_eq!(sink.finalizes.load(Ordering::SeqCst), 1, "k = {k}");
        assert_eq!(sink.combines.load(Ordering::SeqCst), k, "k = {k}");
        assert_eq!(sink.rows.load(Ordering::SeqCst), k, "k = {k}");
    }
}

#[test]
fn test_serial_sink_gets_one_task() {
    let mgr = TransactionManager::new();
    let sink = Arc::new(CountingSink::default());
    let mut builder = PipelineBuilder::new();
    let id = builder.add_pipeline(Arc::clone(&sink) as _);
    builder
        .set_source(id, Arc::new(TestSource::new(16, Mode::Single)))
        .unwrap();
    executor(4).run(&mgr.begin(), builder).unwrap();
    assert_eq!(sink.combines.load(Ordering::SeqCst), 1);
    assert_eq!(sink.finalizes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dependent_starts_after_dependency_finalized() {
    let mgr = TransactionManager::new();
    let build_sink = Arc::new(CountingSink::parallel());
    let probe_sink = Arc::new(CountingSink::default());
    let seen = Arc::new(AtomicBool::new(false));

    let mut builder = PipelineBuilder::new();
    let probe = builder.add_pipeline(Arc::clone(&probe_sink) as _);
    let build = builder.add_pipeline(Arc::clone(&build_sink) as _);
    let mut probe_source = TestSource::new(1, Mode::Single);
    probe_source.saw_gate = Some((Arc::clone(&build_sink.gate), Arc::clone(&seen)));
    builder.set_source(probe, Arc::new(probe_source)).unwrap();
    builder
        .set_source(build, Arc::new(TestSource::new(8, Mode::Single)))
        .unwrap();
    builder.add_dependency(probe, build).unwrap();

    executor(4).run(&mgr.begin(), builder).unwrap();
    assert!(seen.load(Ordering::SeqCst), "probe split before build finalized");
    assert_eq!(build_sink.rows.load(Ordering::SeqCst), 8);
    assert_eq!(probe_sink.finalizes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_error_is_reported_after_sibling_tasks_finish() {
    let mgr = TransactionManager::new();
    let k = 8;
    let counter = Arc::new(AtomicUsize::new(0));
    let sink = Arc::new(CountingSink::parallel());
    let mut builder = PipelineBuilder::new();
    let id = builder.add_pipeline(Arc::clone(&sink) as _);
    builder
        .set_source(id, Arc::new(TestSource::new(k, Mode::FailFirst(Arc::clone(&counter)))))
        .unwrap();

    let err = executor(4).run(&mgr.begin(), builder).unwrap_err();
    assert!(matches!(err, Error::InvalidArgumentError(ref msg) if msg == "boom"), "{err:?}");
    assert_eq!(counter.load(Ordering::SeqCst), k - 1);
    assert_eq!(sink.finalizes.load(Ordering::SeqCst), 0);
}

#[test]
fn test_failed_dependency_never_starts_dependent() {
    let mgr = TransactionManager::new();
    let seen = Arc::new(AtomicBool::new(false));
    let probe_sink = Arc::new(CountingSink::default());
    let mut builder = PipelineBuilder::new();
    let probe = builder.add_pipeline(Arc::clone(&probe_sink) as _);
    let build = builder.add_pipeline(Arc::new(CountingSink::parallel()));
    let mut probe_source = TestSource::new(1, Mode::Single);
    let gate = Arc::new(AtomicBool::new(true));
    probe_source.saw_gate = Some((gate, Arc::clone(&seen)));
    builder.set_source(probe, Arc::new(probe_source)).unwrap();
    builder
        .set_source(
            build,
            Arc::new(TestSource::new(2, Mode::FailFirst(Arc::new(AtomicUsize::new(0))))),
        )
        .unwrap();
    builder.add_dependency(probe, build).unwrap();

    assert!(executor(2).run(&mgr.begin(), builder).is_err());
    assert!(!seen.load(Ordering::SeqCst));
    assert_eq!(probe_sink.finalizes.load(Ordering::SeqCst), 0);
}

#[test]
fn test_interrupt_stops_running_query() {
    let mgr = TransactionManager::new();
    let exec = executor(2);
    let handle = exec.interrupt_handle();

    let mut builder = PipelineBuilder::new();
    let id = builder.add_pipeline(Arc::new(CountingSink::parallel()));
    builder
        .set_source(id, Arc::new(TestSource::new(4, Mode::Endless)))
        .unwrap();

    let interrupter = {
        let handle = handle.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            handle.interrupt();
        })
    };
    let err = exec.run(&mgr.begin(), builder).unwrap_err();
    interrupter.join().unwrap();
    assert!(matches!(err, Error::Interrupted), "{err:?}");

    // Still interrupted: the next query fails before scheduling anything.
    let sink = Arc::new(CountingSink::parallel());
    let mut builder = PipelineBuilder::new();
    let id = builder.add_pipeline(Arc::clone(&sink) as _);
    builder
        .set_source(id, Arc::new(TestSource::new(1, Mode::Single)))
        .unwrap();
    assert!(matches!(exec.run(&mgr.begin(), builder), Err(Error::Interrupted)));
    assert_eq!(sink.combines.load(Ordering::SeqCst), 0);

    handle.reset();
    let mut builder = PipelineBuilder::new();
    let id = builder.add_pipeline(Arc::clone(&sink) as _);
    builder
        .set_source(id, Arc::new(TestSource::new(1, Mode::Single)))
        .unwrap();
    exec.run(&mgr.begin(), builder).unwrap();
    assert_eq!(sink.finalizes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_zero_worker_scheduler_runs_on_caller() {
    let mgr = TransactionManager::new();
    let exec = Executor::new(Arc::new(TaskScheduler::new(0).unwrap()));
    let sink = Arc::new(CountingSink::parallel());
    let mut builder = PipelineBuilder::new();
    let id = builder.add_pipeline(Arc::clone(&sink) as _);
    builder
        .set_source(id, Arc::new(TestSource::new(8, Mode::Single)))
        .unwrap();
    exec.run(&mgr.begin(), builder).unwrap();
    // Parallelism follows the thread count, floored at one task.
    assert_eq!(sink.combines.load(Ordering::SeqCst), 1);
    assert_eq!(sink.finalizes.load(Ordering::SeqCst), 1);
}
