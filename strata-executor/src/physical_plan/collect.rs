use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use strata_result::Result;

use crate::context::ExecutionContext;
use crate::pipeline::{LocalSink, PhysicalSink};

/// Root sink gathering the query result. Runs as a single task so batches
/// arrive in scan order.
pub struct CollectSink {
    schema: SchemaRef,
    batches: Arc<Mutex<Vec<RecordBatch>>>,
}

impl CollectSink {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub fn take_batches(&self) -> Vec<RecordBatch> {
        std::mem::take(&mut *self.batches.lock())
    }
}

impl PhysicalSink for CollectSink {
    fn is_parallel(&self) -> bool {
        false
    }

    fn local_sink(&self) -> Box<dyn LocalSink> {
        Box::new(CollectLocal {
            batches: Vec::new(),
            target: Arc::clone(&self.batches),
        })
    }

    fn finalize(&self) -> Result<()> {
        Ok(())
    }
}

struct CollectLocal {
    batches: Vec<RecordBatch>,
    target: Arc<Mutex<Vec<RecordBatch>>>,
}

impl LocalSink for CollectLocal {
    fn sink(&mut self, _ctx: &ExecutionContext, batch: RecordBatch) -> Result<()> {
        self.batches.push(batch);
        Ok(())
    }

    fn combine(self: Box<Self>) -> Result<()> {
        self.target.lock().extend(self.batches);
        Ok(())
    }
}
