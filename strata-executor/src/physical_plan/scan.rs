use std::any::Any;
use std::fmt;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use strata_result::Result;
use strata_table::{ParallelTableScanState, Table, TableScanState};
use strata_types::{ColumnId, TableFilter};

use crate::context::ExecutionContext;
use crate::physical_plan::{PhysicalPlan, PlanRef};
use crate::pipeline::{PhysicalSource, PipelineBuilder, PipelineId, SourcePartition};

/// Scan of `column_ids` with pushed-down `filters`.
///
/// Every partition pulls morsels from one shared cursor until the table is
/// exhausted, so the number of tasks and the morsel size vary independently.
pub struct TableScanExec {
    pub table: Arc<Table>,
    pub column_ids: Vec<ColumnId>,
    pub filters: Vec<TableFilter>,
    pub schema: SchemaRef,
}

impl TableScanExec {
    pub fn new(table: Arc<Table>, column_ids: Vec<ColumnId>, filters: Vec<TableFilter>) -> Result<Self> {
        let schema = table.definition().projected_schema(&column_ids)?;
        Ok(Self {
            table,
            column_ids,
            filters,
            schema,
        })
    }
}

impl fmt::Debug for TableScanExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableScanExec")
            .field("table", &self.table.definition().qualified_name())
            .field("column_ids", &self.column_ids)
            .field("filters", &self.filters)
            .finish()
    }
}

impl PhysicalPlan for TableScanExec {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn children(&self) -> Vec<PlanRef> {
        Vec::new()
    }

    fn build_pipelines(&self, builder: &mut PipelineBuilder, current: PipelineId) -> Result<()> {
        builder.set_source(
            current,
            Arc::new(TableScanSource {
                table: Arc::clone(&self.table),
                column_ids: self.column_ids.clone(),
                filters: self.filters.clone(),
            }),
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct TableScanSource {
    table: Arc<Table>,
    column_ids: Vec<ColumnId>,
    filters: Vec<TableFilter>,
}

impl PhysicalSource for TableScanSource {
    fn max_threads(&self) -> usize {
        self.table.max_threads()
    }

    fn partitions(&self, _ctx: &ExecutionContext, count: usize) -> Result<Vec<Box<dyn SourcePartition>>> {
        let parallel = Arc::new(self.table.initialize_parallel_scan());
        tracing::trace!(
            table = %self.table.info().table_name(),
            partitions = count,
            morsel_rows = parallel.morsel_rows(),
            "splitting table scan"
        );
        Ok((0..count.max(1))
            .map(|_| {
                Box::new(TableScanPartition {
                    table: Arc::clone(&self.table),
                    column_ids: self.column_ids.clone(),
                    filters: self.filters.clone(),
                    parallel: Arc::clone(&parallel),
                    state: None,
                }) as Box<dyn SourcePartition>
            })
            .collect())
    }
}

struct TableScanPartition {
    table: Arc<Table>,
    column_ids: Vec<ColumnId>,
    filters: Vec<TableFilter>,
    parallel: Arc<ParallelTableScanState>,
    /// Scan of the morsel currently being drained.
    state: Option<TableScanState>,
}

impl SourcePartition for TableScanPartition {
    fn next_batch(&mut self, ctx: &ExecutionContext) -> Result<Option<RecordBatch>> {
        loop {
            if self.state.is_none() {
                self.state = self.table.next_parallel_scan(
                    &self.parallel,
                    &self.column_ids,
                    self.filters.clone(),
                )?;
            }
            let Some(state) = self.state.as_mut() else {
                return Ok(None);
            };
            if let Some(batch) = self.table.scan(ctx.transaction(), state)? {
                return Ok(Some(batch));
            }
            self.state = None;
        }
    }
}
