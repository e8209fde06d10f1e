use std::any::Any;
use std::fmt;
use std::sync::Arc;

use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use strata_result::{Error, Result};
use strata_table::ExprRef;
use strata_table::expr::compare;
use strata_types::{CompareOp, Literal};

use crate::context::ExecutionContext;
use crate::physical_plan::{PhysicalPlan, PlanRef};
use crate::pipeline::{PhysicalOperator, PipelineBuilder, PipelineId};

/// Keeps rows where `input[column] <op> constant` holds. NULL never passes.
pub struct FilterExec {
    pub input: PlanRef,
    pub column: usize,
    pub op: CompareOp,
    pub constant: Literal,
}

impl FilterExec {
    pub fn new(input: PlanRef, column: usize, op: CompareOp, constant: impl Into<Literal>) -> Result<Self> {
        let width = input.schema().fields().len();
        if column >= width {
            return Err(Error::InvalidArgumentError(format!(
                "filter column {column} out of range for a {width}-column input"
            )));
        }
        Ok(Self {
            input,
            column,
            op,
            constant: constant.into(),
        })
    }
}

impl fmt::Debug for FilterExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterExec")
            .field("column", &self.column)
            .field("op", &self.op)
            .field("constant", &self.constant)
            .finish()
    }
}

impl PhysicalPlan for FilterExec {
    fn schema(&self) -> SchemaRef {
        self.input.schema()
    }

    fn children(&self) -> Vec<PlanRef> {
        vec![Arc::clone(&self.input)]
    }

    fn build_pipelines(&self, builder: &mut PipelineBuilder, current: PipelineId) -> Result<()> {
        self.input.build_pipelines(builder, current)?;
        builder.push_operator(
            current,
            Arc::new(FilterOperator {
                predicate: compare(self.column, self.op, self.constant.clone()),
            }),
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct FilterOperator {
    predicate: ExprRef,
}

impl PhysicalOperator for FilterOperator {
    fn execute(&self, _ctx: &ExecutionContext, batch: RecordBatch) -> Result<Option<RecordBatch>> {
        let mask = self.predicate.evaluate(&batch)?;
        let mask = mask
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| Error::Internal("filter predicate is not boolean".into()))?;
        let out = filter_record_batch(&batch, mask)?;
        Ok((out.num_rows() > 0).then_some(out))
    }
}
