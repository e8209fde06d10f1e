//! Inner join on arbitrary comparison conditions.
//!
//! The right child is materialized by its own pipeline into a
//! [`JoinBuildSink`]; the left child streams through a
//! [`ComparisonJoinProbe`] that compares every probe row against the whole
//! build side. The probe pipeline depends on the build pipeline.
//!
//! Both sides of a condition are cast to one key type up front, so the
//! comparison kernels always see matching array types.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Scalar, UInt32Array};
use arrow::compute::{and, cast, concat_batches, filter, take};
use arrow::datatypes::{DataType, Schema, SchemaRef, UInt32Type};
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use strata_result::{Error, Result};
use strata_types::CompareOp;

use crate::context::ExecutionContext;
use crate::physical_plan::{PhysicalPlan, PlanRef};
use crate::pipeline::{
    LocalSink, PhysicalOperator, PhysicalSink, PipelineBuilder, PipelineId,
};

/// `left[left] <op> right[right]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinCondition {
    pub left: usize,
    pub op: CompareOp,
    pub right: usize,
}

impl JoinCondition {
    pub fn new(left: usize, op: CompareOp, right: usize) -> Self {
        Self { left, op, right }
    }
}

/// Type both sides of a condition are compared in. Integers widen to
/// `Int64`, and any float side makes the comparison `Float64`.
fn key_type(left: &DataType, right: &DataType) -> Result<DataType> {
    use DataType::{Float32, Float64, Int8, Int16, Int32, Int64, UInt8, UInt16, UInt32};
    if left == right {
        return Ok(left.clone());
    }
    let integer = |t: &DataType| matches!(t, Int8 | Int16 | Int32 | Int64 | UInt8 | UInt16 | UInt32);
    let float = |t: &DataType| matches!(t, Float32 | Float64);
    match (left, right) {
        (l, r) if integer(l) && integer(r) => Ok(Int64),
        (l, r) if (integer(l) || float(l)) && (integer(r) || float(r)) => Ok(Float64),
        _ => Err(Error::InvalidArgumentError(format!(
            "join condition cannot compare {left:?} with {right:?}"
        ))),
    }
}

/// A condition with its resolved key type.
#[derive(Clone, Debug)]
struct BoundCondition {
    condition: JoinCondition,
    key_type: DataType,
}

pub struct ComparisonJoinExec {
    pub left: PlanRef,
    pub right: PlanRef,
    pub conditions: Vec<JoinCondition>,
    pub schema: SchemaRef,
}

impl ComparisonJoinExec {
    pub fn new(left: PlanRef, right: PlanRef, conditions: Vec<JoinCondition>) -> Result<Self> {
        if conditions.is_empty() {
            return Err(Error::InvalidArgumentError(
                "a comparison join needs at least one condition".into(),
            ));
        }
        let (left_schema, right_schema) = (left.schema(), right.schema());
        for c in &conditions {
            if c.left >= left_schema.fields().len() || c.right >= right_schema.fields().len() {
                return Err(Error::InvalidArgumentError(format!(
                    "join condition {c:?} references a missing column"
                )));
            }
            key_type(
                left_schema.field(c.left).data_type(),
                right_schema.field(c.right).data_type(),
            )?;
        }
        let fields: Vec<_> = left_schema
            .fields()
            .iter()
            .chain(right_schema.fields().iter())
            .cloned()
            .collect();
        Ok(Self {
            left,
            right,
            conditions,
            schema: Arc::new(Schema::new(fields)),
        })
    }
}

impl fmt::Debug for ComparisonJoinExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComparisonJoinExec")
            .field("conditions", &self.conditions)
            .field("schema", &self.schema)
            .finish()
    }
}

impl PhysicalPlan for ComparisonJoinExec {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn children(&self) -> Vec<PlanRef> {
        vec![Arc::clone(&self.left), Arc::clone(&self.right)]
    }

    fn build_pipelines(&self, builder: &mut PipelineBuilder, current: PipelineId) -> Result<()> {
        let (left_schema, right_schema) = (self.left.schema(), self.right.schema());
        let conditions = self
            .conditions
            .iter()
            .map(|&condition| {
                Ok(BoundCondition {
                    condition,
                    key_type: key_type(
                        left_schema.field(condition.left).data_type(),
                        right_schema.field(condition.right).data_type(),
                    )?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let build = Arc::new(JoinBuildState::new(right_schema, conditions.clone()));
        let build_pipeline = builder.add_pipeline(Arc::new(JoinBuildSink {
            state: Arc::clone(&build),
        }));
        self.right.build_pipelines(builder, build_pipeline)?;

        self.left.build_pipelines(builder, current)?;
        builder.push_operator(
            current,
            Arc::new(ComparisonJoinProbe {
                build,
                conditions,
                schema: Arc::clone(&self.schema),
            }),
        )?;
        builder.add_dependency(current, build_pipeline)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The materialized build side.
struct BuildTable {
    batch: RecordBatch,
    /// Condition columns cast to their key types, in condition order.
    keys: Vec<ArrayRef>,
    /// `0..rows`, filtered by a match mask to get matching build rows.
    positions: UInt32Array,
}

pub struct JoinBuildState {
    schema: SchemaRef,
    conditions: Vec<BoundCondition>,
    partial: Mutex<Vec<RecordBatch>>,
    table: OnceLock<BuildTable>,
}

impl JoinBuildState {
    fn new(schema: SchemaRef, conditions: Vec<BoundCondition>) -> Self {
        Self {
            schema,
            conditions,
            partial: Mutex::new(Vec::new()),
            table: OnceLock::new(),
        }
    }
}

/// Materializes the build side. Parallel: every task collects its own
/// batches and hands them over on combine.
pub struct JoinBuildSink {
    state: Arc<JoinBuildState>,
}

impl PhysicalSink for JoinBuildSink {
    fn is_parallel(&self) -> bool {
        true
    }

    fn local_sink(&self) -> Box<dyn LocalSink> {
        Box::new(JoinBuildLocal {
            batches: Vec::new(),
            state: Arc::clone(&self.state),
        })
    }

    fn finalize(&self) -> Result<()> {
        let batches = std::mem::take(&mut *self.state.partial.lock());
        let batch = concat_batches(&self.state.schema, &batches)?;
        let keys = self
            .state
            .conditions
            .iter()
            .map(|c| Ok(cast(batch.column(c.condition.right).as_ref(), &c.key_type)?))
            .collect::<Result<Vec<_>>>()?;
        let positions = UInt32Array::from_iter_values(0..batch.num_rows() as u32);
        tracing::debug!(rows = batch.num_rows(), "join build side finalized");
        self.state
            .table
            .set(BuildTable {
                batch,
                keys,
                positions,
            })
            .map_err(|_| Error::Internal("join build side finalized twice".into()))
    }
}

struct JoinBuildLocal {
    batches: Vec<RecordBatch>,
    state: Arc<JoinBuildState>,
}

impl LocalSink for JoinBuildLocal {
    fn sink(&mut self, _ctx: &ExecutionContext, batch: RecordBatch) -> Result<()> {
        self.batches.push(batch);
        Ok(())
    }

    fn combine(self: Box<Self>) -> Result<()> {
        self.state.partial.lock().extend(self.batches);
        Ok(())
    }
}

pub struct ComparisonJoinProbe {
    build: Arc<JoinBuildState>,
    conditions: Vec<BoundCondition>,
    schema: SchemaRef,
}

impl ComparisonJoinProbe {
    /// Mask over the build rows matching probe row `row` on every condition.
    /// `None` when a probe key is NULL.
    fn matches(&self, probe_keys: &[ArrayRef], row: usize, build: &BuildTable) -> Result<Option<BooleanArray>> {
        let mut mask: Option<BooleanArray> = None;
        for ((bound, probe_key), build_key) in self.conditions.iter().zip(probe_keys).zip(&build.keys) {
            if probe_key.is_null(row) {
                return Ok(None);
            }
            let value = Scalar::new(probe_key.slice(row, 1));
            // probe <op> build  <=>  build <flipped op> probe
            let hits = bound.condition.op.flip().evaluate(build_key, &value)?;
            mask = Some(match mask {
                None => hits,
                Some(prev) => and(&prev, &hits)?,
            });
        }
        Ok(mask)
    }
}

impl PhysicalOperator for ComparisonJoinProbe {
    fn execute(&self, _ctx: &ExecutionContext, batch: RecordBatch) -> Result<Option<RecordBatch>> {
        let build = self
            .build
            .table
            .get()
            .ok_or_else(|| Error::Internal("join probed before its build side finished".into()))?;
        if build.batch.num_rows() == 0 || batch.num_rows() == 0 {
            return Ok(None);
        }
        let probe_keys = self
            .conditions
            .iter()
            .map(|c| Ok(cast(batch.column(c.condition.left).as_ref(), &c.key_type)?))
            .collect::<Result<Vec<_>>>()?;

        let mut probe_rows: Vec<u32> = Vec::new();
        let mut build_rows: Vec<u32> = Vec::new();
        for row in 0..batch.num_rows() {
            let Some(mask) = self.matches(&probe_keys, row, build)? else {
                continue;
            };
            let hits = filter(&build.positions, &mask)?;
            let hits = hits.as_primitive::<UInt32Type>();
            probe_rows.extend(std::iter::repeat_n(row as u32, hits.len()));
            build_rows.extend(hits.values().iter().copied());
        }
        if probe_rows.is_empty() {
            return Ok(None);
        }

        let probe_rows = UInt32Array::from(probe_rows);
        let build_rows = UInt32Array::from(build_rows);
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.schema.fields().len());
        for column in batch.columns() {
            columns.push(take(column.as_ref(), &probe_rows, None)?);
        }
        for column in build.batch.columns() {
            columns.push(take(column.as_ref(), &build_rows, None)?);
        }
        Ok(Some(RecordBatch::try_new(Arc::clone(&self.schema), columns)?))
    }
}
