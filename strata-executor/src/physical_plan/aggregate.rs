//! Ungrouped aggregates (`COUNT(*)`, `COUNT`, `SUM`, `MIN`, `MAX`).
//!
//! Partial states merge, so the aggregating pipeline runs one task per scan
//! partition. The single result row feeds the next pipeline through
//! [`AggregateResultSource`].

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array};
use arrow::compute::{cast, max, min, sum, sum_checked};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use strata_result::{Error, Result};

use crate::context::ExecutionContext;
use crate::physical_plan::{PhysicalPlan, PlanRef};
use crate::pipeline::{
    LocalSink, PhysicalSink, PhysicalSource, PipelineBuilder, PipelineId, SourcePartition,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateFunction {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateExpr {
    pub function: AggregateFunction,
    /// Input column; `None` only for `COUNT(*)`.
    pub column: Option<usize>,
    pub alias: String,
}

impl AggregateExpr {
    pub fn count_star(alias: impl Into<String>) -> Self {
        Self {
            function: AggregateFunction::CountStar,
            column: None,
            alias: alias.into(),
        }
    }

    pub fn new(function: AggregateFunction, column: usize, alias: impl Into<String>) -> Self {
        Self {
            function,
            column: Some(column),
            alias: alias.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NumericKind {
    Int,
    Float,
}

impl NumericKind {
    fn of(data_type: &DataType) -> Result<Self> {
        match data_type {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32 => Ok(NumericKind::Int),
            DataType::Float32 | DataType::Float64 => Ok(NumericKind::Float),
            other => Err(Error::NotImplemented(format!(
                "aggregates over {other:?} columns"
            ))),
        }
    }

    fn data_type(self) -> DataType {
        match self {
            NumericKind::Int => DataType::Int64,
            NumericKind::Float => DataType::Float64,
        }
    }
}

#[derive(Clone, Debug)]
enum Accumulator {
    Count(i64),
    IntSum(Option<i64>),
    FloatSum(Option<f64>),
    IntMin(Option<i64>),
    IntMax(Option<i64>),
    FloatMin(Option<f64>),
    FloatMax(Option<f64>),
}

fn merge_opt<T: Copy>(a: Option<T>, b: Option<T>, f: impl Fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(f(x, y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn int_overflow() -> Error {
    Error::InvalidArgumentError("integer overflow in SUM".into())
}

impl Accumulator {
    fn new(function: AggregateFunction, kind: Option<NumericKind>) -> Self {
        match (function, kind) {
            (AggregateFunction::CountStar | AggregateFunction::Count, _) => Accumulator::Count(0),
            (AggregateFunction::Sum, Some(NumericKind::Float)) => Accumulator::FloatSum(None),
            (AggregateFunction::Sum, _) => Accumulator::IntSum(None),
            (AggregateFunction::Min, Some(NumericKind::Float)) => Accumulator::FloatMin(None),
            (AggregateFunction::Min, _) => Accumulator::IntMin(None),
            (AggregateFunction::Max, Some(NumericKind::Float)) => Accumulator::FloatMax(None),
            (AggregateFunction::Max, _) => Accumulator::IntMax(None),
        }
    }

    /// Fold `input` in; `None` means `COUNT(*)` over `rows` rows.
    fn update(&mut self, input: Option<&ArrayRef>, rows: usize) -> Result<()> {
        let Some(input) = input else {
            if let Accumulator::Count(n) = self {
                *n += rows as i64;
            }
            return Ok(());
        };
        match self {
            Accumulator::Count(n) => *n += (input.len() - input.null_count()) as i64,
            Accumulator::IntSum(acc) => {
                let values = as_int64(input)?;
                let part = sum_checked(&values)?;
                *acc = match (*acc, part) {
                    (Some(a), Some(b)) => Some(a.checked_add(b).ok_or_else(int_overflow)?),
                    (a, b) => a.or(b),
                };
            }
            Accumulator::FloatSum(acc) => *acc = merge_opt(*acc, sum(&as_float64(input)?), |a, b| a + b),
            Accumulator::IntMin(acc) => *acc = merge_opt(*acc, min(&as_int64(input)?), i64::min),
            Accumulator::IntMax(acc) => *acc = merge_opt(*acc, max(&as_int64(input)?), i64::max),
            Accumulator::FloatMin(acc) => *acc = merge_opt(*acc, min(&as_float64(input)?), f64::min),
            Accumulator::FloatMax(acc) => *acc = merge_opt(*acc, max(&as_float64(input)?), f64::max),
        }
        Ok(())
    }

    fn merge(&mut self, other: &Accumulator) -> Result<()> {
        match (self, other) {
            (Accumulator::Count(a), Accumulator::Count(b)) => *a += b,
            (Accumulator::IntSum(a), Accumulator::IntSum(b)) => {
                *a = match (*a, *b) {
                    (Some(x), Some(y)) => Some(x.checked_add(y).ok_or_else(int_overflow)?),
                    (x, y) => x.or(y),
                };
            }
            (Accumulator::FloatSum(a), Accumulator::FloatSum(b)) => *a = merge_opt(*a, *b, |x, y| x + y),
            (Accumulator::IntMin(a), Accumulator::IntMin(b)) => *a = merge_opt(*a, *b, i64::min),
            (Accumulator::IntMax(a), Accumulator::IntMax(b)) => *a = merge_opt(*a, *b, i64::max),
            (Accumulator::FloatMin(a), Accumulator::FloatMin(b)) => *a = merge_opt(*a, *b, f64::min),
            (Accumulator::FloatMax(a), Accumulator::FloatMax(b)) => *a = merge_opt(*a, *b, f64::max),
            (a, b) => {
                return Err(Error::Internal(format!(
                    "cannot merge aggregate states {a:?} and {b:?}"
                )));
            }
        }
        Ok(())
    }

    fn finish(&self) -> ArrayRef {
        match self {
            Accumulator::Count(n) => Arc::new(Int64Array::from(vec![*n])) as ArrayRef,
            Accumulator::IntSum(v) | Accumulator::IntMin(v) | Accumulator::IntMax(v) => {
                Arc::new(Int64Array::from(vec![*v])) as ArrayRef
            }
            Accumulator::FloatSum(v) | Accumulator::FloatMin(v) | Accumulator::FloatMax(v) => {
                Arc::new(Float64Array::from(vec![*v])) as ArrayRef
            }
        }
    }
}

fn as_int64(input: &ArrayRef) -> Result<Int64Array> {
    let widened = cast(input.as_ref(), &DataType::Int64)?;
    widened
        .as_any()
        .downcast_ref::<Int64Array>()
        .cloned()
        .ok_or_else(|| Error::Internal("cast to Int64 did not produce Int64".into()))
}

fn as_float64(input: &ArrayRef) -> Result<Float64Array> {
    let widened = cast(input.as_ref(), &DataType::Float64)?;
    widened
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| Error::Internal("cast to Float64 did not produce Float64".into()))
}

pub struct SimpleAggregateExec {
    pub input: PlanRef,
    pub aggregates: Vec<AggregateExpr>,
    pub schema: SchemaRef,
    kinds: Vec<Option<NumericKind>>,
}

impl SimpleAggregateExec {
    pub fn new(input: PlanRef, aggregates: Vec<AggregateExpr>) -> Result<Self> {
        if aggregates.is_empty() {
            return Err(Error::InvalidArgumentError(
                "an aggregate needs at least one aggregate expression".into(),
            ));
        }
        let input_schema = input.schema();
        let mut fields = Vec::with_capacity(aggregates.len());
        let mut kinds = Vec::with_capacity(aggregates.len());
        for agg in &aggregates {
            match (agg.function, agg.column) {
                (AggregateFunction::CountStar, _) => {
                    kinds.push(None);
                    fields.push(Field::new(&agg.alias, DataType::Int64, false));
                }
                (_, None) => {
                    return Err(Error::InvalidArgumentError(format!(
                        "aggregate {} needs an input column",
                        agg.alias
                    )));
                }
                (function, Some(column)) => {
                    let field = input_schema.fields().get(column).ok_or_else(|| {
                        Error::InvalidArgumentError(format!(
                            "aggregate {} references missing column {column}",
                            agg.alias
                        ))
                    })?;
                    if function == AggregateFunction::Count {
                        kinds.push(None);
                        fields.push(Field::new(&agg.alias, DataType::Int64, false));
                    } else {
                        let kind = NumericKind::of(field.data_type())?;
                        kinds.push(Some(kind));
                        fields.push(Field::new(&agg.alias, kind.data_type(), true));
                    }
                }
            }
        }
        Ok(Self {
            input,
            aggregates,
            schema: Arc::new(Schema::new(fields)),
            kinds,
        })
    }
}

impl fmt::Debug for SimpleAggregateExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleAggregateExec")
            .field("aggregates", &self.aggregates)
            .field("schema", &self.schema)
            .finish()
    }
}

impl PhysicalPlan for SimpleAggregateExec {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn children(&self) -> Vec<PlanRef> {
        vec![Arc::clone(&self.input)]
    }

    fn build_pipelines(&self, builder: &mut PipelineBuilder, current: PipelineId) -> Result<()> {
        let state = Arc::new(AggregateState {
            aggregates: self.aggregates.clone(),
            kinds: self.kinds.clone(),
            schema: Arc::clone(&self.schema),
            partial: Mutex::new(None),
            result: OnceLock::new(),
        });
        let child = builder.add_pipeline(Arc::new(AggregateSink {
            state: Arc::clone(&state),
        }));
        self.input.build_pipelines(builder, child)?;
        builder.set_source(current, Arc::new(AggregateResultSource { state }))?;
        builder.add_dependency(current, child)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct AggregateState {
    aggregates: Vec<AggregateExpr>,
    kinds: Vec<Option<NumericKind>>,
    schema: SchemaRef,
    partial: Mutex<Option<Vec<Accumulator>>>,
    result: OnceLock<RecordBatch>,
}

impl AggregateState {
    fn fresh(&self) -> Vec<Accumulator> {
        self.aggregates
            .iter()
            .zip(&self.kinds)
            .map(|(agg, kind)| Accumulator::new(agg.function, *kind))
            .collect()
    }
}

struct AggregateSink {
    state: Arc<AggregateState>,
}

impl PhysicalSink for AggregateSink {
    fn is_parallel(&self) -> bool {
        true
    }

    fn local_sink(&self) -> Box<dyn LocalSink> {
        Box::new(AggregateLocal {
            accumulators: self.state.fresh(),
            state: Arc::clone(&self.state),
        })
    }

    fn finalize(&self) -> Result<()> {
        let accumulators = self
            .state
            .partial
            .lock()
            .take()
            .unwrap_or_else(|| self.state.fresh());
        let columns = accumulators.iter().map(Accumulator::finish).collect();
        let batch = RecordBatch::try_new(Arc::clone(&self.state.schema), columns)?;
        self.state
            .result
            .set(batch)
            .map_err(|_| Error::Internal("aggregate finalized twice".into()))
    }
}

struct AggregateLocal {
    accumulators: Vec<Accumulator>,
    state: Arc<AggregateState>,
}

impl LocalSink for AggregateLocal {
    fn sink(&mut self, _ctx: &ExecutionContext, batch: RecordBatch) -> Result<()> {
        for (acc, agg) in self.accumulators.iter_mut().zip(&self.state.aggregates) {
            let input = match agg.function {
                AggregateFunction::CountStar => None,
                _ => agg.column.map(|c| batch.column(c)),
            };
            acc.update(input, batch.num_rows())?;
        }
        Ok(())
    }

    fn combine(self: Box<Self>) -> Result<()> {
        let mut partial = self.state.partial.lock();
        match partial.as_mut() {
            None => *partial = Some(self.accumulators),
            Some(global) => {
                for (g, l) in global.iter_mut().zip(&self.accumulators) {
                    g.merge(l)?;
                }
            }
        }
        Ok(())
    }
}

/// Emits the finalized aggregate row once.
struct AggregateResultSource {
    state: Arc<AggregateState>,
}

impl PhysicalSource for AggregateResultSource {
    fn partitions(&self, _ctx: &ExecutionContext, _count: usize) -> Result<Vec<Box<dyn SourcePartition>>> {
        let batch = self
            .state
            .result
            .get()
            .cloned()
            .ok_or_else(|| Error::Internal("aggregate result read before it was finalized".into()))?;
        Ok(vec![Box::new(OnceBatch(Some(batch)))])
    }
}

struct OnceBatch(Option<RecordBatch>);

impl SourcePartition for OnceBatch {
    fn next_batch(&mut self, _ctx: &ExecutionContext) -> Result<Option<RecordBatch>> {
        Ok(self.0.take())
    }
}
