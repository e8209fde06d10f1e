//! Minimal expression interface used for CHECK constraints, DEFAULT values
//! and column type changes.
//!
//! The table layer does not bind or plan expressions; it only needs to run a
//! prepared one against a batch and tell an evaluation error apart from a
//! `false` result.

use std::fmt;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Scalar};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use strata_result::{Error, Result};
use strata_types::{CompareOp, Literal};

/// A prepared expression producing one value per input row.
pub trait Expression: Send + Sync {
    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef>;
}

impl<F> Expression for F
where
    F: Fn(&RecordBatch) -> Result<ArrayRef> + Send + Sync,
{
    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        self(batch)
    }
}

pub type ExprRef = Arc<dyn Expression>;

/// Lets definitions holding expressions derive `Debug`.
pub(crate) struct OpaqueExpr<'a>(pub &'a ExprRef);

impl fmt::Debug for OpaqueExpr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<expr>")
    }
}

fn input_column(batch: &RecordBatch, position: usize) -> Result<&ArrayRef> {
    if position >= batch.num_columns() {
        return Err(Error::InvalidArgumentError(format!(
            "expression references column {position} of a {}-column batch",
            batch.num_columns()
        )));
    }
    Ok(batch.column(position))
}

/// `batch[position] <op> constant` as a boolean array.
pub fn compare(position: usize, op: CompareOp, constant: impl Into<Literal>) -> ExprRef {
    let constant = constant.into();
    Arc::new(move |batch: &RecordBatch| -> Result<ArrayRef> {
        let column = input_column(batch, position)?;
        let rhs = Scalar::new(constant.to_array(column.data_type(), 1)?);
        Ok(Arc::new(op.evaluate(column, &rhs)?) as ArrayRef)
    })
}

/// A constant repeated once per row of the input batch.
pub fn constant(value: impl Into<Literal>, data_type: DataType) -> ExprRef {
    let value = value.into();
    Arc::new(move |batch: &RecordBatch| value.to_array(&data_type, batch.num_rows()))
}

/// `CAST(batch[position] AS to)`.
pub fn cast(position: usize, to: DataType) -> ExprRef {
    Arc::new(move |batch: &RecordBatch| -> Result<ArrayRef> {
        let column = input_column(batch, position)?;
        Ok(arrow::compute::cast(column.as_ref(), &to)?)
    })
}
