//! Pushdown filter vocabulary shared by the scan engine and the executor.

use std::cmp::Ordering;

use arrow::array::{BooleanArray, Datum};
use arrow::compute::kernels::cmp;
use strata_result::Result;

use crate::literal::Literal;

/// Comparison operator of a `column <op> constant` filter or a join condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl CompareOp {
    /// Does `lhs <op> rhs` hold, given `lhs.cmp(rhs)`?
    #[inline]
    pub fn matches(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Equal => ordering == Ordering::Equal,
            CompareOp::NotEqual => ordering != Ordering::Equal,
            CompareOp::LessThan => ordering == Ordering::Less,
            CompareOp::LessThanOrEqual => ordering != Ordering::Greater,
            CompareOp::GreaterThan => ordering == Ordering::Greater,
            CompareOp::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }

    /// Operator with the operands swapped: `a < b` becomes `b > a`.
    pub fn flip(self) -> CompareOp {
        match self {
            CompareOp::LessThan => CompareOp::GreaterThan,
            CompareOp::LessThanOrEqual => CompareOp::GreaterThanOrEqual,
            CompareOp::GreaterThan => CompareOp::LessThan,
            CompareOp::GreaterThanOrEqual => CompareOp::LessThanOrEqual,
            other => other,
        }
    }

    /// `lhs <op> rhs` with Arrow's comparison kernels. Either side may be a
    /// [`arrow::array::Scalar`]; NULL inputs yield NULL.
    pub fn evaluate(self, lhs: &dyn Datum, rhs: &dyn Datum) -> Result<BooleanArray> {
        Ok(match self {
            CompareOp::Equal => cmp::eq(lhs, rhs)?,
            CompareOp::NotEqual => cmp::neq(lhs, rhs)?,
            CompareOp::LessThan => cmp::lt(lhs, rhs)?,
            CompareOp::LessThanOrEqual => cmp::lt_eq(lhs, rhs)?,
            CompareOp::GreaterThan => cmp::gt(lhs, rhs)?,
            CompareOp::GreaterThanOrEqual => cmp::gt_eq(lhs, rhs)?,
        })
    }
}

/// `column <op> constant` filter pushed into a table scan.
///
/// `column_index` is the position of the filtered column in the scan's
/// projected column list, not the table column id.
#[derive(Clone, Debug, PartialEq)]
pub struct TableFilter {
    pub column_index: usize,
    pub op: CompareOp,
    pub constant: Literal,
}

impl TableFilter {
    pub fn new(column_index: usize, op: CompareOp, constant: impl Into<Literal>) -> Self {
        Self {
            column_index,
            op,
            constant: constant.into(),
        }
    }

    /// Evaluate against one non-null value. NULL never qualifies.
    pub fn evaluate(&self, value: &Literal) -> bool {
        value
            .compare(&self.constant)
            .is_some_and(|ordering| self.op.matches(ordering))
    }
}
