//! Constraint verification run before any write is applied.

use std::sync::Arc;

use arrow::array::{Array, BooleanArray};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use strata_result::{Error, Result};
use strata_types::ColumnId;

use crate::catalog::{BoundConstraint, TableDefinition};
use crate::expr::Expression;
use crate::index::Index;

fn verify_not_null(definition: &TableDefinition, column_id: ColumnId, array: &dyn Array) -> Result<()> {
    if array.null_count() > 0 {
        let column = definition.column(column_id)?;
        return Err(Error::constraint(format!(
            "NOT NULL constraint failed: {}.{}",
            definition.table_name, column.name
        )));
    }
    Ok(())
}

/// A CHECK fails on `false`; NULL passes. An evaluation error is reported as
/// a constraint failure carrying the evaluator's message.
fn verify_check(definition: &TableDefinition, expr: &dyn Expression, batch: &RecordBatch) -> Result<()> {
    let result = expr.evaluate(batch).map_err(|err| {
        Error::constraint(format!(
            "CHECK constraint failed: {} (Error: {err})",
            definition.table_name
        ))
    })?;
    let result = if result.data_type() == &DataType::Boolean {
        result
    } else {
        arrow::compute::cast(result.as_ref(), &DataType::Boolean)?
    };
    let flags = result
        .as_any()
        .downcast_ref::<BooleanArray>()
        .ok_or_else(|| Error::Internal("CHECK result is not boolean".into()))?;
    let failed = (0..flags.len()).any(|i| flags.is_valid(i) && !flags.value(i));
    if failed {
        return Err(Error::constraint(format!(
            "CHECK constraint failed: {}",
            definition.table_name
        )));
    }
    Ok(())
}

/// Verify a full-row batch against the row-local constraints of
/// `definition`. UNIQUE is left to the index inserts of the append.
pub(crate) fn verify_append(definition: &TableDefinition, batch: &RecordBatch) -> Result<()> {
    for constraint in &definition.constraints {
        match constraint {
            BoundConstraint::NotNull { column } => {
                verify_not_null(definition, *column, batch.column(*column).as_ref())?;
            }
            BoundConstraint::Check { expr, .. } => {
                verify_check(definition, expr.as_ref(), batch)?;
            }
            BoundConstraint::Unique { .. } => {}
            BoundConstraint::ForeignKey { .. } => {
                return Err(Error::NotImplemented(
                    "FOREIGN KEY constraints are not supported".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Verify an update of `column_ids` (in the order of `updates`' columns).
/// Only constraints that read an updated column are re-evaluated.
pub(crate) fn verify_update(
    definition: &TableDefinition,
    indexes: &[Arc<Index>],
    column_ids: &[ColumnId],
    updates: &RecordBatch,
) -> Result<()> {
    for constraint in &definition.constraints {
        match constraint {
            BoundConstraint::NotNull { column } => {
                if let Some(pos) = column_ids.iter().position(|c| c == column) {
                    verify_not_null(definition, *column, updates.column(pos).as_ref())?;
                }
            }
            BoundConstraint::Check { expr, columns } => {
                if let Some(mock) = mock_batch(definition, column_ids, columns, updates)? {
                    verify_check(definition, expr.as_ref(), &mock)?;
                }
            }
            BoundConstraint::Unique { .. } | BoundConstraint::ForeignKey { .. } => {}
        }
    }
    if let Some(index) = indexes.iter().find(|i| i.is_updated(column_ids)) {
        return Err(Error::NotImplemented(format!(
            "in-place update of columns covered by index {}; rewrite the rows as delete plus insert",
            index.name()
        )));
    }
    Ok(())
}

/// Place the updated columns at their table positions, NULL elsewhere.
///
/// `None` when the update touches none of `required`. Touching only some of
/// them is an internal error: the caller must supply every column a CHECK
/// reads.
fn mock_batch(
    definition: &TableDefinition,
    column_ids: &[ColumnId],
    required: &[ColumnId],
    updates: &RecordBatch,
) -> Result<Option<RecordBatch>> {
    let found = required.iter().filter(|c| column_ids.contains(c)).count();
    if found == 0 {
        return Ok(None);
    }
    if found != required.len() {
        return Err(Error::Internal(
            "not all columns required for the CHECK constraint are present in the update".into(),
        ));
    }
    let rows = updates.num_rows();
    let columns = definition
        .columns
        .iter()
        .enumerate()
        .map(|(id, column)| match column_ids.iter().position(|&c| c == id) {
            Some(pos) => Arc::clone(updates.column(pos)),
            None => arrow::array::new_null_array(&column.data_type, rows),
        })
        .collect::<Vec<_>>();
    Ok(Some(RecordBatch::try_new(definition.arrow_schema(), columns)?))
}
