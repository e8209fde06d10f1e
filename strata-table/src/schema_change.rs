//! Schema changes. Each produces a new table instance that shares the
//! unchanged column stores, the version chain and the table info with its
//! parent, and marks the parent superseded so it no longer accepts writes.

use std::sync::Arc;

use arrow::array::{RecordBatchOptions, new_null_array};
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;
use strata_column_map::ColumnStore;
use strata_result::{Error, Result};
use strata_types::{ColumnId, STANDARD_VECTOR_SIZE};

use crate::catalog::{BoundConstraint, ColumnDefinition};
use crate::expr::ExprRef;
use crate::table::Table;

/// A batch with no columns and `rows` rows, the input of constant expressions.
fn empty_batch(rows: usize) -> Result<RecordBatch> {
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::empty()),
        Vec::new(),
        &RecordBatchOptions::new().with_row_count(Some(rows)),
    )?)
}

impl Table {
    /// Add `column` at the end of the row, filling existing rows with its
    /// default or NULL.
    pub fn add_column(self: &Arc<Self>, column: ColumnDefinition) -> Result<Arc<Table>> {
        let cursor = self.append_lock.lock();
        self.ensure_active("altering")?;
        let total_rows = cursor.total_rows;
        let column_id = self.columns.len();
        let store = ColumnStore::new(column_id, column.data_type.clone(), self.config.segment_vectors)?;

        let mut row = 0;
        while row < total_rows {
            let rows = (total_rows - row).min(STANDARD_VECTOR_SIZE as u64) as usize;
            let values = match &column.default {
                Some(default) => {
                    let values = default.evaluate(&empty_batch(rows)?)?;
                    if values.data_type() != &column.data_type || values.len() != rows {
                        return Err(Error::InvalidArgumentError(format!(
                            "default of column {} produced {} values of {:?}",
                            column.name,
                            values.len(),
                            values.data_type()
                        )));
                    }
                    values
                }
                None => new_null_array(&column.data_type, rows),
            };
            store.append(values.as_ref())?;
            row += rows as u64;
        }

        let mut definition = (*self.definition).clone();
        tracing::debug!(table = %definition.table_name, column = %column.name, total_rows, "add column");
        definition.columns.push(column);
        let mut columns = self.columns.clone();
        columns.push(Arc::new(store));

        let child = Table::derived(self, definition, columns, total_rows);
        self.state.supersede();
        Ok(child)
    }

    /// Remove column `removed`.
    ///
    /// Refused when an index reads this column or any column after it, since
    /// index column ids would shift, and when a constraint reads it.
    pub fn drop_column(self: &Arc<Self>, removed: ColumnId) -> Result<Arc<Table>> {
        let cursor = self.append_lock.lock();
        self.ensure_active("altering")?;
        self.column(removed)?;
        if self.columns.len() == 1 {
            return Err(Error::CatalogError(
                "Cannot drop column: table only has one column remaining!".into(),
            ));
        }
        for index in self.info.indexes() {
            for &c in index.column_ids() {
                if c == removed {
                    return Err(Error::CatalogError(
                        "Cannot drop this column: an index depends on it!".into(),
                    ));
                }
                if c > removed {
                    return Err(Error::CatalogError(
                        "Cannot drop this column: an index depends on a column after it!".into(),
                    ));
                }
            }
        }

        let shift = |ids: &[ColumnId]| -> Vec<ColumnId> {
            ids.iter().map(|&c| if c > removed { c - 1 } else { c }).collect()
        };
        let mut definition = (*self.definition).clone();
        let mut constraints = Vec::with_capacity(definition.constraints.len());
        for constraint in &definition.constraints {
            if constraint.columns().contains(&removed) {
                return Err(Error::CatalogError(
                    "Cannot drop this column: a constraint depends on it!".into(),
                ));
            }
            constraints.push(match constraint {
                BoundConstraint::NotNull { column } => BoundConstraint::NotNull {
                    column: shift(std::slice::from_ref(column))[0],
                },
                BoundConstraint::Check { columns, .. } if columns.iter().any(|&c| c > removed) => {
                    return Err(Error::CatalogError(
                        "Cannot drop this column: a CHECK constraint depends on a column after it!"
                            .into(),
                    ));
                }
                BoundConstraint::Check { expr, columns } => BoundConstraint::Check {
                    expr: Arc::clone(expr),
                    columns: columns.clone(),
                },
                BoundConstraint::Unique {
                    columns,
                    is_primary_key,
                } => BoundConstraint::Unique {
                    columns: shift(columns),
                    is_primary_key: *is_primary_key,
                },
                BoundConstraint::ForeignKey {
                    columns,
                    referenced_table,
                } => BoundConstraint::ForeignKey {
                    columns: shift(columns),
                    referenced_table: referenced_table.clone(),
                },
            });
        }
        definition.constraints = constraints;
        let dropped = definition.columns.remove(removed);
        let mut columns = self.columns.clone();
        columns.remove(removed);

        tracing::debug!(table = %definition.table_name, column = %dropped.name, "drop column");
        let child = Table::derived(self, definition, columns, cursor.total_rows);
        self.state.supersede();
        Ok(child)
    }

    /// Change the type of column `changed` to `target`.
    ///
    /// `cast` is evaluated over batches holding `bound_columns` (in that
    /// order) and must yield `target` values. Only the changed column is
    /// rewritten; appends and deletes on the parent are excluded meanwhile.
    pub fn alter_column_type(
        self: &Arc<Self>,
        changed: ColumnId,
        target: DataType,
        bound_columns: &[ColumnId],
        cast: ExprRef,
    ) -> Result<Arc<Table>> {
        self.column(changed)?;
        if bound_columns.is_empty() {
            return Err(Error::InvalidArgumentError(
                "a column type change must read at least one column".into(),
            ));
        }
        for &c in bound_columns {
            self.column(c)?;
        }
        if self.info.indexes().iter().any(|i| i.column_ids().contains(&changed)) {
            return Err(Error::CatalogError(
                "Cannot change the type of this column: an index depends on it!".into(),
            ));
        }

        let (cursor, _chain) = self.lock_for_rewrite();
        self.ensure_active("altering")?;
        let store = ColumnStore::new(changed, target.clone(), self.config.segment_vectors)?;
        self.scan_table_segment(0, cursor.total_rows, bound_columns, |batch, _| {
            let values = cast.evaluate(batch)?;
            if values.data_type() != &target || values.len() != batch.num_rows() {
                return Err(Error::InvalidArgumentError(format!(
                    "cast produced {} values of {:?}, expected {} of {target:?}",
                    values.len(),
                    values.data_type(),
                    batch.num_rows()
                )));
            }
            store.append(values.as_ref())
        })?;

        let mut definition = (*self.definition).clone();
        definition.columns[changed].data_type = target;
        let mut columns = self.columns.clone();
        columns[changed] = Arc::new(store);

        tracing::debug!(
            table = %definition.table_name,
            column = %definition.columns[changed].name,
            "alter column type"
        );
        let child = Table::derived(self, definition, columns, cursor.total_rows);
        self.state.supersede();
        Ok(child)
    }
}
