//! Table definitions: columns, defaults and bound constraints.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use strata_result::{Error, Result};
use strata_types::{ColumnId, ROW_ID_COLUMN_NAME, is_row_id_column};

use crate::expr::{ExprRef, OpaqueExpr};

#[derive(Clone)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    /// Evaluated against a zero-column batch when a column is added to a
    /// populated table. `None` fills with NULL.
    pub default: Option<ExprRef>,
}

impl fmt::Debug for ColumnDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDefinition")
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .field("default", &self.default.as_ref().map(OpaqueExpr))
            .finish()
    }
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            default: None,
        }
    }

    pub fn with_default(mut self, default: ExprRef) -> Self {
        self.default = Some(default);
        self
    }
}

/// A constraint whose column references are already resolved to ids.
#[derive(Clone)]
pub enum BoundConstraint {
    NotNull {
        column: ColumnId,
    },
    /// `expr` is evaluated over a batch holding the full row, in table column
    /// order. `columns` lists the columns it reads.
    Check {
        expr: ExprRef,
        columns: Vec<ColumnId>,
    },
    /// Enforced through a unique index created with the table.
    Unique {
        columns: Vec<ColumnId>,
        is_primary_key: bool,
    },
    ForeignKey {
        columns: Vec<ColumnId>,
        referenced_table: String,
    },
}

impl fmt::Debug for BoundConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundConstraint::NotNull { column } => {
                f.debug_struct("NotNull").field("column", column).finish()
            }
            BoundConstraint::Check { expr, columns } => f
                .debug_struct("Check")
                .field("expr", &OpaqueExpr(expr))
                .field("columns", columns)
                .finish(),
            BoundConstraint::Unique {
                columns,
                is_primary_key,
            } => f
                .debug_struct("Unique")
                .field("columns", columns)
                .field("is_primary_key", is_primary_key)
                .finish(),
            BoundConstraint::ForeignKey {
                columns,
                referenced_table,
            } => f
                .debug_struct("ForeignKey")
                .field("columns", columns)
                .field("referenced_table", referenced_table)
                .finish(),
        }
    }
}

impl BoundConstraint {
    /// Columns this constraint reads.
    pub fn columns(&self) -> &[ColumnId] {
        match self {
            BoundConstraint::NotNull { column } => std::slice::from_ref(column),
            BoundConstraint::Check { columns, .. }
            | BoundConstraint::Unique { columns, .. }
            | BoundConstraint::ForeignKey { columns, .. } => columns,
        }
    }
}

/// The catalog entry a table instance is built from.
#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnDefinition>,
    pub constraints: Vec<BoundConstraint>,
}

impl TableDefinition {
    pub fn new(schema_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_constraint(mut self, constraint: BoundConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, column_id: ColumnId) -> Result<&ColumnDefinition> {
        self.columns.get(column_id).ok_or_else(|| {
            Error::CatalogError(format!(
                "table {} has no column with id {column_id}",
                self.table_name
            ))
        })
    }

    pub fn column_id(&self, name: &str) -> Option<ColumnId> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Check that every constraint references existing columns.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::CatalogError(format!(
                "table {} must have at least one column",
                self.table_name
            )));
        }
        for constraint in &self.constraints {
            for &column in constraint.columns() {
                self.column(column)?;
            }
        }
        Ok(())
    }

    /// Arrow schema of the full row.
    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(&c.name, c.data_type.clone(), true))
                .collect::<Vec<_>>(),
        ))
    }

    /// Arrow schema of a projection, resolving the row-id pseudo column.
    pub fn projected_schema(&self, column_ids: &[ColumnId]) -> Result<SchemaRef> {
        let fields = column_ids
            .iter()
            .map(|&id| {
                if is_row_id_column(id) {
                    Ok(Field::new(ROW_ID_COLUMN_NAME, DataType::UInt64, false))
                } else {
                    let column = self.column(id)?;
                    Ok(Field::new(&column.name, column.data_type.clone(), true))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(Schema::new(fields)))
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}
