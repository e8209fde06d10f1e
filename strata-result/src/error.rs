use std::fmt;
use thiserror::Error;

/// Unified error type for all strata operations.
///
/// Constraint and catalog checks run before any mutation is applied, so
/// receiving one of those variants means nothing was written.
#[derive(Error, Debug)]
pub enum Error {
    /// Arrow library error while building or slicing columnar batches.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid argument passed to a strata API (bad column id, type mismatch
    /// between a batch and the table schema, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// Row, column or index lookup failed.
    #[error("Storage key not found")]
    NotFound,

    /// Shape mismatch or DDL conflict.
    ///
    /// Raised for wrong column counts, column length mismatches when loading
    /// persisted data, and schema changes that an index depends on. Fatal to
    /// the DDL operation that triggered it.
    #[error("Catalog Error: {0}")]
    CatalogError(String),

    /// Data constraint violation (NOT NULL, CHECK, UNIQUE).
    ///
    /// The message names the table and, where known, the column.
    #[error("Constraint Error: {0}")]
    ConstraintError(String),

    /// Transaction conflict.
    ///
    /// Raised when writing to a table instance that a schema change has
    /// superseded, or when two transactions delete the same row.
    #[error("Transaction Error: {0}")]
    TransactionContextError(String),

    /// The engine lacks a capability, e.g. a zonemap comparator for a type.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Execution stopped because the client interrupted the query.
    #[error("Interrupted!")]
    Interrupted,

    /// Internal error indicating a bug or unexpected state.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// Create a constraint violation error.
    #[inline]
    pub fn constraint<S: Into<String>>(msg: S) -> Self {
        Error::ConstraintError(msg.into())
    }

    /// Create a transaction conflict error.
    #[inline]
    pub fn transaction_conflict<S: Into<String>>(msg: S) -> Self {
        Error::TransactionContextError(msg.into())
    }

    /// Create an internal error from any displayable value.
    ///
    /// ```
    /// use strata_result::Error;
    ///
    /// let err = Error::internal("worker panicked");
    /// assert!(matches!(err, Error::Internal(msg) if msg == "worker panicked"));
    /// ```
    #[inline]
    pub fn internal<E: fmt::Display>(err: E) -> Self {
        Error::Internal(err.to_string())
    }

    #[inline]
    pub fn is_constraint(&self) -> bool {
        matches!(self, Error::ConstraintError(_))
    }

    #[inline]
    pub fn is_transaction_conflict(&self) -> bool {
        matches!(self, Error::TransactionContextError(_))
    }

    #[inline]
    pub fn is_catalog(&self) -> bool {
        matches!(self, Error::CatalogError(_))
    }
}
