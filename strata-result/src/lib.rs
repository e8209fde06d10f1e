//! Error types and result definitions for the strata storage engine.
//!
//! Every strata crate reports failures through the single [`Error`] enum and
//! the [`Result<T>`] alias, so errors cross crate boundaries with `?` and
//! callers can match on the category they care about.
//!
//! # Error Categories
//!
//! - **Constraint violations** ([`Error::ConstraintError`]): NOT NULL, CHECK and
//!   UNIQUE failures. Always surfaced, never retried.
//! - **Transaction errors** ([`Error::TransactionContextError`]): writes against a
//!   superseded table instance and write-write conflicts. The caller decides
//!   whether to retry the whole transaction.
//! - **Catalog errors** ([`Error::CatalogError`]): shape mismatches and DDL that
//!   would invalidate an index.
//! - **Missing capabilities** ([`Error::NotImplemented`]): e.g. a column type
//!   without a zonemap comparator.
//! - **Internal errors** ([`Error::Internal`]): bugs or violated invariants.

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;
