//! Identifiers, constants and small value types shared across strata crates.
//!
//! These types live in `strata-types` so that the column store, the table
//! layer and the executor agree on one vocabulary without depending on each
//! other.

pub mod filter;
pub mod ids;
pub mod literal;
pub mod selection;

pub use filter::{CompareOp, TableFilter};
pub use ids::*;
pub use literal::Literal;
pub use selection::SelectionVector;
