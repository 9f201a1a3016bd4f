//! Transformation module.
//!
//! Turns extracted [`Row`](crate::extract::Row)s into typed
//! [`TransformedRow`]s:
//! - `rules`: per-column rule set (read from configuration)
//! - `operations`: text cleanup operations
//! - `value`: target types and coercion
//! - `executor`: applies the rules, one row at a time

pub mod executor;
pub mod operations;
pub mod rules;
pub mod value;

pub use executor::{ColumnSpec, Schema, TransformedRow, Transformer};
pub use operations::Operation;
pub use rules::{ColumnRule, TransformRules};
pub use value::{ColumnType, Value};
