//! Scalar expressions over rows of Git metadata.
//!
//! Rows are flat vectors of [Value]s described by a [Schema].
//! Column references carry both their qualified name and their position,
//! so that a predicate can be re-indexed when the shape of its input changes.

pub mod errors;
pub mod expr;
pub mod schema;
pub mod value;

pub use expr::{BinOp, Call, Expr, FieldRef, LogOp, ScalarFunction};
pub use schema::{Column, Schema};
pub use value::{Row, Type, Value};
