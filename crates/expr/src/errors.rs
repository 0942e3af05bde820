use thiserror::Error;

/// A column reference could not be bound to a schema
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("column `{table}.{column}` not found in schema")]
pub struct ColumnNotFound {
    pub table: String,
    pub column: String,
}

impl ColumnNotFound {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.to_owned(),
            column: column.to_owned(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("field index {index} out of range for a row of {len} values")]
    FieldOutOfRange { index: usize, len: usize },
    #[error("cannot apply `{op}` to `{lhs}` and `{rhs}`")]
    TypeMismatch { op: &'static str, lhs: String, rhs: String },
    #[error("expected a boolean, found `{0}`")]
    NotBool(String),
    #[error("function `{name}` failed: {reason}")]
    Function { name: String, reason: String },
}

impl EvalError {
    /// A scalar function failed to produce a value
    pub fn function(name: &str, reason: impl ToString) -> Self {
        Self::Function {
            name: name.to_owned(),
            reason: reason.to_string(),
        }
    }
}
