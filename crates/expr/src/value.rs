use std::fmt;

use itertools::Itertools;

/// A row is a flat tuple of values.
/// Its layout is described by a [crate::Schema].
pub type Row = Vec<Value>;

/// The type of a column or scalar expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Int64,
    Text,
    Blob,
    /// Microseconds since the unix epoch
    Timestamp,
    Array(Box<Type>),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("BOOL"),
            Self::Int64 => f.write_str("INT64"),
            Self::Text => f.write_str("TEXT"),
            Self::Blob => f.write_str("BLOB"),
            Self::Timestamp => f.write_str("TIMESTAMP"),
            Self::Array(elem) => write!(f, "ARRAY<{elem}>"),
        }
    }
}

/// A dynamically typed scalar value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(i64),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Do `self` and `other` hold the same kind of value?
    /// Null is comparable with anything.
    pub(crate) fn comparable(&self, other: &Self) -> bool {
        self.is_null() || other.is_null() || std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int64(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Blob(bytes)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int64(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "\"{s}\""),
            Self::Blob(bytes) => write!(f, "BLOB({} bytes)", bytes.len()),
            Self::Timestamp(micros) => write!(f, "TIMESTAMP({micros})"),
            Self::Array(elems) => write!(f, "[{}]", elems.iter().join(", ")),
        }
    }
}
