use std::ops::Deref;

use derive_more::From;

use crate::Type;

/// A column of a table or of an intermediate result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    /// The table this column was read from
    pub source: Box<str>,
    pub name: Box<str>,
    pub ty: Type,
    pub nullable: bool,
}

impl Column {
    pub fn new(source: &str, name: &str, ty: Type) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            ty,
            nullable: false,
        }
    }

    pub fn nullable(self) -> Self {
        Self { nullable: true, ..self }
    }
}

/// An ordered list of columns.
/// A column is identified by its `(source, name)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, From)]
pub struct Schema(Vec<Column>);

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self(columns)
    }

    /// The position of the column `table.name`
    pub fn position(&self, table: &str, name: &str) -> Option<usize> {
        self.0
            .iter()
            .position(|col| col.source.as_ref() == table && col.name.as_ref() == name)
    }

    /// Appends the columns of `other` after the columns of `self`
    pub fn concat(mut self, other: &Schema) -> Self {
        self.0.extend(other.0.iter().cloned());
        self
    }

    /// The same columns attributed to a different source table
    pub fn with_source(self, source: &str) -> Self {
        Self(
            self.0
                .into_iter()
                .map(|col| Column {
                    source: source.into(),
                    ..col
                })
                .collect(),
        )
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.0
    }
}

impl Deref for Schema {
    type Target = [Column];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<Column> for Schema {
    fn from_iter<T: IntoIterator<Item = Column>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Schema {
    type Item = &'a Column;
    type IntoIter = std::slice::Iter<'a, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
