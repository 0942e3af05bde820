use std::{any::Any, fmt, sync::Arc};

use anyhow::Result;
use gitql_expr::{Row, Schema};

use crate::{Context, RowIter, Table};

/// A table whose rows are held in memory
#[derive(Debug)]
pub struct MemTable {
    name: Box<str>,
    schema: Schema,
    rows: Arc<[Row]>,
}

impl MemTable {
    pub fn new(name: &str, schema: Schema, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            schema,
            rows: rows.into(),
        }
    }
}

impl fmt::Display for MemTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Table for MemTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn row_iter(&self, _: &Context) -> Result<Box<dyn RowIter>> {
        Ok(Box::new(MemIter {
            rows: self.rows.clone(),
            pos: 0,
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MemIter {
    rows: Arc<[Row]>,
    pos: usize,
}

impl RowIter for MemIter {
    fn next(&mut self) -> Result<Option<Row>> {
        let row = self.rows.get(self.pos).cloned();
        self.pos += 1;
        Ok(row)
    }

    fn close(&mut self) -> Result<()> {
        self.pos = self.rows.len();
        Ok(())
    }
}
