use std::{any::Any, fmt};

use anyhow::Result;
use gitql_expr::Schema;

use crate::{Context, RowIter};

/// A source of rows the plan can scan
pub trait Table: fmt::Debug + fmt::Display + Send + Sync {
    fn name(&self) -> &str;

    fn schema(&self) -> &Schema;

    fn row_iter(&self, ctx: &Context) -> Result<Box<dyn RowIter>>;

    /// For downcasting to a concrete table type in rewrite rules
    fn as_any(&self) -> &dyn Any;
}
