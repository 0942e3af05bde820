use anyhow::Result;
use gitql_expr::{Expr, Row, Value};
use gitql_plan::RowIter;
use tracing::Span;

use crate::parallel::ParallelIter;

/// A row at a time query iterator
pub enum Iter {
    /// A table scan, or any iterator provided by a table implementation
    Scan(Box<dyn RowIter>),
    Filter(Filter),
    Project(ProjectIter),
    Join(NestedLoopJoin),
    Limit(LimitIter),
    Parallel(ParallelIter),
    Span(SpanIter),
}

impl RowIter for Iter {
    fn next(&mut self) -> Result<Option<Row>> {
        match self {
            Self::Scan(iter) => iter.next(),
            Self::Filter(iter) => iter.next(),
            Self::Project(iter) => iter.next(),
            Self::Join(iter) => iter.next(),
            Self::Limit(iter) => iter.next(),
            Self::Parallel(iter) => iter.next(),
            Self::Span(iter) => iter.next(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Self::Scan(iter) => iter.close(),
            Self::Filter(iter) => iter.input.close(),
            Self::Project(iter) => iter.input.close(),
            Self::Join(iter) => iter.close(),
            Self::Limit(iter) => iter.input.close(),
            Self::Parallel(iter) => iter.close(),
            Self::Span(iter) => iter.close(),
        }
    }
}

/// A tuple at a time filter iterator
pub struct Filter {
    pub input: Box<Iter>,
    pub expr: Expr,
}

impl Filter {
    fn next(&mut self) -> Result<Option<Row>> {
        while let Some(row) = self.input.next()? {
            if self.expr.eval_bool(&row)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

/// Evaluates a list of expressions over each row of its input
pub struct ProjectIter {
    pub input: Box<Iter>,
    pub exprs: Vec<Expr>,
}

impl ProjectIter {
    fn next(&mut self) -> Result<Option<Row>> {
        let Some(row) = self.input.next()? else {
            return Ok(None);
        };
        Ok(Some(project(&self.exprs, &row)?))
    }
}

/// Evaluate `exprs` over `row`
pub fn project(exprs: &[Expr], row: &[Value]) -> Result<Row> {
    Ok(exprs.iter().map(|expr| expr.eval(row)).collect::<Result<_, _>>()?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Cross,
}

/// A nested loop join.
/// The rhs is materialized when the first row is requested.
pub struct NestedLoopJoin {
    lhs: Box<Iter>,
    rhs: Box<Iter>,
    on: Option<Expr>,
    kind: JoinKind,
    /// The number of columns of the rhs, for padding unmatched lhs rows
    width: usize,
    rhs_rows: Option<Vec<Row>>,
    current: Option<Row>,
    pos: usize,
    matched: bool,
}

impl NestedLoopJoin {
    pub fn new(lhs: Iter, rhs: Iter, on: Option<Expr>, kind: JoinKind, width: usize) -> Self {
        Self {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            on,
            kind,
            width,
            rhs_rows: None,
            current: None,
            pos: 0,
            matched: false,
        }
    }

    fn next(&mut self) -> Result<Option<Row>> {
        if self.rhs_rows.is_none() {
            let mut rows = vec![];
            while let Some(row) = self.rhs.next()? {
                rows.push(row);
            }
            self.rhs_rows = Some(rows);
        }
        let Self {
            lhs,
            on,
            kind,
            width,
            rhs_rows: Some(rhs_rows),
            current,
            pos,
            matched,
            ..
        } = self
        else {
            return Ok(None);
        };

        loop {
            let Some(u) = current else {
                let Some(row) = lhs.next()? else {
                    return Ok(None);
                };
                *current = Some(row);
                *pos = 0;
                *matched = false;
                continue;
            };
            while let Some(v) = rhs_rows.get(*pos) {
                *pos += 1;
                let row: Row = u.iter().chain(v).cloned().collect();
                if on.as_ref().map_or(Ok(true), |on| on.eval_bool(&row))? {
                    *matched = true;
                    return Ok(Some(row));
                }
            }
            let unmatched = current.take();
            if *kind == JoinKind::Left && !*matched {
                if let Some(mut row) = unmatched {
                    row.extend(std::iter::repeat_n(Value::Null, *width));
                    return Ok(Some(row));
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        let lhs = self.lhs.close();
        self.rhs.close()?;
        lhs
    }
}

pub struct LimitIter {
    pub input: Box<Iter>,
    pub remaining: u64,
}

impl LimitIter {
    fn next(&mut self) -> Result<Option<Row>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.input.next()
    }
}

/// Runs its input inside of a tracing span
pub struct SpanIter {
    span: Span,
    input: Box<dyn RowIter>,
    rows: u64,
}

impl SpanIter {
    pub fn new(span: Span, input: Box<dyn RowIter>) -> Self {
        Self { span, input, rows: 0 }
    }
}

impl RowIter for SpanIter {
    fn next(&mut self) -> Result<Option<Row>> {
        let row = self.span.in_scope(|| self.input.next())?;
        if row.is_some() {
            self.rows += 1;
        }
        Ok(row)
    }

    fn close(&mut self) -> Result<()> {
        let _guard = self.span.enter();
        tracing::debug!(rows = self.rows, "closing");
        self.input.close()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use gitql_expr::{Column, Type, Value};
    use gitql_plan::{iter::collect_rows, mem::MemTable, Context, RowIter, Table};
    use pretty_assertions::assert_eq;

    use super::SpanIter;

    #[test]
    fn span_iter_is_a_row_iter() -> Result<()> {
        let schema = vec![Column::new("t", "a", Type::Int64)].into();
        let table = Arc::new(MemTable::new("t", schema, vec![vec![Value::Int64(1)], vec![Value::Int64(2)]]));
        let span = tracing::debug_span!("test.Scan");
        let mut iter: Box<dyn RowIter> = Box::new(SpanIter::new(span, table.row_iter(&Context::new())?));
        assert_eq!(
            collect_rows(&mut iter)?,
            vec![vec![Value::Int64(1)], vec![Value::Int64(2)]]
        );
        Ok(())
    }
}
