use anyhow::Result;
use gitql_expr::Row;

/// A pull-based iterator over the rows produced by a plan node.
///
/// `next` returns [None] at the end of the stream.
/// `close` releases the resources held by the iterator and its inputs.
pub trait RowIter: Send {
    fn next(&mut self) -> Result<Option<Row>>;

    fn close(&mut self) -> Result<()>;
}

impl<T: RowIter + ?Sized> RowIter for Box<T> {
    fn next(&mut self) -> Result<Option<Row>> {
        (**self).next()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Drain `iter` and close it
pub fn collect_rows(iter: &mut dyn RowIter) -> Result<Vec<Row>> {
    let mut rows = vec![];
    let result = loop {
        match iter.next() {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => break Ok(rows),
            Err(e) => break Err(e),
        }
    };
    iter.close()?;
    result
}
