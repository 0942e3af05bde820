use std::{
    any::Any,
    fmt,
    sync::{Arc, OnceLock},
};

use anyhow::{anyhow, Result};
use gitql_execution::iter::SpanIter;
use gitql_expr::{errors::ColumnNotFound, Expr, Row, Schema};
use gitql_plan::{Context, RowIter, Table};
use itertools::Itertools;

use crate::{
    chain::{Chain, ChainRowIter, ChainSource},
    tables::TableKind,
};

/// A join of Git tables evaluated by a single iterator chain.
///
/// The chain produces the columns of its tables in hierarchy order.
/// Rows are reordered to match the column order of the join that was squashed.
pub struct SquashedTable {
    chain: Chain,
    source: Arc<dyn ChainSource>,
    /// The joined tables, in join order
    tables: Vec<TableKind>,
    /// The join predicates evaluated or implied by the chain
    filters: Vec<Expr>,
    /// For each column of the join, its position in a row of the chain.
    /// [None] if the orders agree.
    remap: Option<Vec<usize>>,
    schema: OnceLock<Schema>,
}

impl SquashedTable {
    pub fn new(
        chain: Chain,
        source: Arc<dyn ChainSource>,
        tables: Vec<TableKind>,
        filters: Vec<Expr>,
    ) -> Result<Self, ColumnNotFound> {
        let original = tables
            .iter()
            .fold(Schema::default(), |schema, kind| schema.concat(kind.schema()));
        let remap = schema_remap(&original, &chain.schema())?;
        Ok(Self {
            chain,
            source,
            tables,
            filters,
            remap,
            schema: OnceLock::new(),
        })
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn tables(&self) -> &[TableKind] {
        &self.tables
    }

    pub fn filters(&self) -> &[Expr] {
        &self.filters
    }

    pub fn remap(&self) -> Option<&[usize]> {
        self.remap.as_deref()
    }
}

/// The position in `actual` of each column of `original`,
/// or [None] if both schemas are the same
fn schema_remap(original: &Schema, actual: &Schema) -> Result<Option<Vec<usize>>, ColumnNotFound> {
    let remap = original
        .iter()
        .map(|col| {
            actual
                .position(&col.source, &col.name)
                .ok_or_else(|| ColumnNotFound::new(&col.source, &col.name))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let identity = remap.len() == actual.len() && remap.iter().enumerate().all(|(i, pos)| i == *pos);
    Ok((!identity).then_some(remap))
}

impl fmt::Debug for SquashedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SquashedTable")
            .field("chain", &self.chain)
            .field("tables", &self.tables)
            .field("remap", &self.remap)
            .finish_non_exhaustive()
    }
}

/// ```text
/// SquashedTable(repositories, refs)
/// Chain: RepoRefs(All(repositories), refs.ref_name = "HEAD")
/// Filters: repositories.repository_id = refs.repository_id, refs.ref_name = "HEAD"
/// ```
impl fmt::Display for SquashedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SquashedTable({})", self.tables.iter().join(", "))?;
        write!(f, "\nChain: {}", self.chain)?;
        if !self.filters.is_empty() {
            write!(f, "\nFilters: {}", self.filters.iter().join(", "))?;
        }
        Ok(())
    }
}

impl Table for SquashedTable {
    fn name(&self) -> &str {
        "squashed_table"
    }

    fn schema(&self) -> &Schema {
        self.schema.get_or_init(|| {
            let schema = self.chain.schema();
            match &self.remap {
                Some(remap) => remap.iter().map(|i| schema[*i].clone()).collect(),
                None => schema,
            }
        })
    }

    fn row_iter(&self, ctx: &Context) -> Result<Box<dyn RowIter>> {
        let span = tracing::debug_span!(
            parent: ctx.span(),
            "gitbase.SquashedTable",
            tables = %self.tables.iter().join(", ")
        );
        let ctx = ctx.with_span(span.clone());
        let mut iter: Box<dyn RowIter> = Box::new(ChainRowIter::new(self.source.open(&ctx, &self.chain)?));
        if let Some(remap) = &self.remap {
            iter = Box::new(SchemaMapperIter {
                input: iter,
                remap: remap.clone(),
            });
        }
        Ok(Box::new(SpanIter::new(span, iter)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reorders the columns of each row of its input
struct SchemaMapperIter {
    input: Box<dyn RowIter>,
    remap: Vec<usize>,
}

impl RowIter for SchemaMapperIter {
    fn next(&mut self) -> Result<Option<Row>> {
        let Some(row) = self.input.next()? else {
            return Ok(None);
        };
        let row = self
            .remap
            .iter()
            .map(|i| {
                row.get(*i)
                    .cloned()
                    .ok_or_else(|| anyhow!("chain row has {} columns, expected at least {}", row.len(), i + 1))
            })
            .collect::<Result<_>>()?;
        Ok(Some(row))
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }
}
