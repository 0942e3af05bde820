//! Assigning the predicates of a squashed join to the iterators of its chain.
//!
//! Every function takes the pending predicates by value
//! and returns those it did not consume, in their original order.

use gitql_expr::{errors::ColumnNotFound, Expr, FieldRef, Schema};
use log::trace;

use crate::{
    redundancy::{is_column_eq, is_redundant},
    tables::TableKind,
};

type Assigned = (Option<Expr>, Vec<Expr>);

/// Split `filters` into those referencing only columns of `tables` and the rest
pub fn filters_for_tables(filters: Vec<Expr>, tables: &[&str]) -> (Vec<Expr>, Vec<Expr>) {
    filters.into_iter().partition(|expr| expr.refers_only_to(tables))
}

/// AND `filters` together and index them against `schema`
fn conjoin(filters: Vec<Expr>, schema: &Schema) -> Result<Option<Expr>, ColumnNotFound> {
    Expr::conjunction(filters).map(|expr| expr.reindex(schema)).transpose()
}

/// The filters that can be evaluated by the iterator of a single table
pub fn filters_for_table(kind: TableKind, filters: Vec<Expr>, schema: &Schema) -> Result<Assigned, ColumnNotFound> {
    let (local, remaining) = filters_for_tables(filters, &[kind.name()]);
    Ok((conjoin(local, schema)?, remaining))
}

/// The filters that can be evaluated when a chain in state `parent` is extended with `child`.
///
/// `parent` must precede `child` in the table hierarchy.
/// Predicates the extension enforces by construction are consumed but not evaluated.
pub fn filters_for_join(
    parent: TableKind,
    child: TableKind,
    filters: Vec<Expr>,
    schema: &Schema,
) -> Result<Assigned, ColumnNotFound> {
    let (joined, remaining) = filters_for_tables(filters, &[parent.name(), child.name()]);
    let (redundant, joined): (Vec<_>, Vec<_>) = joined
        .into_iter()
        .partition(|expr| is_redundant(expr, parent, child));
    for expr in &redundant {
        trace!("{expr} is implied by joining {parent} with {child}");
    }
    Ok((conjoin(joined, schema)?, remaining))
}

/// Split off the filters of `table` that reference only the given `columns` of it
pub fn filters_for_columns(filters: Vec<Expr>, table: &str, columns: &[&str]) -> (Vec<Expr>, Vec<Expr>) {
    filters.into_iter().partition(|expr| {
        let fields = expr.fields();
        !fields.is_empty()
            && fields
                .iter()
                .all(|field| &*field.table == table && columns.contains(&&*field.name))
    })
}

/// Move the filters of `from` over the given `columns` onto the table `to`,
/// which shares those columns.
/// The moved filters are indexed against the schema of `to`.
pub fn transfer_filters(
    filters: Vec<Expr>,
    from: TableKind,
    to: TableKind,
    columns: &[&str],
) -> Result<Assigned, ColumnNotFound> {
    let (moved, remaining) = filters_for_columns(filters, from.name(), columns);
    let moved = moved
        .into_iter()
        .map(|expr| {
            expr.try_map(&mut |expr| match expr {
                Expr::Field(field) => Ok(Expr::Field(FieldRef {
                    table: to.name().into(),
                    ..field
                })),
                expr => Ok(expr),
            })
        })
        .collect::<Result<Vec<_>, ColumnNotFound>>()?;
    Ok((conjoin(moved, to.schema())?, remaining))
}

/// Does any filter require the commit of a ref to be the ref's HEAD?
pub fn has_ref_head_filter(filters: &[Expr]) -> bool {
    filters.iter().any(|expr| {
        is_column_eq(expr, ("refs", "commit_hash"), ("commits", "commit_hash"))
            || is_column_eq(expr, ("refs", "commit_hash"), ("ref_commits", "commit_hash"))
    })
}

/// Does any filter require the tree of a commit to be its main tree?
pub fn has_main_tree_filter(filters: &[Expr]) -> bool {
    filters
        .iter()
        .any(|expr| is_column_eq(expr, ("commits", "tree_hash"), ("commit_trees", "tree_hash")))
}
