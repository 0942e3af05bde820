//! Turning a set of joined Git tables into a single iterator chain.

use std::{collections::BTreeSet, sync::Arc};

use gitql_expr::Expr;
use gitql_plan::{Node, Table};
use itertools::Itertools;
use log::debug;

use crate::{
    chain::{Chain, Step},
    errors::SquashError,
    filters::{filters_for_join, filters_for_table, has_main_tree_filter, has_ref_head_filter, transfer_filters},
    squashed::SquashedTable,
    tables::{GitTable, TableKind},
};

/// How a chain is extended with the rows of the next table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extension {
    /// Start the chain from every row of the table
    All,
    /// Start from every ref, hidden, and visit the commits of each
    AllRefCommits,
    Step(Step),
    /// Step through a hidden table first
    Through(Step, Step),
}

use Extension::{All, AllRefCommits, Through};
use TableKind::*;

/// The extension used for each pair of chain state and next table.
/// A chain without state has not been started.
static TRANSITIONS: &[(Option<TableKind>, TableKind, Extension)] = &[
    (None, Repositories, All),
    (None, Remotes, All),
    (None, References, All),
    (None, RefCommits, AllRefCommits),
    (None, Commits, All),
    (None, CommitTrees, All),
    (None, TreeEntries, All),
    (None, CommitBlobs, All),
    (None, Blobs, All),
    (Some(Repositories), Remotes, Extension::Step(Step::RepoRemotes)),
    (Some(Repositories), References, Extension::Step(Step::RepoRefs)),
    (Some(Repositories), RefCommits, Through(Step::RepoRefs, Step::RefRefCommits)),
    (Some(Repositories), Commits, Extension::Step(Step::RepoCommits)),
    (Some(Repositories), TreeEntries, Extension::Step(Step::RepoTreeEntries)),
    (Some(Repositories), Blobs, Extension::Step(Step::RepoBlobs)),
    (Some(Remotes), References, Extension::Step(Step::RemoteRefs)),
    (Some(References), RefCommits, Extension::Step(Step::RefRefCommits)),
    (Some(References), Commits, Extension::Step(Step::RefHeadCommits)),
    (Some(References), CommitTrees, Through(Step::RefHeadCommits, Step::CommitTrees)),
    (Some(References), CommitBlobs, Through(Step::RefHeadCommits, Step::CommitBlobs)),
    (Some(RefCommits), Commits, Extension::Step(Step::RefCommitCommits)),
    (Some(RefCommits), CommitTrees, Extension::Step(Step::CommitTrees)),
    (Some(RefCommits), CommitBlobs, Extension::Step(Step::CommitBlobs)),
    (Some(Commits), CommitTrees, Extension::Step(Step::CommitTrees)),
    (Some(Commits), TreeEntries, Through(Step::CommitMainTree, Step::TreeTreeEntries)),
    (Some(Commits), CommitBlobs, Extension::Step(Step::CommitBlobs)),
    (Some(CommitTrees), TreeEntries, Extension::Step(Step::TreeTreeEntries)),
    (Some(TreeEntries), Blobs, Extension::Step(Step::TreeEntryBlobs)),
    (Some(CommitBlobs), Blobs, Extension::Step(Step::CommitBlobBlobs)),
];

/// Narrower steps, taken when a pending filter proves
/// that only some of the rows of the wider step can match
static SKIP_AHEAD: &[(Step, Step, fn(&[Expr]) -> bool)] = &[
    (Step::RefRefCommits, Step::RefHeadRefCommits, has_ref_head_filter),
    (Step::CommitTrees, Step::CommitMainTree, has_main_tree_filter),
];

/// The columns of `ref_commits` that are copied from the ref the commit was reached from
const REF_COLUMNS: &[&str] = &["ref_name", "repository_id"];

fn transition(from: Option<TableKind>, to: TableKind) -> Option<Extension> {
    TRANSITIONS
        .iter()
        .find(|(state, kind, _)| *state == from && *kind == to)
        .map(|(_, _, extension)| *extension)
}

fn skip_ahead(step: Step, filters: &[Expr]) -> Step {
    SKIP_AHEAD
        .iter()
        .find(|(wide, _, proves)| *wide == step && proves(filters))
        .map_or(step, |(_, narrow, _)| *narrow)
}

/// Can a single chain visit each of `kinds`?
pub fn is_chainable(kinds: impl IntoIterator<Item = TableKind>) -> bool {
    let kinds: BTreeSet<_> = kinds.into_iter().collect();
    let mut state = None;
    for kind in kinds {
        if transition(state, kind).is_none() {
            return false;
        }
        state = Some(kind);
    }
    true
}

/// Extend `chain` with the rows of `to`,
/// attaching the filters the new iterator can evaluate
fn extend(
    chain: Option<Chain>,
    to: TableKind,
    filters: Vec<Expr>,
    read_content: bool,
) -> Result<(Chain, Vec<Expr>), SquashError> {
    let from = chain.as_ref().map(Chain::kind);
    let invalid = SquashError::InvalidChain { from, to };
    let extension = transition(from, to).ok_or_else(|| invalid.clone())?;
    let read_content = read_content && to == Blobs;

    match (extension, chain) {
        (All, None) => {
            let (filter, filters) = filters_for_table(to, filters, to.schema())?;
            Ok((Chain::all(to, filter), filters))
        }
        (AllRefCommits, None) => {
            let (moved, filters) = transfer_filters(filters, RefCommits, References, REF_COLUMNS)?;
            let refs = Chain::all(References, moved).hidden();
            let (filter, filters) = filters_for_table(RefCommits, filters, RefCommits.schema())?;
            Ok((Chain::extend(Step::RefRefCommits, refs, filter), filters))
        }
        (Extension::Step(step), Some(parent)) => {
            let step = skip_ahead(step, &filters);
            let schema = parent.schema().concat(to.schema());
            let (filter, filters) = filters_for_join(parent.kind(), to, filters, &schema)?;
            Ok((Chain::extend(step, parent, filter).with_content(read_content), filters))
        }
        (Through(hidden, step), Some(parent)) => {
            let schema = parent.schema().concat(to.schema());
            let (filter, filters) = filters_for_join(parent.kind(), to, filters, &schema)?;
            let parent = Chain::extend(hidden, parent, None).hidden();
            Ok((Chain::extend(step, parent, filter).with_content(read_content), filters))
        }
        _ => Err(invalid),
    }
}

/// Does `expr` need the contents of a blob?
fn reads_content(expr: &Expr) -> bool {
    expr.fields()
        .iter()
        .any(|field| &*field.table == Blobs.name() && &*field.name == "blob_content")
}

/// Build the node that replaces a squashed join of `tables`.
///
/// `filters` are the predicates of the join.
/// Those the chain can evaluate are attached to its iterators,
/// the rest are evaluated by a filter above the squashed table.
/// `columns` are the expressions evaluated over the output of the join,
/// if they are known.
pub fn build_squashed_table(
    tables: &[GitTable],
    filters: Vec<Expr>,
    columns: Option<&[Expr]>,
) -> Result<Node, SquashError> {
    let source = tables.first().ok_or(SquashError::NoTables)?.source.clone();
    let kinds: BTreeSet<_> = tables.iter().map(|table| table.kind).collect();
    let read_content =
        columns.is_none_or(|columns| columns.iter().any(reads_content)) || filters.iter().any(reads_content);

    let all_filters = filters.clone();
    let mut filters = filters;
    let mut chain = None;
    for kind in kinds {
        let (extended, remaining) = extend(chain, kind, filters, read_content)?;
        chain = Some(extended);
        filters = remaining;
    }
    let chain = chain.ok_or(SquashError::NoTables)?;
    debug!("squashed join of {} into {chain}", tables.iter().map(|t| t.kind).join(", "));

    let consumed = all_filters.into_iter().filter(|f| !filters.contains(f)).collect();
    let table = SquashedTable::new(chain, source, tables.iter().map(|t| t.kind).collect(), consumed)?;
    let schema = table.schema().clone();
    let node = Node::table(Arc::new(table));
    Ok(match Expr::conjunction(filters) {
        Some(filter) => Node::filter(node, filter.reindex(&schema)?),
        None => node,
    })
}
