//! Descriptors of nested Git iterators.
//!
//! A [Chain] describes how the rows of a squashed join are produced:
//! starting from every row of one table, each [Step] extends a row of the
//! previous table with the rows of the next table that belong to it,
//! e.g. a repository with each of its refs.
//! Evaluating a chain is left to a [ChainSource].

use std::fmt;

use anyhow::Result;
use gitql_expr::{Expr, Row, Schema};
use gitql_plan::{Context, RowIter};

use crate::tables::TableKind;

/// An extension of a chain from the rows of one table to the rows of another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    RepoRemotes,
    RepoRefs,
    RemoteRefs,
    /// Every commit reachable from a ref
    RefRefCommits,
    /// Only the commit a ref points to
    RefHeadRefCommits,
    RepoCommits,
    /// The commit a ref points to
    RefHeadCommits,
    RefCommitCommits,
    /// Every tree of a commit, including subtrees
    CommitTrees,
    /// Only the root tree of a commit
    CommitMainTree,
    RepoTreeEntries,
    TreeTreeEntries,
    CommitBlobs,
    RepoBlobs,
    TreeEntryBlobs,
    CommitBlobBlobs,
}

impl Step {
    /// The table whose rows this step produces
    pub fn target(self) -> TableKind {
        use TableKind::*;
        match self {
            Self::RepoRemotes => Remotes,
            Self::RepoRefs | Self::RemoteRefs => References,
            Self::RefRefCommits | Self::RefHeadRefCommits => RefCommits,
            Self::RepoCommits | Self::RefHeadCommits | Self::RefCommitCommits => Commits,
            Self::CommitTrees | Self::CommitMainTree => CommitTrees,
            Self::RepoTreeEntries | Self::TreeTreeEntries => TreeEntries,
            Self::CommitBlobs => CommitBlobs,
            Self::RepoBlobs | Self::TreeEntryBlobs | Self::CommitBlobBlobs => Blobs,
        }
    }
}

/// A description of a nested iterator
#[derive(Debug, Clone, PartialEq)]
pub enum Chain {
    /// Every row of a table
    All {
        kind: TableKind,
        /// Evaluated against the schema of `kind`
        filter: Option<Expr>,
        /// Rows are visited but their columns are not part of the output
        hidden: bool,
    },
    /// Each row of `parent` followed by each row of `step.target()` that belongs to it
    Extend {
        step: Step,
        parent: Box<Chain>,
        /// Evaluated against the schema of `parent` followed by the schema of the target
        filter: Option<Expr>,
        hidden: bool,
        /// Blob contents are only loaded when some column needs them
        read_content: bool,
    },
}

impl Chain {
    pub fn all(kind: TableKind, filter: Option<Expr>) -> Self {
        Self::All {
            kind,
            filter,
            hidden: false,
        }
    }

    pub fn extend(step: Step, parent: Self, filter: Option<Expr>) -> Self {
        Self::Extend {
            step,
            parent: Box::new(parent),
            filter,
            hidden: false,
            read_content: false,
        }
    }

    /// Exclude the columns of the last table from the output
    pub fn hidden(mut self) -> Self {
        match &mut self {
            Self::All { hidden, .. } | Self::Extend { hidden, .. } => *hidden = true,
        }
        self
    }

    /// Load the contents of the blobs produced by the last step
    pub fn with_content(mut self, read: bool) -> Self {
        if let Self::Extend { read_content, .. } = &mut self {
            *read_content = read;
        }
        self
    }

    /// The table the last step produces rows of
    pub fn kind(&self) -> TableKind {
        match self {
            Self::All { kind, .. } => *kind,
            Self::Extend { step, .. } => step.target(),
        }
    }

    pub fn is_hidden(&self) -> bool {
        match self {
            Self::All { hidden, .. } | Self::Extend { hidden, .. } => *hidden,
        }
    }

    pub fn filter(&self) -> Option<&Expr> {
        match self {
            Self::All { filter, .. } | Self::Extend { filter, .. } => filter.as_ref(),
        }
    }

    pub fn parent(&self) -> Option<&Self> {
        match self {
            Self::All { .. } => None,
            Self::Extend { parent, .. } => Some(parent),
        }
    }

    /// The columns of the rows this chain produces:
    /// the columns of every table that is not hidden, parents first
    pub fn schema(&self) -> Schema {
        let own = (!self.is_hidden()).then(|| self.kind().schema());
        let parent = self.parent().map(Self::schema).unwrap_or_default();
        match own {
            Some(own) => parent.concat(own),
            None => parent,
        }
    }

    /// The columns the filter of this chain is evaluated against
    pub fn filter_schema(&self) -> Schema {
        let parent = self.parent().map(Self::schema).unwrap_or_default();
        parent.concat(self.kind().schema())
    }

    /// The tables visited by this chain, hidden or not, in the order they are visited
    pub fn tables(&self) -> Vec<TableKind> {
        let mut tables = self.parent().map(Self::tables).unwrap_or_default();
        tables.push(self.kind());
        tables
    }
}

/// Prints the nested iterator constructors, innermost last:
///
/// ```text
/// RefHeadCommits(RepoRefs(All(repositories), refs.ref_name = "HEAD"))
/// ```
impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All { kind, .. } => write!(f, "All({kind})")?,
            Self::Extend { step, parent, .. } => write!(f, "{step:?}({parent}")?,
        }
        if let Some(filter) = self.filter() {
            match self {
                Self::All { .. } => write!(f, "[{filter}]")?,
                Self::Extend { .. } => write!(f, ", {filter}")?,
            }
        }
        if let Self::Extend { .. } = self {
            f.write_str(")")?;
        }
        if self.is_hidden() {
            f.write_str(" hidden")?;
        }
        Ok(())
    }
}

/// Evaluates chains over a set of repositories
pub trait ChainSource: Send + Sync {
    fn open(&self, ctx: &Context, chain: &Chain) -> Result<Box<dyn ChainIter>>;
}

/// A cursor over the rows of a chain
pub trait ChainIter: Send {
    /// Move to the next row.
    /// Returns `false` once the chain is exhausted.
    fn advance(&mut self) -> Result<bool>;

    /// The current row, laid out as [Chain::schema]
    fn row(&self) -> Row;

    fn close(&mut self) -> Result<()>;
}

/// Materializes the rows of a [ChainIter]
pub struct ChainRowIter {
    iter: Box<dyn ChainIter>,
}

impl ChainRowIter {
    pub fn new(iter: Box<dyn ChainIter>) -> Self {
        Self { iter }
    }
}

impl RowIter for ChainRowIter {
    fn next(&mut self) -> Result<Option<Row>> {
        Ok(self.iter.advance()?.then(|| self.iter.row()))
    }

    fn close(&mut self) -> Result<()> {
        self.iter.close()
    }
}

#[cfg(test)]
mod tests {
    use gitql_expr::{Expr, Type};
    use pretty_assertions::assert_eq;

    use super::{Chain, Step};
    use crate::tables::TableKind::*;

    #[test]
    fn hidden_tables_are_not_in_the_schema() {
        let chain = Chain::extend(
            Step::RefRefCommits,
            Chain::extend(Step::RepoRefs, Chain::all(Repositories, None), None).hidden(),
            None,
        );

        assert_eq!(chain.kind(), RefCommits);
        assert_eq!(chain.tables(), vec![Repositories, References, RefCommits]);
        assert_eq!(
            chain.schema(),
            Repositories.schema().clone().concat(RefCommits.schema())
        );
        assert_eq!(chain.filter_schema(), chain.schema());

        let root = Chain::all(References, None).hidden();
        assert!(root.schema().is_empty());
        assert_eq!(&root.filter_schema(), References.schema());
    }

    #[test]
    fn display() {
        let filter = Expr::equals(Expr::field("refs", "ref_name", 2, Type::Text), Expr::lit("HEAD"));
        let chain = Chain::extend(
            Step::CommitTrees,
            Chain::extend(Step::RefHeadCommits, Chain::extend(Step::RepoRefs, Chain::all(Repositories, None), Some(filter)), None)
                .hidden(),
            None,
        );
        assert_eq!(
            chain.to_string(),
            "CommitTrees(RefHeadCommits(RepoRefs(All(repositories), refs.ref_name = \"HEAD\")) hidden)"
        );
    }
}
