//! The Git tables and the order in which iterator chains visit them.

use std::{
    any::Any,
    fmt,
    sync::{Arc, LazyLock},
};

use anyhow::Result;
use enum_map::{Enum, EnumMap};
use gitql_expr::{Column, Schema, Type};
use gitql_plan::{Context, RowIter, Table};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::chain::{Chain, ChainRowIter, ChainSource};

/// A Git table that can take part in an iterator chain.
///
/// Variants are declared in hierarchy order,
/// so that the derived [Ord] sorts parents before their children.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Enum, EnumIter, EnumString, IntoStaticStr, Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum TableKind {
    Repositories,
    Remotes,
    #[strum(serialize = "refs")]
    References,
    RefCommits,
    Commits,
    CommitTrees,
    TreeEntries,
    CommitBlobs,
    Blobs,
}

static SCHEMAS: LazyLock<EnumMap<TableKind, Schema>> = LazyLock::new(|| EnumMap::from_fn(TableKind::build_schema));

impl TableKind {
    /// The SQL name of this table
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// The columns of this table, qualified by its name
    pub fn schema(self) -> &'static Schema {
        &SCHEMAS[self]
    }

    fn build_schema(self) -> Schema {
        use Type::*;
        let columns: Vec<(&str, Type)> = match self {
            Self::Repositories => vec![("repository_id", Text)],
            Self::Remotes => vec![
                ("repository_id", Text),
                ("remote_name", Text),
                ("remote_push_url", Text),
                ("remote_fetch_url", Text),
                ("remote_push_refspec", Text),
                ("remote_fetch_refspec", Text),
            ],
            Self::References => vec![("repository_id", Text), ("ref_name", Text), ("commit_hash", Text)],
            Self::RefCommits => vec![
                ("repository_id", Text),
                ("commit_hash", Text),
                ("ref_name", Text),
                ("history_index", Int64),
            ],
            Self::Commits => vec![
                ("repository_id", Text),
                ("commit_hash", Text),
                ("commit_author_name", Text),
                ("commit_author_email", Text),
                ("commit_author_when", Timestamp),
                ("committer_name", Text),
                ("committer_email", Text),
                ("committer_when", Timestamp),
                ("commit_message", Text),
                ("tree_hash", Text),
                ("commit_parents", Array(Box::new(Text))),
            ],
            Self::CommitTrees => vec![("repository_id", Text), ("commit_hash", Text), ("tree_hash", Text)],
            Self::TreeEntries => vec![
                ("repository_id", Text),
                ("tree_entry_name", Text),
                ("blob_hash", Text),
                ("tree_hash", Text),
                ("tree_entry_mode", Text),
            ],
            Self::CommitBlobs => vec![("repository_id", Text), ("commit_hash", Text), ("blob_hash", Text)],
            Self::Blobs => vec![
                ("repository_id", Text),
                ("blob_hash", Text),
                ("blob_size", Int64),
                ("blob_content", Blob),
            ],
        };
        columns
            .into_iter()
            .map(|(name, ty)| Column::new(self.name(), name, ty))
            .collect()
    }
}

/// An unsquashed Git table, scanned on its own
#[derive(Clone)]
pub struct GitTable {
    pub kind: TableKind,
    pub source: Arc<dyn ChainSource>,
}

impl GitTable {
    pub fn new(kind: TableKind, source: Arc<dyn ChainSource>) -> Self {
        Self { kind, source }
    }
}

impl fmt::Debug for GitTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GitTable").field(&self.kind).finish()
    }
}

impl fmt::Display for GitTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.name())
    }
}

impl Table for GitTable {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn schema(&self) -> &Schema {
        self.kind.schema()
    }

    fn row_iter(&self, ctx: &Context) -> Result<Box<dyn RowIter>> {
        let iter = self.source.open(ctx, &Chain::all(self.kind, None))?;
        Ok(Box::new(ChainRowIter::new(iter)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
