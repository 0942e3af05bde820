//! An in-memory [ChainSource], for tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use anyhow::{anyhow, Result};
use enum_map::EnumMap;
use gitql_expr::{Row, Value};
use gitql_plan::Context;

use crate::{
    chain::{Chain, ChainIter, ChainSource, Step},
    tables::TableKind,
};

/// The rows of every Git table, stored as plain vectors
#[derive(Default)]
pub struct MemRepos {
    rows: EnumMap<TableKind, Vec<Row>>,
    /// The number of chains opened and closed
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl MemRepos {
    pub fn insert(&mut self, kind: TableKind, row: Row) -> Result<()> {
        if row.len() != kind.schema().len() {
            return Err(anyhow!(
                "a row of {kind} has {} columns, got {}",
                kind.schema().len(),
                row.len()
            ));
        }
        self.rows[kind].push(row);
        Ok(())
    }

    pub fn rows(&self, kind: TableKind) -> &[Row] {
        &self.rows[kind]
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Evaluate `chain` eagerly
    fn eval(&self, chain: &Chain) -> Result<Vec<Frame>> {
        let mut frames = vec![];
        match chain {
            Chain::All { kind, filter, hidden } => {
                for row in &self.rows[*kind] {
                    if filter.as_ref().map_or(Ok(true), |f| f.eval_bool(row))? {
                        frames.push(Frame {
                            out: if *hidden { vec![] } else { row.clone() },
                            last: row.clone(),
                        });
                    }
                }
            }
            Chain::Extend {
                step,
                parent,
                filter,
                hidden,
                read_content,
            } => {
                let from = parent.kind();
                let to = step.target();
                let keys = step_keys(*step);
                for frame in self.eval(parent)? {
                    for child in &self.rows[to] {
                        if !links(from, &frame.last, to, child, keys)? {
                            continue;
                        }
                        let mut child = child.clone();
                        if to == TableKind::Blobs && !*read_content {
                            strip_content(&mut child)?;
                        }
                        let row: Row = frame.out.iter().chain(&child).cloned().collect();
                        if !filter.as_ref().map_or(Ok(true), |f| f.eval_bool(&row))? {
                            continue;
                        }
                        frames.push(Frame {
                            out: if *hidden { frame.out.clone() } else { row },
                            last: child,
                        });
                    }
                }
            }
        }
        Ok(frames)
    }
}

/// A row of a chain,
/// and the row of the last table it visited, even if that table is hidden
struct Frame {
    out: Row,
    last: Row,
}

/// The columns a row of the parent table and a row of the target table of `step` agree on
fn step_keys(step: Step) -> &'static [(&'static str, &'static str)] {
    const REPO: (&str, &str) = ("repository_id", "repository_id");
    const COMMIT: (&str, &str) = ("commit_hash", "commit_hash");
    match step {
        Step::RepoRemotes | Step::RepoRefs | Step::RemoteRefs | Step::RepoCommits => &[REPO],
        Step::RepoTreeEntries | Step::RepoBlobs => &[REPO],
        Step::RefRefCommits => &[REPO, ("ref_name", "ref_name")],
        Step::RefHeadRefCommits => &[REPO, ("ref_name", "ref_name"), COMMIT],
        Step::RefHeadCommits | Step::RefCommitCommits | Step::CommitTrees | Step::CommitBlobs => &[REPO, COMMIT],
        Step::CommitMainTree => &[REPO, COMMIT, ("tree_hash", "tree_hash")],
        Step::TreeTreeEntries => &[REPO, ("tree_hash", "tree_hash")],
        Step::TreeEntryBlobs | Step::CommitBlobBlobs => &[REPO, ("blob_hash", "blob_hash")],
    }
}

fn links(from: TableKind, parent: &Row, to: TableKind, child: &Row, keys: &[(&str, &str)]) -> Result<bool> {
    for (a, b) in keys {
        if column(from, parent, a)? != column(to, child, b)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn column<'a>(kind: TableKind, row: &'a Row, name: &str) -> Result<&'a Value> {
    kind.schema()
        .position(kind.name(), name)
        .and_then(|i| row.get(i))
        .ok_or_else(|| anyhow!("no column {name} in a row of {kind}"))
}

fn strip_content(blob: &mut Row) -> Result<()> {
    let i = TableKind::Blobs
        .schema()
        .position("blobs", "blob_content")
        .ok_or_else(|| anyhow!("blobs have no content column"))?;
    if let Some(content) = blob.get_mut(i) {
        *content = Value::Null;
    }
    Ok(())
}

impl ChainSource for MemRepos {
    fn open(&self, _: &Context, chain: &Chain) -> Result<Box<dyn ChainIter>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemChainIter {
            rows: self.eval(chain)?.into_iter().map(|frame| frame.out).collect(),
            pos: None,
            closed: self.closed.clone(),
        }))
    }
}

struct MemChainIter {
    rows: Vec<Row>,
    pos: Option<usize>,
    closed: Arc<AtomicUsize>,
}

impl ChainIter for MemChainIter {
    fn advance(&mut self) -> Result<bool> {
        let pos = self.pos.map_or(0, |pos| pos + 1);
        self.pos = Some(pos);
        Ok(pos < self.rows.len())
    }

    fn row(&self) -> Row {
        self.pos
            .and_then(|pos| self.rows.get(pos))
            .cloned()
            .unwrap_or_default()
    }

    fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Log to stderr, at the level set by `RUST_LOG`
pub fn enable_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}

/// A small set of repositories with unique object hashes:
///
/// - two repositories, `r1` with a remote and `r2` without
/// - a `HEAD` and a `main` ref in each
/// - a linear history of two commits per repository,
///   each with a root tree and one subtree
/// - blobs referenced by tree entries
pub fn fixture() -> Result<MemRepos> {
    use TableKind::*;

    let text = |s: String| Value::Text(s);
    let mut repos = MemRepos::default();
    for repo in ["r1", "r2"] {
        let id = || text(repo.to_owned());
        let hash = |kind: &str, n: usize| text(format!("{repo}-{kind}{n}"));
        repos.insert(Repositories, vec![id()])?;
        if repo == "r1" {
            repos.insert(
                Remotes,
                ["origin", "https://example.com/r1", "https://example.com/r1", "+refs/heads/*", "+refs/heads/*"]
                    .into_iter()
                    .fold(vec![id()], |mut row, v| {
                        row.push(Value::from(v));
                        row
                    }),
            )?;
        }

        // c1 <- c2, HEAD points at c2 and main at c1
        for n in 1..=2 {
            let parents = if n == 1 { vec![] } else { vec![hash("c", n - 1)] };
            repos.insert(
                Commits,
                vec![
                    id(),
                    hash("c", n),
                    Value::from("author"),
                    Value::from("author@example.com"),
                    Value::Timestamp(n as i64),
                    Value::from("committer"),
                    Value::from("committer@example.com"),
                    Value::Timestamp(n as i64),
                    text(format!("commit {n} of {repo}")),
                    hash("t", n),
                    Value::Array(parents),
                ],
            )?;
            // The root tree and a subtree shared by both commits
            for tree in [hash("t", n), hash("t", 0)] {
                repos.insert(CommitTrees, vec![id(), hash("c", n), tree])?;
            }
            repos.insert(TreeEntries, vec![id(), text(format!("README{n}")), hash("b", n), hash("t", n), Value::from("100644")])?;
            repos.insert(TreeEntries, vec![id(), Value::from("lib"), hash("t", 0), hash("t", n), Value::from("040000")])?;
            for blob in [hash("b", n), hash("b", 0)] {
                repos.insert(CommitBlobs, vec![id(), hash("c", n), blob])?;
            }
        }
        repos.insert(TreeEntries, vec![id(), Value::from("lib.rs"), hash("b", 0), hash("t", 0), Value::from("100644")])?;
        for n in 0..=2 {
            let content = format!("blob {n} of {repo}").into_bytes();
            repos.insert(Blobs, vec![id(), hash("b", n), Value::Int64(content.len() as i64), Value::Blob(content)])?;
        }

        for (name, head) in [("HEAD", 2), ("refs/heads/main", 1)] {
            repos.insert(References, vec![id(), text(name.to_owned()), hash("c", head)])?;
            for (index, n) in (1..=head).rev().enumerate() {
                repos.insert(RefCommits, vec![id(), hash("c", n), text(name.to_owned()), Value::Int64(index as i64)])?;
            }
        }
    }
    Ok(repos)
}

#[cfg(test)]
mod tests {
    use gitql_expr::{Expr, Type, Value};
    use gitql_plan::{iter::collect_rows, Context};
    use pretty_assertions::assert_eq;

    use super::fixture;
    use crate::{
        chain::{Chain, ChainRowIter, ChainSource, Step},
        tables::TableKind::*,
    };

    #[test]
    fn hidden_tables_link_rows() -> anyhow::Result<()> {
        let repos = fixture()?;
        // The commits of the HEAD ref of r1, without the ref
        let refs = Chain::all(
            References,
            Some(Expr::and(
                Expr::equals(Expr::field("refs", "repository_id", 0, Type::Text), Expr::lit("r1")),
                Expr::equals(Expr::field("refs", "ref_name", 1, Type::Text), Expr::lit("HEAD")),
            )),
        )
        .hidden();
        let chain = Chain::extend(Step::RefRefCommits, refs, None);

        let mut iter = ChainRowIter::new(repos.open(&Context::new(), &chain)?);
        let rows = collect_rows(&mut iter)?;
        assert_eq!(
            rows,
            vec![
                vec![Value::from("r1"), Value::from("r1-c2"), Value::from("HEAD"), Value::Int64(0)],
                vec![Value::from("r1"), Value::from("r1-c1"), Value::from("HEAD"), Value::Int64(1)],
            ]
        );
        assert_eq!((repos.opened(), repos.closed()), (1, 1));
        Ok(())
    }

    #[test]
    fn blob_content_is_optional() -> anyhow::Result<()> {
        let repos = fixture()?;
        let chain = |read| {
            Chain::extend(Step::TreeEntryBlobs, Chain::all(TreeEntries, None), None).with_content(read)
        };
        let content = |read| -> anyhow::Result<Vec<Value>> {
            let mut iter = ChainRowIter::new(repos.open(&Context::new(), &chain(read))?);
            Ok(collect_rows(&mut iter)?.into_iter().map(|row| row[8].clone()).collect())
        };
        assert!(content(false)?.iter().all(Value::is_null));
        assert!(content(true)?.iter().all(|v| !v.is_null()));
        Ok(())
    }
}
