//! Squashing inner joins of Git tables into a single table.
//!
//! A join like
//!
//! ```text
//! Inner Join: refs.commit_hash = commits.commit_hash
//!   -> Inner Join: repositories.repository_id = refs.repository_id
//!       -> Table: repositories
//!       -> Table: refs
//!   -> Table: commits
//! ```
//!
//! is evaluated as a nested loop over every commit, for every ref, for every repository,
//! even though each ref points at exactly one commit.
//! When every table of a join is a Git table and the join condition
//! relates adjacent tables by the key that connects them,
//! the join is replaced by a [SquashedTable](crate::squashed::SquashedTable)
//! that walks from each repository to its refs and from each ref to its commit.
//!
//! The plan is rewritten bottom-up in two passes.
//! The first pass replaces each squashable join with a [JoinedTables] placeholder,
//! folding in the filters and projections above it,
//! so that a parent join can merge it with its other input.
//! The second pass builds the squashed table for every placeholder left.
//! Placeholders only exist in the [Partial] tree used by this rule,
//! so they can never reach execution.

use std::{collections::BTreeSet, convert::Infallible};

use anyhow::{bail, Result};
use gitql_expr::{Column, Expr};
use gitql_plan::{Analyzer, Context, Join, Node, Project, Table};
use itertools::Itertools;
use log::debug;

use crate::{
    builder::{build_squashed_table, is_chainable},
    redundancy::is_redundant,
    tables::{GitTable, TableKind},
};

/// A plan that is being squashed
enum Partial {
    Plan(Node),
    Joined(JoinedTables),
}

/// A squashable join that has not been turned into a squashed table yet
struct JoinedTables {
    /// The joined tables, in join order
    tables: Vec<GitTable>,
    /// The join conditions and the filters over the join,
    /// in terms of the columns of `tables`
    filters: Vec<Expr>,
    /// The output of the join,
    /// the column each expression is projected as and its definition in terms of the columns of `tables`
    output: Vec<(Column, Expr)>,
    /// Was the output of the join projected?
    projected: bool,
}

impl JoinedTables {
    fn scan(table: &GitTable) -> Self {
        Self {
            tables: vec![table.clone()],
            filters: vec![],
            output: table
                .schema()
                .iter()
                .map(|col| (col.clone(), Expr::column(col, 0)))
                .collect(),
            projected: false,
        }
    }

    /// Collect the tables, filters and projections of a squashable plan
    fn from_plan(plan: Node) -> Result<Self> {
        Ok(match plan {
            Node::Table(table) => match table.downcast_ref::<GitTable>() {
                Some(table) => Self::scan(table),
                None => bail!("`{}` is not a Git table", table.table().name()),
            },
            Node::InnerJoin(Join { lhs, rhs, on }) => Self::from_plan(*lhs)?.join(Self::from_plan(*rhs)?, on),
            Node::Filter(input, expr) => Self::from_plan(*input)?.filter(expr),
            Node::Project(Project { input, exprs }) => Self::from_plan(*input)?.project(exprs),
            // Only aliases that keep the name of their table are squashable
            Node::TableAlias(input, _) => Self::from_plan(*input)?,
            plan => bail!("cannot squash a plan containing\n{plan}"),
        })
    }

    fn from_partial(partial: Partial) -> Result<Self> {
        match partial {
            Partial::Plan(plan) => Self::from_plan(plan),
            Partial::Joined(joined) => Ok(joined),
        }
    }

    fn join(mut self, other: Self, on: Expr) -> Self {
        self.tables.extend(other.tables);
        self.filters.extend(other.filters);
        self.output.extend(other.output);
        self.projected |= other.projected;
        self.filter(on)
    }

    fn filter(mut self, expr: Expr) -> Self {
        for expr in expr.split_conjunction() {
            let expr = inline(expr, &self.output);
            self.filters.push(expr);
        }
        self
    }

    fn project(mut self, exprs: Vec<Expr>) -> Self {
        self.output = exprs
            .into_iter()
            .map(|expr| (expr.to_column(), inline(expr, &self.output)))
            .collect();
        self.projected = true;
        self
    }

    /// Build the squashed table,
    /// followed by the projection of the join if it had one
    fn finalize(self) -> Result<Node> {
        let Self {
            tables,
            filters,
            output,
            projected,
        } = self;
        let exprs = output.into_iter().map(|(_, expr)| expr).collect_vec();
        let columns = projected.then_some(&exprs[..]);
        let node = build_squashed_table(&tables, filters, columns)?;
        if !projected {
            return Ok(node);
        }
        let schema = node.schema();
        let exprs = exprs
            .into_iter()
            .map(|expr| expr.reindex(&schema))
            .collect::<Result<_, _>>()?;
        Ok(Node::project(node, exprs))
    }
}

/// Rewrite `expr`, which references the columns of `output`,
/// to reference the columns the output is computed from
fn inline(expr: Expr, output: &[(Column, Expr)]) -> Expr {
    let inlined = expr.try_map::<Infallible>(&mut |expr| {
        let definition = match &expr {
            Expr::Field(field) => output
                .iter()
                .find(|(col, _)| col.source == field.table && col.name == field.name),
            _ => None,
        };
        Ok(match definition {
            Some((_, Expr::Alias(def, _))) => (**def).clone(),
            Some((_, def)) => def.clone(),
            None => expr,
        })
    });
    match inlined {
        Ok(expr) => expr,
        Err(never) => match never {},
    }
}

/// Squash every join of Git tables that can be evaluated by a single iterator chain
pub fn squash_joins(_: &Context, _: &Analyzer, plan: Node) -> Result<Node> {
    if !plan.resolved() {
        return Ok(plan);
    }
    finalize(squash(plan)?)
}

/// Replace every squashable join with a placeholder, bottom-up
fn squash(plan: Node) -> Result<Partial> {
    Ok(match plan {
        Node::InnerJoin(Join { lhs, rhs, on }) => {
            let lhs = squash(*lhs)?;
            let rhs = squash(*rhs)?;
            if is_join_squashable(&lhs, &rhs, &on) {
                debug!("squashing join on {on}");
                let lhs = JoinedTables::from_partial(lhs)?;
                let rhs = JoinedTables::from_partial(rhs)?;
                Partial::Joined(lhs.join(rhs, on))
            } else {
                debug!("join on {on} cannot be squashed");
                Partial::Plan(Node::inner_join(finalize(lhs)?, finalize(rhs)?, on))
            }
        }
        Node::Filter(input, expr) => match squash(*input)? {
            Partial::Joined(joined) => Partial::Joined(joined.filter(expr)),
            Partial::Plan(input) => Partial::Plan(Node::filter(input, expr)),
        },
        Node::Project(Project { input, exprs }) => match squash(*input)? {
            Partial::Joined(joined) => Partial::Joined(joined.project(exprs)),
            Partial::Plan(input) => Partial::Plan(Node::project(input, exprs)),
        },
        plan => Partial::Plan(plan.try_map_children(&mut |child| finalize(squash(child)?))?),
    })
}

fn finalize(partial: Partial) -> Result<Node> {
    match partial {
        Partial::Plan(plan) => Ok(plan),
        Partial::Joined(joined) => joined.finalize(),
    }
}

/// Can the join of `lhs` and `rhs` on `on` be evaluated by a single iterator chain?
fn is_join_squashable(lhs: &Partial, rhs: &Partial, on: &Expr) -> bool {
    if !is_squashable_leaf(lhs) || !is_squashable_leaf(rhs) {
        return false;
    }
    let (lhs, rhs) = (leaf_kinds(lhs), leaf_kinds(rhs));
    let kinds = lhs.iter().chain(&rhs).copied().collect::<BTreeSet<_>>();
    // A chain visits each table once
    if kinds.len() != lhs.len() + rhs.len() || !is_chainable(kinds) {
        return false;
    }
    is_join_cond_squashable(&lhs, &rhs, on)
}

fn is_squashable_leaf(partial: &Partial) -> bool {
    match partial {
        Partial::Joined(_) => true,
        Partial::Plan(plan) => is_squashable_plan(plan),
    }
}

/// Is `plan` a Git table, optionally filtered, projected or aliased?
///
/// Joins left in a plan are those [squash] already rejected,
/// so a plan containing one is never squashable.
fn is_squashable_plan(plan: &Node) -> bool {
    match plan {
        Node::Table(table) => table.downcast_ref::<GitTable>().is_some(),
        Node::Filter(input, _) | Node::Project(Project { input, .. }) => is_squashable_plan(input),
        Node::TableAlias(input, name) => {
            is_squashable_plan(input) && input.schema().iter().all(|col| col.source == *name)
        }
        _ => false,
    }
}

/// The Git tables of a squashable leaf
fn leaf_kinds(partial: &Partial) -> Vec<TableKind> {
    match partial {
        Partial::Joined(joined) => joined.tables.iter().map(|table| table.kind).collect(),
        Partial::Plan(plan) => {
            let mut kinds = vec![];
            plan.visit(&mut |node| {
                if let Node::Table(table) = node
                    && let Some(table) = table.downcast_ref::<GitTable>()
                {
                    kinds.push(table.kind);
                }
            });
            kinds
        }
    }
}

/// Does the join condition relate the tables of one side
/// to the single table of the other side by a key the chain enforces?
fn is_join_cond_squashable(lhs: &[TableKind], rhs: &[TableKind], on: &Expr) -> bool {
    let (table, others) = match (lhs, rhs) {
        (_, [table]) => (*table, lhs),
        ([table], _) => (*table, rhs),
        _ => return false,
    };
    let conditions = on.clone().split_conjunction();
    others.iter().any(|other| {
        let (parent, child) = if *other < table { (*other, table) } else { (table, *other) };
        conditions.iter().any(|cond| is_redundant(cond, parent, child))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use gitql_expr::{Expr, Type};
    use gitql_plan::{Analyzer, AnalyzerConfig, Context, Node, Project};
    use pretty_assertions::assert_eq;

    use super::squash_joins;
    use crate::{
        chain::{Chain, Step},
        mem::MemRepos,
        squashed::SquashedTable,
        tables::{GitTable, TableKind},
    };

    struct Tables(Arc<MemRepos>);

    impl Tables {
        fn new() -> Self {
            Self(Arc::new(MemRepos::default()))
        }

        fn scan(&self, kind: TableKind) -> Node {
            Node::table(Arc::new(GitTable::new(kind, self.0.clone())))
        }
    }

    fn col(table: &str, name: &str, index: usize) -> Expr {
        Expr::field(table, name, index, Type::Text)
    }

    fn run(plan: Node) -> Result<Node> {
        let a = Analyzer::new(AnalyzerConfig::with_parallelism(1));
        squash_joins(&Context::new(), &a, plan)
    }

    fn squashed(node: &Node) -> Option<&SquashedTable> {
        match node {
            Node::Table(table) => table.downcast_ref::<SquashedTable>(),
            Node::Filter(input, _) | Node::Project(Project { input, .. }) => squashed(input),
            _ => None,
        }
    }

    fn repos_refs(t: &Tables) -> Node {
        Node::inner_join(
            t.scan(TableKind::Repositories),
            t.scan(TableKind::References),
            Expr::equals(col("repositories", "repository_id", 0), col("refs", "repository_id", 1)),
        )
    }

    #[test]
    fn squash_two_tables() -> Result<()> {
        let t = Tables::new();
        let plan = run(repos_refs(&t))?;

        let Some(table) = squashed(&plan) else {
            panic!("expected a squashed table, got\n{plan}");
        };
        assert!(matches!(plan, Node::Table(_)));
        assert_eq!(
            table.chain(),
            &Chain::extend(Step::RepoRefs, Chain::all(TableKind::Repositories, None), None)
        );
        Ok(())
    }

    #[test]
    fn squash_nested_joins_with_filters_and_projection() -> Result<()> {
        let t = Tables::new();
        let plan = Node::project(
            Node::inner_join(
                Node::filter(
                    repos_refs(&t),
                    Expr::equals(col("refs", "ref_name", 2), Expr::lit("HEAD")),
                ),
                t.scan(TableKind::Commits),
                Expr::equals(col("refs", "commit_hash", 3), col("commits", "commit_hash", 5)),
            ),
            vec![col("commits", "commit_message", 12), col("refs", "ref_name", 2)],
        );
        let plan = run(plan)?;

        let Node::Project(Project { input, exprs }) = &plan else {
            panic!("expected a projection, got\n{plan}");
        };
        // Columns are in join order: repositories, refs, commits
        assert_eq!(exprs, &vec![col("commits", "commit_message", 12), col("refs", "ref_name", 2)]);
        let Some(table) = squashed(input) else {
            panic!("expected a squashed table, got\n{plan}");
        };
        assert!(matches!(**input, Node::Table(_)));
        assert_eq!(
            table.tables(),
            &[TableKind::Repositories, TableKind::References, TableKind::Commits]
        );
        assert_eq!(
            table.chain(),
            &Chain::extend(
                Step::RefHeadCommits,
                Chain::extend(
                    Step::RepoRefs,
                    Chain::all(TableKind::Repositories, None),
                    Some(Expr::equals(col("refs", "ref_name", 2), Expr::lit("HEAD")))
                ),
                None
            )
        );
        Ok(())
    }

    #[test]
    fn unrelated_condition_is_not_squashed() -> Result<()> {
        let t = Tables::new();
        let plan = Node::inner_join(
            t.scan(TableKind::Repositories),
            t.scan(TableKind::References),
            Expr::equals(col("repositories", "repository_id", 0), col("refs", "ref_name", 2)),
        );
        assert_eq!(run(plan.clone())?, plan);
        Ok(())
    }

    #[test]
    fn unsquashable_leaves() -> Result<()> {
        let t = Tables::new();
        let on = Expr::equals(col("repositories", "repository_id", 0), col("refs", "repository_id", 1));

        let limited = Node::inner_join(
            t.scan(TableKind::Repositories),
            Node::limit(t.scan(TableKind::References), 10),
            on.clone(),
        );
        assert_eq!(run(limited.clone())?, limited);

        let left = Node::left_join(t.scan(TableKind::Repositories), t.scan(TableKind::References), on.clone());
        assert_eq!(run(left.clone())?, left);

        let renamed = Node::inner_join(
            t.scan(TableKind::Repositories),
            Node::alias(t.scan(TableKind::References), "r"),
            Expr::equals(col("repositories", "repository_id", 0), col("r", "repository_id", 1)),
        );
        assert_eq!(run(renamed.clone())?, renamed);

        // Remotes cannot be followed by commits
        let remotes = Node::inner_join(
            repos_refs(&t),
            Node::inner_join(
                t.scan(TableKind::Remotes),
                t.scan(TableKind::Commits),
                Expr::equals(col("remotes", "repository_id", 0), col("commits", "repository_id", 6)),
            ),
            Expr::equals(col("refs", "commit_hash", 3), col("commits", "commit_hash", 11)),
        );
        let squashed_lhs = run(remotes)?;
        let Node::InnerJoin(join) = &squashed_lhs else {
            panic!("expected a join, got\n{squashed_lhs}");
        };
        assert!(squashed(&join.lhs).is_some());
        assert!(matches!(*join.rhs, Node::InnerJoin(_)));
        Ok(())
    }

    #[test]
    fn rejected_joins_are_not_merged_into_parents() -> Result<()> {
        let t = Tables::new();
        let unrelated = Node::inner_join(
            t.scan(TableKind::Repositories),
            t.scan(TableKind::References),
            Expr::equals(col("repositories", "repository_id", 0), col("refs", "ref_name", 2)),
        );
        let plan = Node::inner_join(
            Node::filter(unrelated, Expr::equals(col("refs", "ref_name", 2), Expr::lit("HEAD"))),
            t.scan(TableKind::Commits),
            Expr::equals(col("refs", "commit_hash", 3), col("commits", "commit_hash", 5)),
        );
        assert_eq!(run(plan.clone())?, plan);
        Ok(())
    }

    #[test]
    fn squashing_is_idempotent() -> Result<()> {
        let t = Tables::new();
        let plan = Node::limit(repos_refs(&t), 5);
        let once = run(plan)?;
        assert_eq!(run(once.clone())?, once);
        Ok(())
    }

    #[test]
    fn unresolved_plans_are_skipped() -> Result<()> {
        let t = Tables::new();
        let plan = Node::inner_join(
            repos_refs(&t),
            Node::Unresolved("commits".into()),
            Expr::lit(true),
        );
        assert_eq!(run(plan.clone())?, plan);
        Ok(())
    }
}
