use anyhow::{bail, Result};
use gitql_plan::{Context, Join, Node, Project, RowIter};
use itertools::Itertools;
use log::trace;

use iter::{Filter, Iter, JoinKind, LimitIter, NestedLoopJoin, ProjectIter, SpanIter};
use parallel::ParallelIter;

pub mod iter;
pub mod parallel;

pub use parallel::Cancelled;

/// Build an executor for `plan`
pub fn build(ctx: &Context, plan: &Node) -> Result<Box<dyn RowIter>> {
    Ok(Box::new(build_iter(ctx, plan)?))
}

fn build_iter(ctx: &Context, plan: &Node) -> Result<Iter> {
    Ok(match plan {
        Node::Unresolved(name) => bail!("table `{name}` has not been resolved"),
        Node::Table(table) => Iter::Scan(table.0.row_iter(ctx)?),
        Node::InnerJoin(Join { lhs, rhs, on }) => Iter::Join(NestedLoopJoin::new(
            build_iter(ctx, lhs)?,
            build_iter(ctx, rhs)?,
            Some(on.clone()),
            JoinKind::Inner,
            0,
        )),
        Node::LeftJoin(Join { lhs, rhs, on }) => Iter::Join(NestedLoopJoin::new(
            build_iter(ctx, lhs)?,
            build_iter(ctx, rhs)?,
            Some(on.clone()),
            JoinKind::Left,
            rhs.schema().len(),
        )),
        Node::CrossJoin(lhs, rhs) => Iter::Join(NestedLoopJoin::new(
            build_iter(ctx, lhs)?,
            build_iter(ctx, rhs)?,
            None,
            JoinKind::Cross,
            0,
        )),
        Node::Filter(input, expr) => Iter::Filter(Filter {
            input: Box::new(build_iter(ctx, input)?),
            expr: expr.clone(),
        }),
        Node::Project(Project { input, exprs }) => Iter::Project(ProjectIter {
            input: Box::new(build_iter(ctx, input)?),
            exprs: exprs.clone(),
        }),
        Node::ParallelProject(Project { input, exprs }, parallelism) => {
            let span = tracing::debug_span!(
                parent: ctx.span(),
                "plan.Project",
                projections = %exprs.iter().join(", "),
                parallelism = *parallelism
            );
            let ctx = ctx.with_span(span.clone());
            let input = build(&ctx, input)?;
            let iter = ParallelIter::new(&ctx, exprs.clone(), input, *parallelism);
            Iter::Span(SpanIter::new(span, Box::new(Iter::Parallel(iter))))
        }
        // Aliases only rename the source of a column
        Node::TableAlias(input, _) => build_iter(ctx, input)?,
        Node::Limit(input, n) => Iter::Limit(LimitIter {
            input: Box::new(build_iter(ctx, input)?),
            remaining: *n,
        }),
        Node::Exchange(input, parallelism) => {
            trace!("executing exchange with parallelism {parallelism} serially");
            build_iter(ctx, input)?
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use gitql_expr::{Column, Expr, Row, Type, Value};
    use gitql_plan::{iter::collect_rows, mem::MemTable, Context, Node};
    use pretty_assertions::assert_eq;

    use super::build;

    fn table(name: &str, rows: &[(&str, &str)]) -> Node {
        let schema = vec![Column::new(name, "k", Type::Text), Column::new(name, "v", Type::Text)].into();
        let rows = rows
            .iter()
            .map(|(k, v)| vec![Value::from(*k), Value::from(*v)])
            .collect();
        Node::table(Arc::new(MemTable::new(name, schema, rows)))
    }

    fn run(plan: &Node) -> Result<Vec<Row>> {
        collect_rows(&mut build(&Context::new(), plan)?)
    }

    fn row(values: &[&str]) -> Row {
        values.iter().map(|v| Value::from(*v)).collect()
    }

    #[test]
    fn inner_and_left_join() -> Result<()> {
        let a = table("a", &[("1", "x"), ("2", "y")]);
        let b = table("b", &[("1", "z"), ("1", "w")]);
        let on = Expr::equals(
            Expr::field("a", "k", 0, Type::Text),
            Expr::field("b", "k", 2, Type::Text),
        );

        assert_eq!(
            run(&Node::inner_join(a.clone(), b.clone(), on.clone()))?,
            vec![row(&["1", "x", "1", "z"]), row(&["1", "x", "1", "w"])]
        );

        let mut unmatched = row(&["2", "y"]);
        unmatched.extend([Value::Null, Value::Null]);
        assert_eq!(
            run(&Node::left_join(a, b, on))?,
            vec![row(&["1", "x", "1", "z"]), row(&["1", "x", "1", "w"]), unmatched]
        );
        Ok(())
    }

    #[test]
    fn filter_project_limit() -> Result<()> {
        let a = table("a", &[("1", "x"), ("2", "y"), ("3", "y")]);
        let plan = Node::limit(
            Node::project(
                Node::filter(a, Expr::equals(Expr::field("a", "v", 1, Type::Text), Expr::lit("y"))),
                vec![Expr::field("a", "k", 0, Type::Text)],
            ),
            1,
        );
        assert_eq!(run(&plan)?, vec![row(&["2"])]);
        Ok(())
    }

    #[test]
    fn parallel_project_node() -> Result<()> {
        let a = table("a", &[("1", "x"), ("2", "y"), ("3", "z")]);
        let plan = Node::ParallelProject(
            gitql_plan::Project {
                input: Box::new(Node::exchange(a, 2)),
                exprs: vec![Expr::field("a", "v", 1, Type::Text)],
            },
            3,
        );
        let mut rows = run(&plan)?;
        rows.sort();
        assert_eq!(rows, vec![row(&["x"]), row(&["y"]), row(&["z"])]);
        Ok(())
    }
}
