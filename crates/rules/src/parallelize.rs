use anyhow::Result;
use gitql_expr::Expr;
use gitql_plan::{Analyzer, Context, Node};
use itertools::Itertools;
use log::debug;

/// Does evaluating any of `exprs` parse source code into a UAST?
fn parses_uast(exprs: &[Expr]) -> bool {
    exprs
        .iter()
        .any(|expr| expr.any(&|expr| matches!(expr, Expr::Call(call) if call.func.parses_uast())))
}

/// Evaluate projections that parse UASTs with a pool of workers.
///
/// Parsing dominates the cost of such a projection,
/// so its rows are projected concurrently, in no particular order.
/// Partitions of an exchange are already executed concurrently,
/// so projections below an exchange are left as they are.
pub fn parallelize_uast_projections(_: &Context, a: &Analyzer, plan: Node) -> Result<Node> {
    let parallelism = a.parallelism();
    plan.transform_up(&mut |node| {
        Ok(match node {
            Node::Project(project) if parallelism > 1 && parses_uast(&project.exprs) => {
                debug!("projecting {} with {parallelism} workers", project.exprs.iter().join(", "));
                Node::ParallelProject(project, parallelism)
            }
            Node::Exchange(input, n) => Node::Exchange(Box::new(serialize_projections(*input)?), n),
            node => node,
        })
    })
}

/// Turn every parallel projection of `plan` back into a plain projection
fn serialize_projections(plan: Node) -> Result<Node> {
    plan.transform_up(&mut |node| {
        Ok(match node {
            Node::ParallelProject(project, _) => Node::Project(project),
            node => node,
        })
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use gitql_expr::{errors::EvalError, Column, Expr, ScalarFunction, Type, Value};
    use gitql_plan::{mem::MemTable, Analyzer, AnalyzerConfig, Context, Node, Project};
    use pretty_assertions::assert_eq;

    use super::parallelize_uast_projections;

    /// Is there a parallel projection outside of an exchange?
    fn has_parallel_projection(plan: &Node) -> bool {
        match plan {
            Node::ParallelProject(..) => true,
            Node::Exchange(..) => false,
            plan => plan.children().into_iter().any(has_parallel_projection),
        }
    }

    /// Stands in for a function parsing a blob into a UAST
    struct Uast;

    impl ScalarFunction for Uast {
        fn name(&self) -> &str {
            "uast"
        }

        fn return_type(&self) -> Type {
            Type::Blob
        }

        fn eval(&self, args: &[Value]) -> Result<Value, EvalError> {
            Ok(args.first().cloned().unwrap_or(Value::Null))
        }

        fn parses_uast(&self) -> bool {
            true
        }
    }

    fn table() -> Node {
        let schema = vec![Column::new("blobs", "blob_content", Type::Blob)].into();
        Node::table(Arc::new(MemTable::new("blobs", schema, vec![])))
    }

    fn uast() -> Expr {
        Expr::call(Arc::new(Uast), vec![Expr::field("blobs", "blob_content", 0, Type::Blob)])
    }

    fn run(parallelism: usize, plan: Node) -> Result<Node> {
        let a = Analyzer::new(AnalyzerConfig::with_parallelism(parallelism));
        parallelize_uast_projections(&Context::new(), &a, plan)
    }

    fn project(input: Node, exprs: Vec<Expr>) -> Project {
        Project {
            input: Box::new(input),
            exprs,
        }
    }

    #[test]
    fn uast_projections_are_parallel() -> Result<()> {
        let plan = Node::project(table(), vec![uast().alias("u")]);
        assert_eq!(
            run(4, plan.clone())?,
            Node::ParallelProject(project(table(), vec![uast().alias("u")]), 4)
        );
        // Without workers to spare nothing changes
        assert_eq!(run(1, plan.clone())?, plan);

        let plain = Node::project(table(), vec![Expr::field("blobs", "blob_content", 0, Type::Blob)]);
        assert_eq!(run(4, plain.clone())?, plain);
        Ok(())
    }

    #[test]
    fn nested_calls() -> Result<()> {
        let nested = Expr::equals(uast(), Expr::lit(Value::Null));
        let plan = run(2, Node::project(table(), vec![nested]))?;
        assert!(matches!(plan, Node::ParallelProject(_, 2)));
        Ok(())
    }

    #[test]
    fn not_below_an_exchange() -> Result<()> {
        let plan = Node::exchange(Node::project(table(), vec![uast()]), 4);
        let rewritten = run(4, plan.clone())?;
        assert_eq!(rewritten, plan);
        assert!(!has_parallel_projection(&rewritten));

        // Parallel projections from an earlier pass are serialized too
        let earlier = Node::exchange(Node::ParallelProject(project(table(), vec![uast()]), 4), 4);
        assert_eq!(run(1, earlier)?, plan);
        Ok(())
    }

    #[test]
    fn above_an_exchange() -> Result<()> {
        let plan = Node::project(Node::exchange(table(), 4), vec![uast()]);
        let rewritten = run(4, plan)?;
        assert!(has_parallel_projection(&rewritten));
        Ok(())
    }
}
