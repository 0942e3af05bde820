use std::fmt;

use itertools::Itertools;

use crate::{Join, Node, Project};

/// A formatted line of output
enum Line {
    Node { text: String, ident: usize },
    Detail { text: String, ident: usize },
}

/// An indented, `EXPLAIN`-like rendering of a plan:
///
/// ```text
/// Project: refs.ref_name
///   -> Inner Join: repositories.repository_id = refs.repository_id
///       -> Table: repositories
///       -> Table: refs
/// ```
pub struct Explain {
    lines: Vec<Line>,
}

impl Explain {
    pub fn new(plan: &Node) -> Self {
        let mut explain = Self { lines: vec![] };
        explain.eval_plan(plan, 0);
        explain
    }

    fn add(&mut self, text: String, ident: usize) {
        self.lines.push(Line::Node { text, ident });
    }

    fn eval_plan(&mut self, plan: &Node, ident: usize) {
        match plan {
            Node::Unresolved(name) => self.add(format!("Unresolved: {name}"), ident),
            Node::Table(table) => {
                // Tables may print more than one line, e.g. to show their pushed down filters
                let text = table.0.to_string();
                let mut lines = text.lines();
                let head = lines.next().unwrap_or_default();
                self.add(format!("Table: {head}"), ident);
                for line in lines {
                    self.lines.push(Line::Detail {
                        text: line.to_owned(),
                        ident: ident + 2,
                    });
                }
            }
            Node::InnerJoin(Join { lhs, rhs, on }) => {
                self.add(format!("Inner Join: {on}"), ident);
                self.eval_plan(lhs, ident + 4);
                self.eval_plan(rhs, ident + 4);
            }
            Node::LeftJoin(Join { lhs, rhs, on }) => {
                self.add(format!("Left Join: {on}"), ident);
                self.eval_plan(lhs, ident + 4);
                self.eval_plan(rhs, ident + 4);
            }
            Node::CrossJoin(lhs, rhs) => {
                self.add("Cross Join".to_owned(), ident);
                self.eval_plan(lhs, ident + 4);
                self.eval_plan(rhs, ident + 4);
            }
            Node::Filter(input, expr) => {
                self.add(format!("Filter: {expr}"), ident);
                self.eval_plan(input, ident + 4);
            }
            Node::Project(Project { input, exprs }) => {
                self.add(format!("Project: {}", exprs.iter().join(", ")), ident);
                self.eval_plan(input, ident + 4);
            }
            Node::ParallelProject(Project { input, exprs }, n) => {
                self.add(
                    format!("Parallel Project: {} (parallelism={n})", exprs.iter().join(", ")),
                    ident,
                );
                self.eval_plan(input, ident + 4);
            }
            Node::TableAlias(input, name) => {
                self.add(format!("Alias: {name}"), ident);
                self.eval_plan(input, ident + 4);
            }
            Node::Limit(input, n) => {
                self.add(format!("Limit: {n}"), ident);
                self.eval_plan(input, ident + 4);
            }
            Node::Exchange(input, n) => {
                self.add(format!("Exchange: parallelism={n}"), ident);
                self.lines.push(Line::Detail {
                    text: "partitions are executed serially".to_owned(),
                    ident: ident + 2,
                });
                self.eval_plan(input, ident + 4);
            }
        }
    }
}

impl fmt::Display for Explain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match line {
                Line::Node { text, ident } => {
                    let arrow = if *ident > 0 { "-> " } else { "" };
                    let ident = ident.saturating_sub(2);
                    write!(f, "{:ident$}{arrow}{text}", "")?;
                }
                Line::Detail { text, ident } => {
                    write!(f, "{:ident$}{text}", "")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gitql_expr::{Column, Expr, Type};
    use pretty_assertions::assert_eq;

    use crate::{mem::MemTable, Node};

    fn table(name: &str, col: &str) -> Node {
        let schema = vec![Column::new(name, col, Type::Text)].into();
        Node::table(Arc::new(MemTable::new(name, schema, vec![])))
    }

    #[test]
    fn explain_join() {
        let plan = Node::project(
            Node::inner_join(
                table("repositories", "repository_id"),
                table("refs", "repository_id"),
                Expr::equals(
                    Expr::field("repositories", "repository_id", 0, Type::Text),
                    Expr::field("refs", "repository_id", 1, Type::Text),
                ),
            ),
            vec![Expr::field("refs", "repository_id", 1, Type::Text)],
        );

        assert_eq!(
            plan.to_string(),
            "\
Project: refs.repository_id
  -> Inner Join: repositories.repository_id = refs.repository_id
      -> Table: repositories
      -> Table: refs"
        );
    }
}
