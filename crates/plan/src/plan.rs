use std::{fmt, sync::Arc};

use anyhow::Result;
use gitql_expr::{Column, Expr, Schema};

use crate::{printer::Explain, Table};

/// A table bound to its implementation
#[derive(Clone)]
pub struct ResolvedTable(pub Arc<dyn Table>);

impl ResolvedTable {
    pub fn table(&self) -> &dyn Table {
        self.0.as_ref()
    }

    /// Downcast to a concrete table type
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for ResolvedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResolvedTable").field(&self.0.name()).finish()
    }
}

/// Tables are equal if they print the same and produce the same schema
impl PartialEq for ResolvedTable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.name() == other.0.name()
                && self.0.schema() == other.0.schema()
                && self.0.to_string() == other.0.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub lhs: Box<Node>,
    pub rhs: Box<Node>,
    pub on: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub input: Box<Node>,
    pub exprs: Vec<Expr>,
}

/// A query plan.
///
/// Plans are rewritten by the [crate::Analyzer] by consuming a tree and producing a new one.
/// For example, squashing the join below
///
/// ```text
///     x
///    / \
///   x   commits
///  / \
/// repositories refs
/// ```
///
/// replaces the whole join tree with a single table node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A table that has not been bound to its implementation
    Unresolved(Box<str>),
    Table(ResolvedTable),
    InnerJoin(Join),
    LeftJoin(Join),
    CrossJoin(Box<Node>, Box<Node>),
    Filter(Box<Node>, Expr),
    Project(Project),
    /// A projection evaluated by a fixed number of workers
    ParallelProject(Project, usize),
    /// Renames the source table of every column of its input
    TableAlias(Box<Node>, Box<str>),
    Limit(Box<Node>, u64),
    /// Executes its input in partitions with the given parallelism
    Exchange(Box<Node>, usize),
}

impl Node {
    pub fn table(table: Arc<dyn Table>) -> Self {
        Self::Table(ResolvedTable(table))
    }

    pub fn inner_join(lhs: Self, rhs: Self, on: Expr) -> Self {
        Self::InnerJoin(Join {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            on,
        })
    }

    pub fn left_join(lhs: Self, rhs: Self, on: Expr) -> Self {
        Self::LeftJoin(Join {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            on,
        })
    }

    pub fn cross_join(lhs: Self, rhs: Self) -> Self {
        Self::CrossJoin(Box::new(lhs), Box::new(rhs))
    }

    pub fn filter(input: Self, expr: Expr) -> Self {
        Self::Filter(Box::new(input), expr)
    }

    pub fn project(input: Self, exprs: Vec<Expr>) -> Self {
        Self::Project(Project {
            input: Box::new(input),
            exprs,
        })
    }

    pub fn alias(input: Self, name: &str) -> Self {
        Self::TableAlias(Box::new(input), name.into())
    }

    pub fn limit(input: Self, n: u64) -> Self {
        Self::Limit(Box::new(input), n)
    }

    pub fn exchange(input: Self, parallelism: usize) -> Self {
        Self::Exchange(Box::new(input), parallelism)
    }

    /// The direct inputs of this node
    pub fn children(&self) -> Vec<&Self> {
        match self {
            Self::Unresolved(_) | Self::Table(_) => vec![],
            Self::InnerJoin(Join { lhs, rhs, .. }) | Self::LeftJoin(Join { lhs, rhs, .. }) | Self::CrossJoin(lhs, rhs) => {
                vec![&**lhs, &**rhs]
            }
            Self::Filter(input, _)
            | Self::Project(Project { input, .. })
            | Self::ParallelProject(Project { input, .. }, _)
            | Self::TableAlias(input, _)
            | Self::Limit(input, _)
            | Self::Exchange(input, _) => vec![&**input],
        }
    }

    /// Replace every direct input of this node with `f(input)`
    pub fn try_map_children(self, f: &mut impl FnMut(Self) -> Result<Self>) -> Result<Self> {
        let mut map = |input: Box<Self>| f(*input).map(Box::new);
        Ok(match self {
            leaf @ (Self::Unresolved(_) | Self::Table(_)) => leaf,
            Self::InnerJoin(Join { lhs, rhs, on }) => Self::InnerJoin(Join {
                lhs: map(lhs)?,
                rhs: map(rhs)?,
                on,
            }),
            Self::LeftJoin(Join { lhs, rhs, on }) => Self::LeftJoin(Join {
                lhs: map(lhs)?,
                rhs: map(rhs)?,
                on,
            }),
            Self::CrossJoin(lhs, rhs) => Self::CrossJoin(map(lhs)?, map(rhs)?),
            Self::Filter(input, expr) => Self::Filter(map(input)?, expr),
            Self::Project(Project { input, exprs }) => Self::Project(Project {
                input: map(input)?,
                exprs,
            }),
            Self::ParallelProject(Project { input, exprs }, n) => Self::ParallelProject(
                Project {
                    input: map(input)?,
                    exprs,
                },
                n,
            ),
            Self::TableAlias(input, name) => Self::TableAlias(map(input)?, name),
            Self::Limit(input, n) => Self::Limit(map(input)?, n),
            Self::Exchange(input, n) => Self::Exchange(map(input)?, n),
        })
    }

    /// Rewrite the plan bottom-up,
    /// applying `f` to the inputs of a node before the node itself.
    pub fn transform_up(self, f: &mut impl FnMut(Self) -> Result<Self>) -> Result<Self> {
        let node = self.try_map_children(&mut |child| child.transform_up(f))?;
        f(node)
    }

    /// Walks the plan tree and calls `f` on every node, parents first
    pub fn visit(&self, f: &mut impl FnMut(&Self)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Is there any subplan where `f` returns true?
    pub fn any(&self, f: &impl Fn(&Self) -> bool) -> bool {
        f(self) || self.children().into_iter().any(|child| child.any(f))
    }

    /// Have all the tables in this plan been bound?
    pub fn resolved(&self) -> bool {
        !self.any(&|node| matches!(node, Self::Unresolved(_)))
    }

    /// The columns produced by this node
    pub fn schema(&self) -> Schema {
        match self {
            Self::Unresolved(_) => Schema::default(),
            Self::Table(table) => table.0.schema().clone(),
            Self::InnerJoin(Join { lhs, rhs, .. }) | Self::CrossJoin(lhs, rhs) => lhs.schema().concat(&rhs.schema()),
            Self::LeftJoin(Join { lhs, rhs, .. }) => {
                let rhs = rhs.schema().into_columns().into_iter().map(Column::nullable).collect();
                lhs.schema().concat(&rhs)
            }
            Self::Filter(input, _) | Self::Limit(input, _) | Self::Exchange(input, _) => input.schema(),
            Self::Project(Project { exprs, .. }) | Self::ParallelProject(Project { exprs, .. }, _) => {
                exprs.iter().map(Expr::to_column).collect()
            }
            Self::TableAlias(input, name) => input.schema().with_source(name),
        }
    }

    /// A printable, indented representation of the plan
    pub fn explain(&self) -> Explain {
        Explain::new(self)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.explain().fmt(f)
    }
}
