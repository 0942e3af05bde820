use std::{collections::BTreeSet, fmt, sync::Arc};

use itertools::Itertools;

use crate::{
    errors::{ColumnNotFound, EvalError},
    Column, Schema, Type, Value,
};

/// Binary comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Lte => "<=",
            Self::Gte => ">=",
        }
    }
}

/// Binary logic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogOp {
    And,
    Or,
}

/// A function callable from a scalar expression.
///
/// Implementations live outside of the engine,
/// e.g. the functions that call into the semantic parsing service.
pub trait ScalarFunction: Send + Sync {
    fn name(&self) -> &str;

    fn return_type(&self) -> Type;

    fn eval(&self, args: &[Value]) -> Result<Value, EvalError>;

    /// Does calling this function parse source code into a UAST?
    fn parses_uast(&self) -> bool {
        false
    }
}

/// A function call.
/// Two calls are equal if they name the same function with equal arguments.
#[derive(Clone)]
pub struct Call {
    pub func: Arc<dyn ScalarFunction>,
    pub args: Vec<Expr>,
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("func", &self.func.name())
            .field("args", &self.args)
            .finish()
    }
}

impl PartialEq for Call {
    fn eq(&self, other: &Self) -> bool {
        self.func.name() == other.func.name() && self.args == other.args
    }
}

impl Eq for Call {}

/// A typed and qualified column reference.
///
/// `index` is the position of `table.name` in the input row.
/// It is only meaningful relative to a particular [Schema],
/// see [Expr::reindex].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub table: Box<str>,
    pub name: Box<str>,
    pub index: usize,
    pub ty: Type,
    pub nullable: bool,
}

/// A typed scalar expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A column reference
    Field(FieldRef),
    /// A typed literal expression
    Literal(Value, Type),
    /// A binary comparison
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    /// A binary logic expression
    LogOp(LogOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// A named expression in a projection list
    Alias(Box<Expr>, Box<str>),
    Call(Call),
}

impl Expr {
    /// A reference to column `table.name` at position `index`
    pub fn field(table: &str, name: &str, index: usize, ty: Type) -> Self {
        Self::Field(FieldRef {
            table: table.into(),
            name: name.into(),
            index,
            ty,
            nullable: false,
        })
    }

    /// A reference to `col` at position `index`
    pub fn column(col: &Column, index: usize) -> Self {
        Self::Field(FieldRef {
            table: col.source.clone(),
            name: col.name.clone(),
            index,
            ty: col.ty.clone(),
            nullable: col.nullable,
        })
    }

    /// A literal value.
    /// An untyped `NULL` is given the boolean type.
    pub fn lit(value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = match &value {
            Value::Null | Value::Bool(_) => Type::Bool,
            Value::Int64(_) => Type::Int64,
            Value::Text(_) => Type::Text,
            Value::Blob(_) => Type::Blob,
            Value::Timestamp(_) => Type::Timestamp,
            Value::Array(_) => Type::Array(Box::new(Type::Text)),
        };
        Self::Literal(value, ty)
    }

    pub fn equals(lhs: Self, rhs: Self) -> Self {
        Self::BinOp(BinOp::Eq, Box::new(lhs), Box::new(rhs))
    }

    pub fn and(lhs: Self, rhs: Self) -> Self {
        Self::LogOp(LogOp::And, Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: Self, rhs: Self) -> Self {
        Self::LogOp(LogOp::Or, Box::new(lhs), Box::new(rhs))
    }

    pub fn call(func: Arc<dyn ScalarFunction>, args: Vec<Self>) -> Self {
        Self::Call(Call { func, args })
    }

    pub fn alias(self, name: &str) -> Self {
        Self::Alias(Box::new(self), name.into())
    }

    /// Walk the expression tree and call `f` on each node
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Self)) {
        f(self);
        match self {
            Self::BinOp(_, a, b) | Self::LogOp(_, a, b) => {
                a.visit(f);
                b.visit(f);
            }
            Self::Not(a) | Self::Alias(a, _) => a.visit(f),
            Self::Call(Call { args, .. }) => {
                for arg in args {
                    arg.visit(f);
                }
            }
            Self::Field(..) | Self::Literal(..) => {}
        }
    }

    /// Is there any subexpression where `f` returns true?
    /// Descent stops at the first match.
    pub fn any(&self, f: &impl Fn(&Self) -> bool) -> bool {
        f(self)
            || match self {
                Self::BinOp(_, a, b) | Self::LogOp(_, a, b) => a.any(f) || b.any(f),
                Self::Not(a) | Self::Alias(a, _) => a.any(f),
                Self::Call(Call { args, .. }) => args.iter().any(|arg| arg.any(f)),
                Self::Field(..) | Self::Literal(..) => false,
            }
    }

    /// Rewrite the expression bottom-up,
    /// applying `f` to the children of a node before the node itself.
    pub fn try_map<E>(self, f: &mut impl FnMut(Self) -> Result<Self, E>) -> Result<Self, E> {
        let expr = match self {
            Self::BinOp(op, a, b) => Self::BinOp(op, Box::new(a.try_map(f)?), Box::new(b.try_map(f)?)),
            Self::LogOp(op, a, b) => Self::LogOp(op, Box::new(a.try_map(f)?), Box::new(b.try_map(f)?)),
            Self::Not(a) => Self::Not(Box::new(a.try_map(f)?)),
            Self::Alias(a, name) => Self::Alias(Box::new(a.try_map(f)?), name),
            Self::Call(Call { func, args }) => Self::Call(Call {
                func,
                args: args.into_iter().map(|arg| arg.try_map(f)).collect::<Result<_, _>>()?,
            }),
            expr @ (Self::Field(..) | Self::Literal(..)) => expr,
        };
        f(expr)
    }

    /// The column references in this expression
    pub fn fields(&self) -> Vec<&FieldRef> {
        let mut fields = vec![];
        self.visit(&mut |expr| {
            if let Self::Field(field) = expr {
                fields.push(field);
            }
        });
        fields
    }

    /// The distinct tables referenced by this expression
    pub fn tables(&self) -> BTreeSet<&str> {
        self.fields().into_iter().map(|field| field.table.as_ref()).collect()
    }

    /// Does this expression reference only columns of `tables`?
    /// An expression without column references trivially does.
    pub fn refers_only_to(&self, tables: &[&str]) -> bool {
        self.fields()
            .iter()
            .all(|field| tables.contains(&field.table.as_ref()))
    }

    /// The type of this scalar expression
    pub fn ty(&self) -> Type {
        match self {
            Self::BinOp(..) | Self::LogOp(..) | Self::Not(..) => Type::Bool,
            Self::Field(FieldRef { ty, .. }) | Self::Literal(_, ty) => ty.clone(),
            Self::Alias(a, _) => a.ty(),
            Self::Call(Call { func, .. }) => func.return_type(),
        }
    }

    /// The column produced when this expression is projected
    pub fn to_column(&self) -> Column {
        match self {
            Self::Field(field) => Column {
                source: field.table.clone(),
                name: field.name.clone(),
                ty: field.ty.clone(),
                nullable: field.nullable,
            },
            Self::Alias(expr, name) => Column::new("", name, expr.ty()).nullable(),
            expr => Column::new("", &expr.to_string(), expr.ty()).nullable(),
        }
    }

    /// Point every column reference at the position of its `(table, name)` in `schema`
    pub fn reindex(self, schema: &Schema) -> Result<Self, ColumnNotFound> {
        self.try_map(&mut |expr| match expr {
            Self::Field(field) => match schema.position(&field.table, &field.name) {
                Some(index) => Ok(Self::Field(FieldRef { index, ..field })),
                None => Err(ColumnNotFound::new(&field.table, &field.name)),
            },
            expr => Ok(expr),
        })
    }

    /// Split a conjunction into its conjuncts, left to right
    pub fn split_conjunction(self) -> Vec<Self> {
        match self {
            Self::LogOp(LogOp::And, a, b) => {
                let mut exprs = a.split_conjunction();
                exprs.extend(b.split_conjunction());
                exprs
            }
            expr => vec![expr],
        }
    }

    /// AND a list of predicates together, left-deep.
    /// Returns [None] for an empty list.
    pub fn conjunction(exprs: impl IntoIterator<Item = Self>) -> Option<Self> {
        exprs.into_iter().reduce(Self::and)
    }

    /// Evaluate this expression over `row`
    pub fn eval(&self, row: &[Value]) -> Result<Value, EvalError> {
        match self {
            Self::Field(FieldRef { index, .. }) => row.get(*index).cloned().ok_or(EvalError::FieldOutOfRange {
                index: *index,
                len: row.len(),
            }),
            Self::Literal(value, _) => Ok(value.clone()),
            Self::BinOp(op, a, b) => {
                let (a, b) = (a.eval(row)?, b.eval(row)?);
                if a.is_null() || b.is_null() {
                    return Ok(Value::Null);
                }
                if !a.comparable(&b) {
                    return Err(EvalError::TypeMismatch {
                        op: op.symbol(),
                        lhs: a.to_string(),
                        rhs: b.to_string(),
                    });
                }
                Ok(Value::Bool(match op {
                    BinOp::Eq => a == b,
                    BinOp::Ne => a != b,
                    BinOp::Lt => a < b,
                    BinOp::Gt => a > b,
                    BinOp::Lte => a <= b,
                    BinOp::Gte => a >= b,
                }))
            }
            Self::LogOp(op, a, b) => {
                let short = matches!(op, LogOp::Or);
                let a = truth(a.eval(row)?)?;
                if a == Some(short) {
                    return Ok(Value::Bool(short));
                }
                let b = truth(b.eval(row)?)?;
                Ok(match (a, b) {
                    (_, Some(b)) if b == short => Value::Bool(short),
                    (Some(_), Some(b)) => Value::Bool(b),
                    _ => Value::Null,
                })
            }
            Self::Not(a) => Ok(truth(a.eval(row)?)?.map_or(Value::Null, |b| Value::Bool(!b))),
            Self::Alias(a, _) => a.eval(row),
            Self::Call(Call { func, args }) => {
                let args = args.iter().map(|arg| arg.eval(row)).collect::<Result<Vec<_>, _>>()?;
                func.eval(&args)
            }
        }
    }

    /// Evaluate this boolean expression over `row`.
    /// `NULL` does not satisfy a predicate.
    pub fn eval_bool(&self, row: &[Value]) -> Result<bool, EvalError> {
        Ok(truth(self.eval(row)?)?.unwrap_or(false))
    }
}

/// Three-valued logic: `NULL` is unknown
fn truth(value: Value) -> Result<Option<bool>, EvalError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b)),
        v => Err(EvalError::NotBool(v.to_string())),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(FieldRef { table, name, .. }) => write!(f, "{table}.{name}"),
            Self::Literal(value, _) => write!(f, "{value}"),
            Self::BinOp(op, a, b) => write!(f, "{a} {} {b}", op.symbol()),
            Self::LogOp(LogOp::And, a, b) => write!(f, "({a} AND {b})"),
            Self::LogOp(LogOp::Or, a, b) => write!(f, "({a} OR {b})"),
            Self::Not(a) => write!(f, "NOT({a})"),
            Self::Alias(a, name) => write!(f, "{a} as {name}"),
            Self::Call(Call { func, args }) => write!(f, "{}({})", func.name(), args.iter().join(", ")),
        }
    }
}
