use gitql_expr::errors::ColumnNotFound;
use thiserror::Error;

use crate::tables::TableKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SquashError {
    #[error("invalid iterator chain: cannot extend {} with {to}", .from.map_or("an empty chain", TableKind::name))]
    InvalidChain { from: Option<TableKind>, to: TableKind },
    #[error("cannot squash an empty list of tables")]
    NoTables,
    #[error(transparent)]
    ColumnNotFound(#[from] ColumnNotFound),
}
