//! Analyzer rules for queries over Git repositories.
//!
//! [squash::squash_joins] replaces inner joins of Git tables by a single
//! [squashed::SquashedTable], which walks the repository object graph
//! with one iterator chain instead of joining full table scans.
//!
//! [parallelize::parallelize_uast_projections] evaluates projections that parse
//! source code with a pool of workers.

pub mod builder;
pub mod chain;
pub mod errors;
pub mod filters;
pub mod parallelize;
pub mod redundancy;
pub mod squash;
pub mod squashed;
pub mod tables;

#[cfg(any(test, feature = "test"))]
pub mod mem;

pub use builder::build_squashed_table;
pub use chain::{Chain, ChainIter, ChainSource, Step};
pub use errors::SquashError;
pub use parallelize::parallelize_uast_projections;
pub use squash::squash_joins;
pub use squashed::SquashedTable;
pub use tables::{GitTable, TableKind};

use gitql_plan::{errors::PlanError, Analyzer};

pub const SQUASH_JOINS: &str = "squash_joins";
pub const PARALLELIZE_UAST_PROJECTIONS: &str = "parallelize_uast_projections";

/// Append the rules of this crate to `analyzer`.
///
/// Joins are squashed first,
/// so that the projections above them see their final inputs.
pub fn register(analyzer: &mut Analyzer) -> Result<(), PlanError> {
    analyzer.add_rule(SQUASH_JOINS, squash_joins)?;
    analyzer.add_rule(PARALLELIZE_UAST_PROJECTIONS, parallelize_uast_projections)
}
