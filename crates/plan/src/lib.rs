//! The plan tree the analyzer rewrites, and the contracts used to execute it.

pub mod analyzer;
pub mod config;
pub mod context;
pub mod errors;
pub mod iter;
pub mod mem;
pub mod plan;
pub mod printer;
pub mod table;

pub use analyzer::{Analyzer, Rule, RuleFn};
pub use config::AnalyzerConfig;
pub use context::Context;
pub use iter::RowIter;
pub use plan::{Join, Node, Project, ResolvedTable};
pub use table::Table;
