use std::{num::NonZeroUsize, thread};

use serde::Deserialize;

use crate::errors::PlanError;

/// Settings that influence how the analyzer rewrites plans.
///
/// ```toml
/// parallelism = 8
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    /// The number of workers a parallel operator may use.
    /// Defaults to the available parallelism of the machine.
    pub parallelism: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            parallelism: thread::available_parallelism().map_or(1, NonZeroUsize::get),
        }
    }
}

impl AnalyzerConfig {
    pub fn with_parallelism(parallelism: usize) -> Self {
        Self { parallelism }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, PlanError> {
        let config: Self = toml::from_str(s)?;
        if config.parallelism == 0 {
            return Err(PlanError::ZeroParallelism);
        }
        Ok(config)
    }
}
