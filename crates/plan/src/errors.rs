use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("rule `{0}` is already registered")]
    DuplicateRule(String),
    #[error("parallelism must be at least 1")]
    ZeroParallelism,
    #[error("invalid analyzer config: {0}")]
    Config(#[from] toml::de::Error),
}
