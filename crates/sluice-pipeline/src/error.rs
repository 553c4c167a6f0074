use sluice_operators::OpError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Operator(#[from] OpError),

    #[error("invalid pipeline: {0}")]
    Invalid(String),
}
