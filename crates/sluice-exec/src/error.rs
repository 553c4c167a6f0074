use thiserror::Error;

use sluice_operators::OpError;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("pipeline is not closed (expected void -> void): {0}")]
    NotClosed(String),

    #[error(transparent)]
    Operator(#[from] OpError),

    #[error("invalid pipeline: {0}")]
    Pipeline(String),

    #[error("detached operator '{operator}': {message}")]
    Detached { operator: String, message: String },

    #[error("hashing error: {0}")]
    Hash(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
