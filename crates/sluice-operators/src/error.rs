use sluice_core::kind::BatchKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpError {
    #[error("{}", kind_mismatch_message(.operator, *.input))]
    KindMismatch { operator: String, input: BatchKind },

    #[error("type clash: {0}")]
    TypeClash(String),

    #[error("invalid configuration for '{operator}': {message}")]
    Config { operator: String, message: String },

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("operator '{0}' cannot be serialized")]
    NotSerializable(String),

    #[error("execution error in '{operator}': {message}")]
    Exec { operator: String, message: String },

    #[error(transparent)]
    Core(#[from] sluice_core::error::Error),
}

impl OpError {
    pub fn kind_mismatch(operator: impl Into<String>, input: BatchKind) -> Self {
        OpError::KindMismatch {
            operator: operator.into(),
            input,
        }
    }

    pub fn config(operator: impl Into<String>, message: impl ToString) -> Self {
        OpError::Config {
            operator: operator.into(),
            message: message.to_string(),
        }
    }

    pub fn exec(operator: impl Into<String>, message: impl ToString) -> Self {
        OpError::Exec {
            operator: operator.into(),
            message: message.to_string(),
        }
    }

    pub fn is_kind_mismatch(&self) -> bool {
        matches!(self, OpError::KindMismatch { .. })
    }
}

fn kind_mismatch_message(operator: &str, input: BatchKind) -> String {
    match input {
        BatchKind::Void => format!("'{operator}' cannot be used as a source"),
        other => format!("'{operator}' does not accept {other} as input"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_messages() {
        assert_eq!(
            OpError::kind_mismatch("where", BatchKind::Void).to_string(),
            "'where' cannot be used as a source"
        );
        assert_eq!(
            OpError::kind_mismatch("read_json", BatchKind::Events).to_string(),
            "'read_json' does not accept events as input"
        );
    }
}
