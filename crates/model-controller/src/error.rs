//! Error types for the model controller

use management_model::{ModelError, PathAddress};
use serde_json::Value;
use service_container::ContainerError;
use thiserror::Error;

/// Result type alias for step handlers
pub type Result<T> = std::result::Result<T, OperationError>;

/// Failure of an operation step.
///
/// `Failed`, `Model` and `Service` are *handled* failures: the handler knew
/// what went wrong, and in the runtime stage the rollback-on-runtime-failure
/// header decides whether to roll back. Everything else is *unhandled* and
/// always rolls the operation back.
#[derive(Error, Debug)]
pub enum OperationError {
    /// Handled failure carrying its failure description
    #[error("{}", describe(.0))]
    Failed(Value),

    /// Model access failed
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Service container call failed
    #[error(transparent)]
    Service(#[from] ContainerError),

    /// An interruptible wait was cancelled
    #[error("Operation interrupted")]
    Interrupted,

    /// A bounded wait expired
    #[error("{0}")]
    Timeout(String),

    /// A context method was called in a stage that does not allow it
    #[error("{0}")]
    InvalidState(String),

    /// Anything else the handler did not anticipate
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl OperationError {
    /// Create a handled failure
    pub fn failed(description: impl Into<Value>) -> Self {
        Self::Failed(description.into())
    }

    /// Create an unhandled failure
    pub fn unexpected(message: impl std::fmt::Display) -> Self {
        Self::Unexpected(anyhow::anyhow!("{}", message))
    }

    /// Create an invalid stage error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Whether rollback of this failure may be suppressed by
    /// `rollback-on-runtime-failure=false`
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Model(_) | Self::Service(_))
    }

    /// Failure description placed in the step's response
    pub fn failure_description(&self) -> Value {
        match self {
            Self::Failed(value) => value.clone(),
            Self::Model(_) | Self::Service(_) | Self::Timeout(_) => Value::String(self.to_string()),
            Self::Interrupted | Self::InvalidState(_) | Self::Unexpected(_) => {
                Value::String(format!("Operation handler failed: {}", self))
            }
        }
    }
}

/// Errors building or booting a controller
#[derive(Error, Debug)]
pub enum ControllerError {
    /// An operation with this name is already registered at the address
    #[error("Operation '{name}' already registered at {address}")]
    DuplicateOperation {
        /// Operation name
        name: String,
        /// Registration address pattern
        address: PathAddress,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Boot operations failed
    #[error("Boot failed; failed operations: {}", .0.join(", "))]
    BootFailed(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handled_classification() {
        assert!(OperationError::failed("this handler is bad").is_handled());
        assert!(OperationError::from(ModelError::MissingParameter("x".into())).is_handled());
        assert!(!OperationError::unexpected("this handler is evil").is_handled());
        assert!(!OperationError::Interrupted.is_handled());
        assert!(!OperationError::Timeout("late".into()).is_handled());
    }

    #[test]
    fn test_failure_descriptions() {
        assert_eq!(
            OperationError::failed(json!({"reason": 1})).failure_description(),
            json!({"reason": 1})
        );
        assert_eq!(
            OperationError::unexpected("this handler is evil").failure_description(),
            json!("Operation handler failed: this handler is evil")
        );
        assert_eq!(
            OperationError::from(ModelError::MissingParameter("attr1".into()))
                .failure_description(),
            json!("Missing required parameter: attr1")
        );
    }
}
