//! Error types for the management model

use crate::address::PathAddress;
use thiserror::Error;

/// Management model error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// No resource is registered at the address
    #[error("Resource not found: {0}")]
    ResourceNotFound(PathAddress),

    /// A resource already exists at the address
    #[error("Duplicate resource: {0}")]
    DuplicateResource(PathAddress),

    /// Address could not be parsed or is not usable here
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Two consecutive elements share a key and neither is a wildcard
    #[error("Duplicate consecutive path element of type '{0}'")]
    DuplicateElement(String),

    /// A required operation parameter is absent
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    /// A parameter is present but has the wrong shape
    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// What was wrong with it
        reason: String,
    },

    /// The operation node itself is malformed
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl ModelError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ModelError>;
