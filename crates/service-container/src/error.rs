//! Error types for the service container

use crate::models::{ServiceName, ServiceState};
use std::time::Duration;
use thiserror::Error;

/// Service container error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContainerError {
    /// A service with this name is already installed
    #[error("Service already installed: {0}")]
    DuplicateService(ServiceName),

    /// No service with this name is installed
    #[error("Service not found: {0}")]
    ServiceNotFound(ServiceName),

    /// Services were still starting or stopping when the wait expired
    #[error("Timed out after {0:?} awaiting service container stability")]
    StabilityTimeout(Duration),

    /// Invalid service state transition
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        /// Current state
        from: ServiceState,
        /// Attempted state
        to: ServiceState,
    },
}

/// Failure reported by [`Service::start`](crate::Service::start)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct StartError(pub String);

impl StartError {
    /// Create a start error
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<&str> for StartError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for StartError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ContainerError>;
