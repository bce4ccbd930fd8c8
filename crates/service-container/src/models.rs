//! Data models for the service container

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dotted service name, e.g. `jboss.web.connector`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(String);

impl ServiceName {
    /// Create a name from its dotted form
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Child name `self.part`
    pub fn append(&self, part: impl AsRef<str>) -> Self {
        Self(format!("{}.{}", self.0, part.as_ref()))
    }

    /// Whether `self` is `other` or one of its descendants
    pub fn is_under(&self, other: &ServiceName) -> bool {
        self.0 == other.0
            || (self.0.starts_with(&other.0) && self.0[other.0.len()..].starts_with('.'))
    }

    /// Dotted form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ServiceName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Lifecycle state of an installed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceState {
    /// Installed, not running (waiting for dependencies or stopped)
    Down,
    /// `start` is in progress
    Starting,
    /// Started successfully
    Up,
    /// `start` returned an error
    StartFailed,
    /// `stop` is in progress
    Stopping,
    /// Gone from the container
    Removed,
}

impl ServiceState {
    /// Whether the service is between two settled states
    pub fn is_transitional(self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Stopping)
    }
}

/// Desired lifecycle of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceMode {
    /// Start as soon as dependencies are up
    Active,
    /// Stop and remove
    Remove,
}

/// Point-in-time view of one installed service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceController {
    /// Service name
    pub name: ServiceName,

    /// Current state
    pub state: ServiceState,

    /// Desired mode
    pub mode: ServiceMode,

    /// Declared dependencies
    pub dependencies: Vec<ServiceName>,

    /// Start failure message, if the last start failed
    pub failure: Option<String>,

    /// Last state change
    pub last_state_change: DateTime<Utc>,
}

/// State change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    /// Service that changed
    pub name: ServiceName,
    /// State before the change
    pub old_state: ServiceState,
    /// State after the change
    pub new_state: ServiceState,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

/// Something that keeps a service from being up
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServiceProblem {
    /// The service's `start` failed
    StartFailed {
        /// Failed service
        service: ServiceName,
        /// Failure message
        reason: String,
    },
    /// A dependency is not installed
    MissingDependency {
        /// Waiting service
        service: ServiceName,
        /// Absent dependency
        dependency: ServiceName,
    },
    /// A dependency is installed but cannot come up
    UnavailableDependency {
        /// Waiting service
        service: ServiceName,
        /// Down or failed dependency
        dependency: ServiceName,
    },
}

impl ServiceProblem {
    /// Service the problem is about
    pub fn service(&self) -> &ServiceName {
        match self {
            ServiceProblem::StartFailed { service, .. }
            | ServiceProblem::MissingDependency { service, .. }
            | ServiceProblem::UnavailableDependency { service, .. } => service,
        }
    }
}
