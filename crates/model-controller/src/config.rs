//! Controller configuration
//!
//! ```yaml
//! blocking_timeout_secs: 300
//! reload_supported: true
//! log_level: info
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding `blocking_timeout_secs`
pub const BLOCKING_TIMEOUT_ENV: &str = "MGMT_BLOCKING_TIMEOUT";

const DEFAULT_BLOCKING_TIMEOUT_SECS: u64 = 300;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Controller settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Default bound, in seconds, on lock and stability waits
    pub blocking_timeout_secs: u64,
    /// Whether the process can reload; if not, reload requests become
    /// restart requests
    pub reload_supported: bool,
    /// Filter used by [`crate::logging::init_logging`] when `RUST_LOG` is unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            blocking_timeout_secs: DEFAULT_BLOCKING_TIMEOUT_SECS,
            reload_supported: true,
            log_level: None,
        }
    }
}

impl ControllerConfig {
    /// Parse YAML configuration from a string
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup(BLOCKING_TIMEOUT_ENV) {
            self.blocking_timeout_secs = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "{} must be a number of seconds, got '{}'",
                    BLOCKING_TIMEOUT_ENV, raw
                ))
            })?;
            self.validate()?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.blocking_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "blocking_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Default blocking timeout
    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_secs(self.blocking_timeout_secs)
    }
}
