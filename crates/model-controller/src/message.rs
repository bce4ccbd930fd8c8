//! Progress messages reported by handlers

use std::fmt;

/// Severity of a reported message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageSeverity {
    /// Informational
    Info,
    /// Something looks wrong but the operation continues
    Warn,
    /// Something failed
    Error,
}

impl fmt::Display for MessageSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageSeverity::Info => "INFO",
            MessageSeverity::Warn => "WARN",
            MessageSeverity::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Receives messages handlers report while an operation runs
pub trait OperationMessageHandler: Send + Sync {
    /// Handle one report
    fn handle_report(&self, severity: MessageSeverity, message: &str);
}

/// Forwards reports to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMessageHandler;

impl OperationMessageHandler for LoggingMessageHandler {
    fn handle_report(&self, severity: MessageSeverity, message: &str) {
        match severity {
            MessageSeverity::Info => tracing::info!("{}", message),
            MessageSeverity::Warn => tracing::warn!("{}", message),
            MessageSeverity::Error => tracing::error!("{}", message),
        }
    }
}
