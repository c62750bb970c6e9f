use thiserror::Error;

use crate::daemon::DetachState;
use nix::errno::Errno;

/// Main error type for the daemonizer
#[derive(Debug, Error)]
pub enum DaemonError {
    // Detach-related errors
    #[error("Failed to fork: {0}")]
    Fork(#[source] Errno),

    #[error("Daemon aborted while {state}: {source}")]
    Aborted {
        state: DetachState,
        #[source]
        source: Errno,
    },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Launcher errors
    #[error("Failed to launch program: {0}")]
    LaunchError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a failure is handled once it occurs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Reported to the caller as a value
    Recoverable,
    /// Terminates the process it occurs in
    Fatal,
}

impl DaemonError {
    pub fn severity(&self) -> Severity {
        match self {
            DaemonError::Aborted { .. } => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Result type alias for daemonizer operations
pub type Result<T> = std::result::Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_failure_is_recoverable() {
        let err = DaemonError::Fork(Errno::EAGAIN);
        assert_eq!(err.severity(), Severity::Recoverable);
        assert!(err.to_string().starts_with("Failed to fork"));
    }

    #[test]
    fn test_aborted_is_fatal() {
        let err = DaemonError::Aborted {
            state: DetachState::SessionDetaching,
            source: Errno::EPERM,
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("starting a new session"));
    }

    #[test]
    fn test_config_errors_are_recoverable() {
        let err = DaemonError::MissingConfigField("program".to_string());
        assert!(!err.is_fatal());
    }
}
