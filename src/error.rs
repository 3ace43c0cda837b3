//! Unified error type hierarchy for Device Stager
//!
//! Provides structured error handling with `ConfigError` for settings problems and
//! `StagingError` for everything that can end a run. Expected "not yet" conditions
//! (device not listed yet, marker file not there yet) are never errors; they are
//! plain `bool`/`Option` outcomes of the polling primitives.

use std::io;
use thiserror::Error;

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Coarse error categories shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Required external binary or setting missing; raised before any device interaction
    Environment,
    /// No device appeared within the discovery bound
    DiscoveryTimeout,
    /// The log marker never matched within the scan bound
    IdentityNotFound,
    /// HTTP call failed or returned an unusable body
    NetworkFailure,
    /// Anything else
    UnexpectedFault,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Environment => "environment",
            ErrorKind::DiscoveryTimeout => "discovery-timeout",
            ErrorKind::IdentityNotFound => "identity-not-found",
            ErrorKind::NetworkFailure => "network-failure",
            ErrorKind::UnexpectedFault => "unexpected-fault",
        }
    }
}

/// Every error that can abort a staging run.
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Environment check failed: {0}")]
    Environment(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No device detected within {waited_secs}s")]
    DiscoveryTimeout { waited_secs: u64 },

    #[error("Identity token not found in device log within {waited_secs}s")]
    IdentityNotFound { waited_secs: u64 },

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Tunnel failed to start: {0}")]
    TunnelFailed(String),

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("'{command}' did not finish within {waited_secs}s")]
    CommandTimeout { command: String, waited_secs: u64 },

    #[error("No device bound to the session")]
    NoDeviceBound,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unexpected fault: {0}")]
    Unexpected(String),
}

impl StagingError {
    /// Map onto the operator-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StagingError::Environment(_) | StagingError::Config(_) => ErrorKind::Environment,
            StagingError::DiscoveryTimeout { .. } => ErrorKind::DiscoveryTimeout,
            StagingError::IdentityNotFound { .. } => ErrorKind::IdentityNotFound,
            StagingError::Network(_) => ErrorKind::NetworkFailure,
            StagingError::TunnelFailed(_)
            | StagingError::Spawn { .. }
            | StagingError::CommandTimeout { .. }
            | StagingError::NoDeviceBound
            | StagingError::Io(_)
            | StagingError::Unexpected(_) => ErrorKind::UnexpectedFault,
        }
    }

    /// Get a user-facing error message suitable for the console
    pub fn user_message(&self) -> String {
        match self {
            StagingError::Environment(msg) => format!("Environment not ready: {}", msg),
            StagingError::Config(e) => format!("Settings are invalid: {}", e),
            StagingError::DiscoveryTimeout { waited_secs } => {
                format!("No device detected after {}s. Check the cable and trust prompt.", waited_secs)
            }
            StagingError::IdentityNotFound { waited_secs } => {
                format!("Identity token not found in device logs after {}s.", waited_secs)
            }
            StagingError::Network(msg) => format!("Remote service unreachable or unusable: {}", msg),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for StagingError {
    fn from(e: reqwest::Error) -> Self {
        StagingError::Network(e.to_string())
    }
}

/// Top-level result type for operations that may fail.
pub type Result<T, E = StagingError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::FileNotFound("/etc/settings.json".to_string());
        assert_eq!(err.to_string(), "Configuration file not found: /etc/settings.json");
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            StagingError::Environment("ios missing".into()).kind(),
            ErrorKind::Environment
        );
        assert_eq!(
            StagingError::Config(ConfigError::ValidationFailed("x".into())).kind(),
            ErrorKind::Environment
        );
        assert_eq!(
            StagingError::DiscoveryTimeout { waited_secs: 30 }.kind(),
            ErrorKind::DiscoveryTimeout
        );
        assert_eq!(
            StagingError::IdentityNotFound { waited_secs: 60 }.kind(),
            ErrorKind::IdentityNotFound
        );
        assert_eq!(StagingError::Network("503".into()).kind(), ErrorKind::NetworkFailure);
        assert_eq!(StagingError::NoDeviceBound.kind(), ErrorKind::UnexpectedFault);
        assert_eq!(
            StagingError::CommandTimeout { command: "ios reboot".into(), waited_secs: 120 }.kind(),
            ErrorKind::UnexpectedFault
        );
    }

    #[test]
    fn test_user_message_mentions_bound() {
        let err = StagingError::IdentityNotFound { waited_secs: 60 };
        assert!(err.user_message().contains("60s"));
    }

    #[test]
    fn test_io_error_converts() {
        let err: StagingError = io::Error::new(io::ErrorKind::Other, "disk").into();
        assert!(matches!(err, StagingError::Io(_)));
        assert_eq!(err.kind().as_str(), "unexpected-fault");
    }
}
