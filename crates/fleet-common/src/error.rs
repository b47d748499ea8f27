//! Error types and result handling for the fleet control plane

use thiserror::Error;

/// Result type alias for control-plane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for control-plane operations
///
/// Only `Config` aborts startup. Every other variant is caught at the task
/// boundary, converted to a bus event, and counted.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Sample source error: {0}")]
    Source(String),

    #[error("Source stalled: {0}")]
    SourceStall(String),

    #[error("Effector error: {0}")]
    Effector(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Broker(_) | Error::Effector(_) | Error::Timeout(_) | Error::Io(_)
        )
    }

    /// Whether the error is fatal at startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Get error category for bus events and counters
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Bus(_) => "bus",
            Error::Broker(_) => "broker",
            Error::Store(_) => "store",
            Error::Source(_) => "source",
            Error::SourceStall(_) => "source_stall",
            Error::Effector(_) => "effector",
            Error::Workflow(_) => "workflow",
            Error::Timeout(_) => "timeout",
            Error::Invariant(_) => "invariant",
            Error::NotFound(_) => "not_found",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Generic(_) => "generic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal_and_not_retryable() {
        let err = Error::Config("missing data_dir".to_string());
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn broker_errors_are_retryable() {
        let err = Error::Broker("connection refused".to_string());
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }
}
