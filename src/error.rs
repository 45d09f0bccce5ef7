//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a single, consistent way to report
//! the few things that can actually go wrong around the sample pipeline.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` while reading the TOML file or
//!   the environment overlay.
//! - **`Configuration`**: Semantic problems in a configuration that parsed fine
//!   (e.g. an analysis window wider than the buffer window). Caught by
//!   `Settings::validate`.
//! - **`Persistence`**: A durable append failed. The in-memory buffer and the
//!   live broadcast are unaffected; callers get this as a distinct signal.
//! - **`MalformedInput`**: An inbound reading could not be decoded. Raised by the
//!   ingest gateway before anything reaches the core.
//! - **`Server`**: The HTTP/WebSocket transport could not bind or serve.
//!
//! Insufficient data for an estimate is deliberately *not* an error; the estimator
//! simply skips that tick.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl From<csv::Error> for DaqError {
    fn from(value: csv::Error) -> Self {
        DaqError::Persistence(value.to_string())
    }
}

impl DaqError {
    /// Whether the failure only affected durability of a single record.
    ///
    /// The ingest path uses this to keep going after a failed append.
    pub fn is_persistence(&self) -> bool {
        matches!(self, DaqError::Persistence(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_errors_become_persistence_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: DaqError = csv::Error::from(io).into();
        assert!(err.is_persistence());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn shutdown_failure_keeps_inner_errors() {
        let err = DaqError::ShutdownFailed(vec![
            DaqError::Persistence("flush".into()),
            DaqError::Server("listener".into()),
        ]);
        match err {
            DaqError::ShutdownFailed(inner) => assert_eq!(inner.len(), 2),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn malformed_input_is_not_persistence() {
        assert!(!DaqError::MalformedInput("abc".into()).is_persistence());
    }
}
