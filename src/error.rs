//! Error types for the adaptive-sgd library
//!
//! This module provides the main error and result types used throughout the library.
//! All errors use the `thiserror` crate for automatic trait implementations.

use crate::config::ConfigError;
use crate::io::DiagnosticsError;
use std::io::Error;
use thiserror::Error;

/// Main result type used throughout the adaptive-sgd library
pub type AsgdResult<T> = Result<T, AsgdError>;

/// Main error type for the adaptive-sgd library
#[derive(Debug, Clone, Error)]
pub enum AsgdError {
    /// Inconsistent or invalid configuration; registration cannot proceed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid input parameters (dimension mismatches, out-of-order calls)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Statistics that cannot produce gain settings (non-finite aggregate, non-positive trace)
    #[error("Degenerate statistics: {0}")]
    DegenerateStatistics(String),

    /// Too few valid samples to evaluate the cost function
    #[error("Insufficient samples: {0}")]
    InsufficientSamples(String),

    /// Non-finite values produced during optimization
    #[error("Numerical failure: {0}")]
    NumericalFailure(String),

    /// IO related errors (parameter files, diagnostic dumps)
    #[error("IO error: {0}")]
    Io(String),
}

impl AsgdError {
    /// Emit the error through `tracing` and hand it back, for use in `map_err` chains.
    #[must_use]
    pub fn log(self) -> Self {
        tracing::error!("{}", self);
        self
    }
}

// Conversions from standard library errors

impl From<Error> for AsgdError {
    fn from(err: Error) -> Self {
        AsgdError::Io(err.to_string())
    }
}

// Convert module-specific errors to AsgdError

impl From<ConfigError> for AsgdError {
    fn from(err: ConfigError) -> Self {
        AsgdError::Configuration(err.to_string())
    }
}

impl From<DiagnosticsError> for AsgdError {
    fn from(err: DiagnosticsError) -> Self {
        AsgdError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn test_asgd_error_display() {
        let error = AsgdError::DegenerateStatistics("TrC = 0".to_string());
        assert_eq!(error.to_string(), "Degenerate statistics: TrC = 0");
    }

    #[test]
    fn test_asgd_error_from_io() {
        let io_error = Error::new(ErrorKind::NotFound, "File not found");
        let asgd_error = AsgdError::from(io_error);

        match asgd_error {
            AsgdError::Io(msg) => assert!(msg.contains("File not found")),
            _ => panic!("Expected IO error"),
        }
    }

    #[test]
    fn test_asgd_error_from_config() {
        let config_error = ConfigError::ScalesLength {
            given: 3,
            parameters: 6,
        };
        let asgd_error = AsgdError::from(config_error);
        assert!(matches!(asgd_error, AsgdError::Configuration(_)));
        assert!(asgd_error.to_string().contains("Scales"));
    }

    #[test]
    fn test_log_returns_same_error() {
        let error = AsgdError::NumericalFailure("NaN gradient".to_string()).log();
        assert!(matches!(error, AsgdError::NumericalFailure(_)));
    }

    #[test]
    fn test_asgd_result_err() {
        let result: AsgdResult<i32> = Err(AsgdError::InsufficientSamples("0 samples".to_string()));
        assert!(result.is_err());
    }
}
