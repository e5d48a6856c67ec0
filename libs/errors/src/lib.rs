//! Unified error handling for the acquisition gateway
//!
//! Service crates keep their own domain error types and convert into
//! [`GatewayError`] at the process boundary. [`GatewayErrorTrait`] gives every
//! error a common code/category surface for logs.

use thiserror::Error;

// ============================================================================
// GatewayError - process-level error type
// ============================================================================

/// Main error type returned by gateway binaries
#[derive(Debug, Error)]
pub enum GatewayError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // ======================================
    // Protocol & Communication Errors
    // ======================================
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    // ======================================
    // Runtime Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using GatewayError
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayErrorTrait for GatewayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Io(_) => "IO_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Communication(_) => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Io(_) | Self::StartupFailed(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

// ============================================================================
// Gateway error trait - shared surface for service error types
// ============================================================================

/// Error category, used for classification in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    NotFound,
    Protocol,
    Connection,
    Timeout,
    Internal,
}

/// Common interface implemented by every service error type
pub trait GatewayErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Stable error code for logs
    fn error_code(&self) -> &'static str;

    /// Error category
    fn category(&self) -> ErrorCategory;
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            GatewayError::StartupFailed("no devices".into()).error_code(),
            "STARTUP_FAILED"
        );
        assert_eq!(
            GatewayError::Configuration("x".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            GatewayError::Communication("reset".into()).category(),
            ErrorCategory::Connection
        );
    }

    #[test]
    fn test_io_conversion() {
        let err: GatewayError = std::io::Error::other("disk full").into();
        assert_eq!(err.error_code(), "IO_ERROR");
        assert!(err.to_string().contains("disk full"));
    }
}
