//! Error handling for the acquisition service

use errors::{ErrorCategory, GatewayError, GatewayErrorTrait};
use serde::Serialize;
use thiserror::Error;

/// Acquisition service error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcqError {
    /// Configuration-related errors (load time)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Socket level failures
    #[error("IO error: {0}")]
    IoError(String),

    /// Protocol errors: exception responses, malformed frames
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Connection establishment and maintenance errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Operation timeout errors
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Raw bytes could not be turned into a typed value
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Typed value could not be turned into raw registers
    #[error("Encode error: {0}")]
    EncodeError(String),

    /// Tag lookup/definition errors
    #[error("Tag error: {0}")]
    TagError(String),

    /// Group lookup/definition errors
    #[error("Group error: {0}")]
    GroupError(String),

    /// Request packing errors
    #[error("Planner error: {0}")]
    PlannerError(String),

    /// Device task state errors (stopped, channel closed)
    #[error("State error: {0}")]
    StateError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the acquisition service
pub type Result<T> = std::result::Result<T, AcqError>;

impl AcqError {
    pub fn config(msg: impl Into<String>) -> Self {
        AcqError::ConfigError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        AcqError::IoError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        AcqError::ProtocolError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        AcqError::ConnectionError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        AcqError::TimeoutError(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        AcqError::DecodeError(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        AcqError::EncodeError(msg.into())
    }

    pub fn tag(msg: impl Into<String>) -> Self {
        AcqError::TagError(msg.into())
    }

    pub fn group(msg: impl Into<String>) -> Self {
        AcqError::GroupError(msg.into())
    }

    pub fn planner(msg: impl Into<String>) -> Self {
        AcqError::PlannerError(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        AcqError::StateError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AcqError::InternalError(msg.into())
    }

    pub fn not_connected() -> Self {
        AcqError::ConnectionError("Not connected".to_string())
    }

    pub fn tag_not_found(name: impl std::fmt::Display) -> Self {
        AcqError::TagError(format!("Tag not found: {}", name))
    }

    pub fn group_not_found(name: impl std::fmt::Display) -> Self {
        AcqError::GroupError(format!("Group not found: {}", name))
    }

    /// The session behind this error can no longer be used
    ///
    /// Protocol exceptions and decode failures leave the connection intact.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            AcqError::ConnectionError(_) | AcqError::IoError(_) | AcqError::TimeoutError(_)
        )
    }
}

impl From<std::io::Error> for AcqError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => AcqError::TimeoutError(err.to_string()),
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => AcqError::ConnectionError(err.to_string()),
            _ => AcqError::IoError(err.to_string()),
        }
    }
}

impl From<figment::Error> for AcqError {
    fn from(err: figment::Error) -> Self {
        AcqError::ConfigError(format!("Failed to parse config: {err}"))
    }
}

impl From<serde_yaml::Error> for AcqError {
    fn from(err: serde_yaml::Error) -> Self {
        AcqError::ConfigError(format!("YAML: {err}"))
    }
}

impl From<tokio::time::error::Elapsed> for AcqError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        AcqError::TimeoutError(err.to_string())
    }
}

// ============================================================================
// Per-name write outcome
// ============================================================================

/// Why a single tag in a write batch was not written
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum WriteError {
    #[error("unknown tag")]
    UnknownTag,

    #[error("tag is not writable")]
    NotWritable,

    #[error("cannot encode value: {0}")]
    Encode(String),

    #[error("device not connected")]
    NotConnected,

    #[error("transport failure: {0}")]
    Transport(String),
}

// ============================================================================
// Conversion to GatewayError at the process boundary
// ============================================================================

impl From<AcqError> for GatewayError {
    fn from(err: AcqError) -> Self {
        match err {
            AcqError::ConfigError(msg) => GatewayError::Configuration(msg),
            AcqError::IoError(msg) => GatewayError::Io(std::io::Error::other(msg)),
            AcqError::ProtocolError(msg) => GatewayError::Protocol {
                protocol: "modbus".to_string(),
                message: msg,
            },
            AcqError::ConnectionError(msg) => GatewayError::Communication(msg),
            AcqError::TimeoutError(msg) => GatewayError::Timeout(msg),
            AcqError::DecodeError(msg) | AcqError::EncodeError(msg) => {
                GatewayError::Validation(msg)
            },
            AcqError::TagError(msg)
            | AcqError::GroupError(msg)
            | AcqError::PlannerError(msg) => GatewayError::Validation(msg),
            AcqError::StateError(msg) | AcqError::InternalError(msg) => {
                GatewayError::Internal(msg)
            },
        }
    }
}

impl GatewayErrorTrait for AcqError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "ACQSRV_CONFIG_ERROR",
            Self::IoError(_) => "ACQSRV_IO_ERROR",
            Self::ProtocolError(_) => "ACQSRV_PROTOCOL_ERROR",
            Self::ConnectionError(_) => "ACQSRV_CONNECTION_ERROR",
            Self::TimeoutError(_) => "ACQSRV_TIMEOUT",
            Self::DecodeError(_) => "ACQSRV_DECODE_ERROR",
            Self::EncodeError(_) => "ACQSRV_ENCODE_ERROR",
            Self::TagError(_) => "ACQSRV_TAG_ERROR",
            Self::GroupError(_) => "ACQSRV_GROUP_ERROR",
            Self::PlannerError(_) => "ACQSRV_PLANNER_ERROR",
            Self::StateError(_) => "ACQSRV_STATE_ERROR",
            Self::InternalError(_) => "ACQSRV_INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError(_) | Self::PlannerError(_) => ErrorCategory::Configuration,
            Self::IoError(_) | Self::ConnectionError(_) => ErrorCategory::Connection,
            Self::ProtocolError(_) => ErrorCategory::Protocol,
            Self::TimeoutError(_) => ErrorCategory::Timeout,
            Self::DecodeError(_) | Self::EncodeError(_) => ErrorCategory::Validation,
            Self::TagError(_) | Self::GroupError(_) => ErrorCategory::NotFound,
            Self::StateError(_) | Self::InternalError(_) => ErrorCategory::Internal,
        }
    }
}
