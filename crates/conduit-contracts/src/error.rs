//! Error types for the Conduit orchestration core.
//!
//! Fallible operations return `ConduitResult<T>`. Transport-level failures
//! are reported as `TransportError` so callers can ask whether a retry makes
//! sense before lifting them into `ConduitError`.

use thiserror::Error;

use crate::{
    invocation::DenyReason,
    model::FailedAttempt,
    tool::ServerId,
};

/// The unified error type for the orchestration core.
#[derive(Debug, Error)]
pub enum ConduitError {
    /// Connecting to or handshaking with a capability server failed.
    ///
    /// Fatal for that session until the caller opens a new one.
    #[error("connect to '{server_id}' failed: {reason}")]
    Connect { server_id: ServerId, reason: String },

    /// A peer sent a frame that does not parse or makes no sense.
    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    /// The sandbox or the confirmation gate refused the invocation. Final.
    #[error("security denied ({reason}): {detail}")]
    SecurityDenied { reason: DenyReason, detail: String },

    /// The remote tool or model reported an error.
    #[error("execution error [{code}]: {message}")]
    Execution { code: String, message: String },

    /// A deadline elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// Every model in the fallback chain failed.
    #[error("no model available: {} attempt(s) failed", attempts.len())]
    ModelUnavailable { attempts: Vec<FailedAttempt> },

    /// A tool advertisement could not be registered.
    #[error("registry error: {reason}")]
    Registry { reason: String },

    /// An approval ticket operation was invalid.
    #[error("approval error: {reason}")]
    Approval { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// The audit sink could not accept an event.
    #[error("audit write failed: {reason}")]
    AuditWriteFailed { reason: String },
}

/// Convenience alias used throughout the Conduit crates.
pub type ConduitResult<T> = Result<T, ConduitError>;

/// Why a single request on a session did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("deadline elapsed")]
    Timeout,

    /// The connection dropped while the request was outstanding.
    #[error("connection lost")]
    ConnectionLost,

    /// The session is reconnecting or degraded and not accepting requests.
    #[error("session not connected")]
    NotConnected,

    #[error("session closed")]
    Closed,

    #[error("cancelled by caller")]
    Cancelled,

    /// The server answered with an `error` frame.
    #[error("remote error [{code}]: {message}")]
    Remote { code: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// True if trying the same request again could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionLost | Self::NotConnected)
    }

    /// Stable snake_case code for results and audit events.
    pub fn code(&self) -> &str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionLost => "connection_lost",
            Self::NotConnected => "not_connected",
            Self::Closed => "session_closed",
            Self::Cancelled => "cancelled",
            Self::Remote { code, .. } => code,
            Self::Protocol(_) => "protocol_error",
        }
    }
}

impl From<TransportError> for ConduitError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ConduitError::Timeout,
            TransportError::Remote { code, message } => ConduitError::Execution { code, message },
            TransportError::Protocol(reason) => ConduitError::Protocol { reason },
            other => ConduitError::Execution {
                code: other.code().to_string(),
                message: other.to_string(),
            },
        }
    }
}
