//! Invocation requests and their terminal results.
//!
//! `InvocationRequest` is what the dispatcher hands to a session.
//! `InvocationResult` is what the dispatcher hands back to its caller, one
//! per request, never mutated after creation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a single tool or model invocation.
///
/// The same value travels on the wire as the frame `id`, keys the session's
/// pending map, and keys any approval ticket opened for the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub uuid::Uuid);

impl RequestId {
    /// Create a new, unique request ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse the textual form used on the wire.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single tool call on its way to a capability server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub id: RequestId,
    pub tool: String,
    pub arguments: serde_json::Value,
    pub issued_at: DateTime<Utc>,
    /// Absolute deadline. The session converts a missed deadline to `Timeout`.
    pub deadline: DateTime<Utc>,
}

impl InvocationRequest {
    /// Create a request with a fresh id, issued now, due after `budget`.
    pub fn new(tool: impl Into<String>, arguments: serde_json::Value, budget: std::time::Duration) -> Self {
        Self::with_id(RequestId::new(), tool, arguments, budget)
    }

    /// Like `new`, but reusing an id allocated earlier (e.g. for an approval
    /// ticket opened before the request was issued).
    pub fn with_id(
        id: RequestId,
        tool: impl Into<String>,
        arguments: serde_json::Value,
        budget: std::time::Duration,
    ) -> Self {
        let issued_at = Utc::now();
        // Budgets beyond a year are clamped; nothing legitimately waits that long.
        let budget = chrono::Duration::from_std(budget)
            .ok()
            .filter(|b| *b <= chrono::Duration::days(365))
            .unwrap_or_else(|| chrono::Duration::days(365));
        Self {
            id,
            tool: tool.into(),
            arguments,
            issued_at,
            deadline: issued_at + budget,
        }
    }

    /// Time left until the deadline, saturating at zero.
    pub fn remaining(&self) -> std::time::Duration {
        (self.deadline - Utc::now()).to_std().unwrap_or_default()
    }
}

/// The specific rule a sandbox or approval check failed on.
///
/// Serialized as a snake_case code so callers and audit readers can match on
/// it without parsing prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    PathEscape,
    SymlinkEscape,
    OutsideAllowedRoots,
    DeniedRoot,
    InvalidPath,
    ExtensionDenied,
    ExtensionNotAllowed,
    SizeExceeded,
    ReadOnly,
    BlockedProcess,
    BlockedApplication,
    ConfirmationDenied,
    ConfirmationExpired,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathEscape => "path_escape",
            Self::SymlinkEscape => "symlink_escape",
            Self::OutsideAllowedRoots => "outside_allowed_roots",
            Self::DeniedRoot => "denied_root",
            Self::InvalidPath => "invalid_path",
            Self::ExtensionDenied => "extension_denied",
            Self::ExtensionNotAllowed => "extension_not_allowed",
            Self::SizeExceeded => "size_exceeded",
            Self::ReadOnly => "read_only",
            Self::BlockedProcess => "blocked_process",
            Self::BlockedApplication => "blocked_application",
            Self::ConfirmationDenied => "confirmation_denied",
            Self::ConfirmationExpired => "confirmation_expired",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The terminal outcome of one dispatched tool call.
///
/// `SecurityDenied` is final: nothing above the dispatcher retries it.
/// `Timeout` and `ExecutionError` may be retried by a caller that chooses to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationResult {
    Success {
        payload: serde_json::Value,
    },
    SecurityDenied {
        reason: DenyReason,
        detail: String,
    },
    ExecutionError {
        code: String,
        message: String,
    },
    Timeout,
}

impl InvocationResult {
    pub fn denied(reason: DenyReason, detail: impl Into<String>) -> Self {
        Self::SecurityDenied { reason, detail: detail.into() }
    }

    pub fn execution_error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionError { code: code.into(), message: message.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Short outcome label used in audit events.
    pub fn outcome(&self) -> String {
        match self {
            Self::Success { .. } => "success".to_string(),
            Self::SecurityDenied { reason, .. } => format!("security_denied:{reason}"),
            Self::ExecutionError { code, .. } => format!("execution_error:{code}"),
            Self::Timeout => "timeout".to_string(),
        }
    }
}
