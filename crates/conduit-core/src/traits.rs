//! Core trait definitions for the orchestration pipeline.
//!
//! These three traits define the trust boundary around a tool call:
//!
//! - `SandboxEvaluator` — trusted gate (evaluated before anything leaves the process)
//! - `ToolChannel`      — untrusted transport to a capability server
//! - `AuditSink`        — trusted sink (receives every terminal result)
//!
//! The dispatcher wires them together in the correct order. A `ToolChannel`
//! is never called unless the evaluator returned `Allow` and any required
//! confirmation was approved.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use conduit_contracts::{
    audit::AuditEvent,
    error::{ConduitResult, TransportError},
    invocation::InvocationRequest,
    sandbox::{AccessRequest, SandboxPolicy, SandboxVerdict},
    tool::ServerId,
};

/// The sandbox policy evaluator.
///
/// Implementations are **trusted** and must be stateless: the verdict depends
/// only on `policy`, `access`, and the filesystem as it is at call time.
pub trait SandboxEvaluator: Send + Sync {
    fn evaluate(&self, policy: &SandboxPolicy, access: &AccessRequest) -> SandboxVerdict;
}

/// A request/response channel to one capability server.
///
/// Implementations own correlation and deadline enforcement. They must not
/// retry: a failed call is reported as-is and the caller decides what to do.
#[async_trait]
pub trait ToolChannel: Send + Sync {
    /// The server this channel talks to.
    fn server_id(&self) -> &ServerId;

    /// Send `request` and wait for its response, its deadline, or `cancel`.
    async fn call(
        &self,
        request: &InvocationRequest,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, TransportError>;
}

/// Receives every audit event the core produces.
///
/// The core only produces events; whether they are persisted, chained, or
/// shipped elsewhere is up to the implementation.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> ConduitResult<()>;
}
