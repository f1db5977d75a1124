//! The invocation dispatcher: the sandbox-enforcing path from a tool name to
//! a capability server.
//!
//! The dispatcher enforces the pipeline ordering on every call:
//!
//!   Registry → Arguments → Sandbox → [Approval] → Channel → Audit
//!
//! The security invariant is absolute: `ToolChannel::call()` is NEVER reached
//! unless the sandbox evaluator returned `Allow` and, for tools that require
//! confirmation, the approval ticket reached `Approved`. This is enforced
//! structurally: every earlier step returns before the channel is touched.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conduit_contracts::{
    approval::TicketState,
    audit::AuditEvent,
    error::TransportError,
    invocation::{DenyReason, InvocationRequest, InvocationResult},
    sandbox::{SandboxPolicy, SandboxVerdict},
    tool::ServerId,
};

use crate::{
    approval::ApprovalGate,
    registry::ToolRegistry,
    targets,
    traits::{AuditSink, SandboxEvaluator, ToolChannel},
};

/// Everything the dispatcher knows about one capability server.
pub struct ServerBinding {
    pub policy: SandboxPolicy,
    pub channel: Arc<dyn ToolChannel>,
    pub request_timeout: Duration,
}

/// The central dispatcher shared by every tool call in the process.
///
/// Bindings are fixed at construction; sessions reconnect underneath their
/// channel handles, so nothing here needs to change at runtime.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    sandbox: Box<dyn SandboxEvaluator>,
    gate: Arc<ApprovalGate>,
    audit: Arc<dyn AuditSink>,
    servers: HashMap<ServerId, ServerBinding>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        sandbox: Box<dyn SandboxEvaluator>,
        gate: Arc<ApprovalGate>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            sandbox,
            gate,
            audit,
            servers: HashMap::new(),
        }
    }

    /// Bind a capability server's policy and channel.
    pub fn with_server(mut self, server_id: ServerId, binding: ServerBinding) -> Self {
        self.servers.insert(server_id, binding);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    /// Dispatch one tool call and wait for its terminal result.
    pub async fn dispatch(&self, tool: &str, arguments: Value) -> InvocationResult {
        self.dispatch_with_cancel(tool, arguments, CancellationToken::new()).await
    }

    /// Dispatch one tool call that the caller may cancel through `cancel`.
    ///
    /// # Pipeline
    ///
    /// 1. Resolve the tool in the registry; unknown → `ExecutionError(unknown_tool)`
    /// 2. Validate arguments against the tool's schema → `ExecutionError(invalid_arguments)`
    /// 3. Evaluate the owning server's sandbox policy; deny → `SecurityDenied`
    /// 4. If confirmation is required, open a ticket and wait:
    ///    denied → `SecurityDenied(confirmation_denied)`,
    ///    expired → `SecurityDenied(confirmation_expired)`
    /// 5. Call the channel — **only reachable after steps 3 & 4 pass**
    /// 6. Audit the terminal result
    ///
    /// Never returns an error: every failure is classified into an
    /// `InvocationResult` the caller can match on.
    pub async fn dispatch_with_cancel(
        &self,
        tool: &str,
        arguments: Value,
        cancel: CancellationToken,
    ) -> InvocationResult {
        // ── Step 1: Registry lookup ──────────────────────────────────────────
        let Some(registered) = self.registry.lookup(tool) else {
            let request = InvocationRequest::new(tool, arguments, Duration::ZERO);
            warn!(request_id = %request.id, tool = %tool, "dispatch of unknown tool");
            let result = InvocationResult::execution_error(
                "unknown_tool",
                format!("no registered tool named '{tool}'"),
            );
            return self.finish(None, &request, result);
        };
        let descriptor = &registered.descriptor;
        let server_id = &descriptor.server_id;

        let Some(binding) = self.servers.get(server_id) else {
            let request = InvocationRequest::new(tool, arguments, Duration::ZERO);
            let result = InvocationResult::execution_error(
                "no_channel",
                format!("server '{server_id}' has no bound channel"),
            );
            return self.finish(Some(server_id), &request, result);
        };

        let mut request = InvocationRequest::new(tool, arguments, binding.request_timeout);

        debug!(
            request_id = %request.id,
            server_id = %server_id,
            tool = %tool,
            side_effect = descriptor.side_effect_class.as_str(),
            "dispatch starting"
        );

        // ── Step 2: Argument validation ──────────────────────────────────────
        if let Err(reason) = registered.validate_arguments(&request.arguments) {
            warn!(request_id = %request.id, tool = %tool, %reason, "arguments rejected by schema");
            let result = InvocationResult::execution_error("invalid_arguments", reason);
            return self.finish(Some(server_id), &request, result);
        }

        // ── Step 3: Sandbox evaluation ───────────────────────────────────────
        //
        // This is the primary trust gate. Nothing leaves the process until Allow.
        let access = targets::access_request(descriptor, &request.arguments);
        if let SandboxVerdict::Deny { reason, detail } = self.sandbox.evaluate(&binding.policy, &access) {
            warn!(
                request_id = %request.id,
                server_id = %server_id,
                tool = %tool,
                reason = %reason,
                %detail,
                "sandbox denied invocation"
            );
            return self.finish(Some(server_id), &request, InvocationResult::denied(reason, detail));
        }

        // ── Step 4: Confirmation gate ────────────────────────────────────────
        if descriptor.requires_confirmation || binding.policy.demands_confirmation(tool) {
            let prompt = format!(
                "Allow '{tool}' ({}) on '{server_id}' with arguments {}?",
                descriptor.side_effect_class.as_str(),
                request.arguments
            );
            let handle = match self.gate.open(request.id, prompt) {
                Ok(handle) => handle,
                Err(e) => {
                    let result = InvocationResult::execution_error("approval_failed", e.to_string());
                    return self.finish(Some(server_id), &request, result);
                }
            };

            let state = tokio::select! {
                state = self.gate.wait(handle) => state,
                _ = cancel.cancelled() => {
                    // Withdraw the ticket so a late approval cannot take effect.
                    let _ = self.gate.resolve(request.id, false);
                    let result = InvocationResult::execution_error(
                        "cancelled",
                        "cancelled while awaiting approval",
                    );
                    return self.finish(Some(server_id), &request, result);
                }
            };

            match state {
                TicketState::Approved => {
                    info!(request_id = %request.id, tool = %tool, "invocation approved");
                    // The wait for a human does not count against the request budget.
                    request = InvocationRequest::with_id(
                        request.id,
                        request.tool,
                        request.arguments,
                        binding.request_timeout,
                    );
                }
                TicketState::Denied => {
                    let result = InvocationResult::denied(
                        DenyReason::ConfirmationDenied,
                        format!("'{tool}' was not approved"),
                    );
                    return self.finish(Some(server_id), &request, result);
                }
                TicketState::Expired | TicketState::Pending => {
                    let result = InvocationResult::denied(
                        DenyReason::ConfirmationExpired,
                        format!("no decision for '{tool}' within {:?}", self.gate.expiry()),
                    );
                    return self.finish(Some(server_id), &request, result);
                }
            }
        }

        // ── Step 5: Channel call ─────────────────────────────────────────────
        //
        // Only reachable if the sandbox allowed AND any confirmation was approved.
        let result = match binding.channel.call(&request, cancel).await {
            Ok(payload) => InvocationResult::Success { payload },
            Err(TransportError::Timeout) => InvocationResult::Timeout,
            Err(TransportError::Remote { code, message }) => InvocationResult::ExecutionError { code, message },
            Err(other) => InvocationResult::execution_error(other.code(), other.to_string()),
        };

        // ── Step 6: Audit ────────────────────────────────────────────────────
        self.finish(Some(server_id), &request, result)
    }

    /// Emit the audit event for a terminal result and hand it back.
    fn finish(
        &self,
        server_id: Option<&ServerId>,
        request: &InvocationRequest,
        result: InvocationResult,
    ) -> InvocationResult {
        let event = AuditEvent::invocation(server_id, request, &result);
        if let Err(e) = self.audit.record(&event) {
            warn!(request_id = %request.id, error = %e, "audit sink rejected invocation event");
        }
        debug!(
            request_id = %request.id,
            tool = %request.tool,
            outcome = %event.outcome,
            "dispatch finished"
        );
        result
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
