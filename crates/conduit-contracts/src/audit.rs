//! Structured audit events.
//!
//! The core produces these and hands them to an `AuditSink`; persisting them
//! is the sink's business.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    invocation::{InvocationRequest, InvocationResult},
    model::RoutingDecision,
    tool::ServerId,
};

/// One auditable fact: who did what to which resource, and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    /// The component acting, e.g. "dispatcher:filesystem" or "router".
    pub actor: String,
    /// e.g. "tool_call:read_file" or "route".
    pub action: String,
    /// The thing acted on: a request id, a path, a model id.
    pub resource: String,
    pub outcome: String,
}

impl AuditEvent {
    /// Audit event for a terminal invocation result.
    pub fn invocation(
        server_id: Option<&ServerId>,
        request: &InvocationRequest,
        result: &InvocationResult,
    ) -> Self {
        let actor = match server_id {
            Some(id) => format!("dispatcher:{id}"),
            None => "dispatcher".to_string(),
        };
        Self {
            timestamp: Utc::now(),
            actor,
            action: format!("tool_call:{}", request.tool),
            resource: request.id.to_string(),
            outcome: result.outcome(),
        }
    }

    /// Audit event for a routing decision.
    pub fn routing(decision: &RoutingDecision) -> Self {
        let chain = decision
            .chain()
            .map(|m| m.0.as_str())
            .collect::<Vec<_>>()
            .join(">");
        Self {
            timestamp: decision.decided_at,
            actor: "router".to_string(),
            action: "route".to_string(),
            resource: format!(
                "{:?}/{:?}",
                decision.classification.category, decision.classification.complexity
            ),
            outcome: format!("primary={} chain={}", decision.primary, chain),
        }
    }
}
