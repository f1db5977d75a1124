//! The agent loop: classify, route, ask a model, run the tools it asks for,
//! and feed their results back until it produces a final answer.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use conduit_contracts::{
    audit::AuditEvent,
    error::{ConduitError, ConduitResult},
    invocation::InvocationResult,
    model::{ModelId, ModelMessage, ModelReply, ModelRequest, Role, RoutingDecision},
};
use conduit_core::{traits::AuditSink, Dispatcher};
use conduit_router::{classify, ClassifyContext, ModelRouter};
use conduit_session::Session;

/// One tool call made while answering a request.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: serde_json::Value,
    pub result: InvocationResult,
}

/// The final answer to one request, with how it was reached.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    /// The model that produced the final reply.
    pub model_id: ModelId,
    pub decision: RoutingDecision,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Owns the dispatcher and router for one process.
pub struct Orchestrator {
    dispatcher: Arc<Dispatcher>,
    router: ModelRouter,
    audit: Arc<dyn AuditSink>,
    max_tool_rounds: u32,
    sessions: Vec<Arc<Session>>,
}

impl Orchestrator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        router: ModelRouter,
        audit: Arc<dyn AuditSink>,
        max_tool_rounds: u32,
    ) -> Self {
        Self {
            dispatcher,
            router,
            audit,
            max_tool_rounds,
            sessions: Vec::new(),
        }
    }

    /// Keep `sessions` alive for as long as the orchestrator, and close them
    /// on `shutdown`.
    pub(crate) fn with_sessions(mut self, sessions: Vec<Arc<Session>>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.sessions
    }

    /// Answer one natural-language request.
    ///
    /// Model failures are retried along the fallback chain by the router;
    /// nothing here retries. A tool result, denial included, is handed back
    /// to the model as-is.
    ///
    /// Every round uses the same routing decision. A round after a tool call
    /// starts at the model that answered the previous round, so a model that
    /// already failed for this request is not given a second budget.
    pub async fn handle(&self, text: &str, context: &ClassifyContext) -> ConduitResult<Answer> {
        let classification = classify(text, context);
        let decision = self.router.decide(classification).await?;
        if let Err(e) = self.audit.record(&AuditEvent::routing(&decision)) {
            warn!(error = %e, "failed to audit routing decision");
        }
        info!(
            category = ?classification.category,
            complexity = ?classification.complexity,
            primary = %decision.primary,
            "request routed"
        );

        let mut request = ModelRequest {
            messages: vec![ModelMessage::new(Role::User, text)],
            tools: self.dispatcher.registry().descriptors(),
        };
        let mut tool_calls = Vec::new();
        let mut resume: Option<ModelId> = None;

        loop {
            let (model_id, reply) = self.router.invoke_from(&decision, resume.as_ref(), &request).await?;
            let (tool, arguments) = match reply {
                ModelReply::Final { text } => {
                    debug!(model_id = %model_id, rounds = tool_calls.len(), "final answer");
                    return Ok(Answer { text, model_id, decision, tool_calls });
                }
                ModelReply::ToolCall { tool, arguments } => (tool, arguments),
            };

            if tool_calls.len() >= self.max_tool_rounds as usize {
                warn!(limit = self.max_tool_rounds, tool = %tool, "tool round limit reached");
                return Err(ConduitError::Execution {
                    code: "tool_round_limit".to_string(),
                    message: format!("model asked for more than {} tool calls", self.max_tool_rounds),
                });
            }

            debug!(model_id = %model_id, tool = %tool, "model requested tool");
            let result = self.dispatcher.dispatch(&tool, arguments.clone()).await;

            let call = serde_json::json!({ "tool": tool, "arguments": arguments });
            request.messages.push(ModelMessage::new(Role::Assistant, call.to_string()));
            request.messages.push(ModelMessage::new(Role::Tool, tool_message(&tool, &result)));
            tool_calls.push(ToolCallRecord { tool, arguments, result });
            resume = Some(model_id);
        }
    }

    /// Close every session this orchestrator owns.
    pub async fn shutdown(&self) {
        for session in &self.sessions {
            session.close().await;
        }
    }
}

/// The tool-result message the model sees. Denials are marked final.
fn tool_message(tool: &str, result: &InvocationResult) -> String {
    let denied = matches!(result, InvocationResult::SecurityDenied { .. });
    serde_json::json!({ "tool": tool, "result": result, "final": denied }).to_string()
}
