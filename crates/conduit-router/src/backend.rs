//! Model backends.
//!
//! The router never talks to a provider directly; it asks a `ModelBackend`
//! to complete a request against one model. `SessionModelBackend` reaches a
//! model server the same way tools are reached: a `tool_call` on that
//! server's session.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use conduit_contracts::{
    error::{ConduitError, ConduitResult},
    invocation::InvocationRequest,
    model::{ModelDescriptor, ModelReply, ModelRequest},
    tool::ServerId,
};
use conduit_core::traits::ToolChannel;

/// Completes a conversation against one model.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(
        &self,
        model: &ModelDescriptor,
        request: &ModelRequest,
        budget: Duration,
    ) -> ConduitResult<ModelReply>;
}

/// Invokes model endpoints over capability-server sessions.
#[derive(Default)]
pub struct SessionModelBackend {
    channels: HashMap<ServerId, Arc<dyn ToolChannel>>,
}

impl SessionModelBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: Arc<dyn ToolChannel>) -> Self {
        self.channels.insert(channel.server_id().clone(), channel);
        self
    }
}

#[async_trait]
impl ModelBackend for SessionModelBackend {
    async fn complete(
        &self,
        model: &ModelDescriptor,
        request: &ModelRequest,
        budget: Duration,
    ) -> ConduitResult<ModelReply> {
        let endpoint = &model.endpoint;
        let channel = self.channels.get(&endpoint.server).ok_or_else(|| ConduitError::Execution {
            code: "no_channel".to_string(),
            message: format!("model server '{}' is not connected", endpoint.server),
        })?;

        let arguments = json!({
            "model": model.id,
            "messages": request.messages,
            "tools": request.tools,
        });
        let invocation = InvocationRequest::new(endpoint.tool.clone(), arguments, budget);
        debug!(
            model_id = %model.id,
            server_id = %endpoint.server,
            request_id = %invocation.id,
            "model completion sent"
        );

        let payload = channel.call(&invocation, CancellationToken::new()).await?;
        parse_reply(payload)
    }
}

/// A structured reply, or a bare string taken as final text.
fn parse_reply(payload: Value) -> ConduitResult<ModelReply> {
    if let Value::String(text) = payload {
        return Ok(ModelReply::Final { text });
    }
    serde_json::from_value(payload).map_err(|e| ConduitError::Protocol {
        reason: format!("unrecognised model reply: {e}"),
    })
}
