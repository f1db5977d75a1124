//! # conduit-runtime
//!
//! Turns an [`OrchestratorConfig`](conduit_contracts::config::OrchestratorConfig)
//! into a running [`Orchestrator`]: one session per capability server, a
//! registry fed by their handshakes, a sandbox-enforcing dispatcher, and a
//! model router with health tracking.
//!
//! ```rust,ignore
//! use conduit_runtime::{config, OrchestratorBuilder};
//! use conduit_router::ClassifyContext;
//!
//! let config = config::load(Path::new("conduit.toml"))?;
//! let orchestrator = OrchestratorBuilder::new(config).build().await?;
//! let answer = orchestrator.handle("list my downloads folder", &ClassifyContext::default()).await?;
//! ```

pub mod builder;
pub mod config;
pub mod orchestrator;

pub use builder::OrchestratorBuilder;
pub use orchestrator::{Answer, Orchestrator, ToolCallRecord};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        path::Path,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use conduit_audit::ChainedAuditSink;
    use conduit_contracts::{
        config::{OrchestratorConfig, RoutingConfig, ServerConfig},
        error::{ConduitError, ConduitResult, TransportError},
        invocation::{DenyReason, InvocationRequest, InvocationResult},
        model::{
            AvailabilityState, Locality, ModelDescriptor, ModelEndpoint, ModelId, ModelReply, ModelRequest, Role,
        },
        sandbox::SandboxPolicy,
        tool::{ServerId, SideEffectClass, ToolAdvert},
        wire::{ClientFrame, ServerFrame},
    };
    use conduit_core::{
        approval::ApprovalGate,
        registry::ToolRegistry,
        traits::ToolChannel,
        Dispatcher, ServerBinding,
    };
    use conduit_policy::FsSandbox;
    use conduit_router::{ClassifyContext, ModelBackend, ModelRouter, StaticProbe};
    use conduit_session::MemoryConnector;

    use super::{Orchestrator, OrchestratorBuilder};

    // ── Mocks ─────────────────────────────────────────────────────────────────

    /// One outcome per attempt, whichever model it lands on; an empty queue
    /// means every model fails.
    struct ScriptedModels {
        steps: Mutex<VecDeque<ConduitResult<ModelReply>>>,
        requests: Arc<Mutex<Vec<ModelRequest>>>,
        attempts: Arc<Mutex<Vec<ModelId>>>,
    }

    fn model_down() -> ConduitError {
        ConduitError::Execution { code: "model_down".into(), message: "backend unreachable".into() }
    }

    #[async_trait]
    impl ModelBackend for ScriptedModels {
        async fn complete(
            &self,
            model: &ModelDescriptor,
            request: &ModelRequest,
            _budget: Duration,
        ) -> ConduitResult<ModelReply> {
            self.requests.lock().unwrap().push(request.clone());
            self.attempts.lock().unwrap().push(model.id.clone());
            self.steps.lock().unwrap().pop_front().unwrap_or_else(|| Err(model_down()))
        }
    }

    /// Counts calls and answers every one with `{ "ok": true }`.
    struct CountingChannel {
        server_id: ServerId,
        calls: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl ToolChannel for CountingChannel {
        fn server_id(&self) -> &ServerId {
            &self.server_id
        }

        async fn call(
            &self,
            _request: &InvocationRequest,
            _cancel: CancellationToken,
        ) -> Result<Value, TransportError> {
            *self.calls.lock().unwrap() += 1;
            Ok(json!({ "ok": true }))
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn model(id: &str, server: &str) -> ModelDescriptor {
        ModelDescriptor {
            id: ModelId::new(id),
            capabilities: vec![],
            priority: 0,
            locality: Locality::Local,
            quality: 0.5,
            performance: 0.5,
            cost: 0.0,
            availability: AvailabilityState::Available,
            endpoint: ModelEndpoint { server: ServerId::new(server), tool: "generate".to_string() },
        }
    }

    fn advert(name: &str, class: SideEffectClass) -> ToolAdvert {
        ToolAdvert {
            name: name.to_string(),
            schema: json!({ "type": "object" }),
            side_effect_class: class,
            requires_confirmation: false,
        }
    }

    fn tool_call(tool: &str, arguments: Value) -> ModelReply {
        ModelReply::ToolCall { tool: tool.to_string(), arguments }
    }

    fn final_text(text: &str) -> ModelReply {
        ModelReply::Final { text: text.to_string() }
    }

    struct Harness {
        orchestrator: Orchestrator,
        requests: Arc<Mutex<Vec<ModelRequest>>>,
        attempts: Arc<Mutex<Vec<ModelId>>>,
        tool_calls: Arc<Mutex<u32>>,
        audit: Arc<ChainedAuditSink>,
    }

    impl Harness {
        fn attempted(&self) -> Vec<String> {
            self.attempts.lock().unwrap().iter().map(|m| m.0.clone()).collect()
        }
    }

    fn harness(replies: Vec<ModelReply>, policy: SandboxPolicy, max_tool_rounds: u32) -> Harness {
        scripted_harness(replies.into_iter().map(Ok).collect(), policy, max_tool_rounds)
    }

    /// Three local models (m1, m2, m3 in chain order) sharing one scripted
    /// backend, and a "sys" server whose tools are answered by a counting
    /// channel.
    fn scripted_harness(
        steps: Vec<ConduitResult<ModelReply>>,
        policy: SandboxPolicy,
        max_tool_rounds: u32,
    ) -> Harness {
        let registry = Arc::new(ToolRegistry::new());
        let sys = ServerId::new("sys");
        registry
            .register_server(
                &sys,
                vec![advert("uptime", SideEffectClass::Read), advert("read_file", SideEffectClass::Read)],
            )
            .unwrap();

        let tool_calls = Arc::new(Mutex::new(0));
        let channel = CountingChannel { server_id: sys.clone(), calls: tool_calls.clone() };
        let audit = Arc::new(ChainedAuditSink::new("test"));
        let dispatcher = Dispatcher::new(
            registry,
            Box::new(FsSandbox),
            Arc::new(ApprovalGate::new(Duration::from_secs(30))),
            audit.clone(),
        )
        .with_server(
            sys,
            ServerBinding { policy, channel: Arc::new(channel), request_timeout: Duration::from_secs(5) },
        );

        let requests = Arc::new(Mutex::new(Vec::new()));
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let backend = ScriptedModels {
            steps: Mutex::new(steps.into()),
            requests: requests.clone(),
            attempts: attempts.clone(),
        };
        let models = vec![model("m1", "llm"), model("m2", "llm"), model("m3", "llm")];
        let router = ModelRouter::new(models, RoutingConfig::default(), Arc::new(backend), Arc::new(StaticProbe(true)));

        let orchestrator = Orchestrator::new(Arc::new(dispatcher), router, audit.clone(), max_tool_rounds);
        Harness { orchestrator, requests, attempts, tool_calls, audit }
    }

    // ── Agent loop ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn tool_result_is_fed_back_until_final_answer() {
        let h = harness(
            vec![tool_call("uptime", json!({})), final_text("up 3 days")],
            SandboxPolicy::default(),
            8,
        );

        let answer = h.orchestrator.handle("how long has this been up?", &ClassifyContext::default()).await.unwrap();
        assert_eq!(answer.text, "up 3 days");
        assert_eq!(answer.tool_calls.len(), 1);
        assert!(answer.tool_calls[0].result.is_success());
        assert_eq!(*h.tool_calls.lock().unwrap(), 1);

        let requests = h.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 2);
        let last = requests[1].messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert!(last.content.contains("\"ok\":true"));
    }

    #[tokio::test]
    async fn routing_and_invocations_are_audited_in_one_chain() {
        let h = harness(vec![tool_call("uptime", json!({})), final_text("done")], SandboxPolicy::default(), 8);
        h.orchestrator.handle("uptime please", &ClassifyContext::default()).await.unwrap();

        let log = h.audit.export_log().unwrap();
        let actions: Vec<&str> = log.events.iter().map(|e| e.event.action.as_str()).collect();
        assert_eq!(actions, vec!["route", "tool_call:uptime"]);
        assert!(h.audit.verify_integrity());
    }

    /// Every model fails: nothing is dispatched.
    #[tokio::test]
    async fn all_models_failing_is_model_unavailable_and_no_tool_runs() {
        let h = harness(vec![], SandboxPolicy::default(), 8);
        let result = h.orchestrator.handle("what's up", &ClassifyContext::default()).await;
        match result {
            Err(ConduitError::ModelUnavailable { attempts }) => assert_eq!(attempts.len(), 3),
            other => panic!("expected ModelUnavailable, got {:?}", other.map(|a| a.text)),
        }
        assert_eq!(*h.tool_calls.lock().unwrap(), 0);
    }

    /// The primary asks for a tool, then fails on the next round: the
    /// fallback finishes the answer and the tool is not run again.
    #[tokio::test]
    async fn fallback_after_a_tool_round_does_not_repeat_the_tool() {
        let h = scripted_harness(
            vec![Ok(tool_call("uptime", json!({}))), Err(model_down()), Ok(final_text("up 3 days"))],
            SandboxPolicy::default(),
            8,
        );

        let answer = h.orchestrator.handle("how long has this been up?", &ClassifyContext::default()).await.unwrap();
        assert_eq!(answer.text, "up 3 days");
        assert_eq!(answer.model_id, ModelId::new("m2"));
        assert_eq!(answer.tool_calls.len(), 1);
        assert_eq!(h.attempted(), vec!["m1", "m1", "m2"]);
        assert_eq!(*h.tool_calls.lock().unwrap(), 1);

        let log = h.audit.export_log().unwrap();
        let invocations = log.events.iter().filter(|e| e.event.action.starts_with("tool_call:")).count();
        assert_eq!(invocations, 1);

        // The fallback sees the tool result from the first round.
        let requests = h.requests.lock().unwrap();
        assert!(requests[2].messages.iter().any(|m| m.role == Role::Tool));
    }

    /// A model that failed earlier in the request is not tried again.
    #[tokio::test]
    async fn later_rounds_resume_at_the_model_that_last_answered() {
        let h = scripted_harness(
            vec![
                Err(model_down()),
                Ok(tool_call("uptime", json!({}))),
                Ok(tool_call("uptime", json!({}))),
                Ok(final_text("done")),
            ],
            SandboxPolicy::default(),
            8,
        );

        let answer = h.orchestrator.handle("uptime twice", &ClassifyContext::default()).await.unwrap();
        assert_eq!(answer.model_id, ModelId::new("m2"));
        assert_eq!(h.attempted(), vec!["m1", "m2", "m2", "m2"]);
        assert_eq!(*h.tool_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn denial_is_reported_to_the_model_and_not_retried() {
        let root = tempfile::tempdir().unwrap();
        let policy = SandboxPolicy { allowed_roots: vec![root.path().to_path_buf()], ..SandboxPolicy::default() };
        let escape = format!("{}/../etc/passwd", root.path().display());
        let h = harness(
            vec![tool_call("read_file", json!({ "path": escape })), final_text("I can't read that")],
            policy,
            8,
        );

        let answer = h.orchestrator.handle("read /etc/passwd", &ClassifyContext::default()).await.unwrap();
        assert_eq!(answer.tool_calls.len(), 1);
        assert!(matches!(
            answer.tool_calls[0].result,
            InvocationResult::SecurityDenied { reason: DenyReason::PathEscape, .. }
        ));
        assert_eq!(*h.tool_calls.lock().unwrap(), 0);

        let requests = h.requests.lock().unwrap();
        let fed_back = &requests[1].messages.last().unwrap().content;
        assert!(fed_back.contains("path_escape"));
        assert!(fed_back.contains("\"final\":true"));
    }

    #[tokio::test]
    async fn tool_round_limit_stops_the_loop() {
        let h = harness(
            vec![
                tool_call("uptime", json!({})),
                tool_call("uptime", json!({})),
                tool_call("uptime", json!({})),
            ],
            SandboxPolicy::default(),
            2,
        );
        let result = h.orchestrator.handle("loop forever", &ClassifyContext::default()).await;
        assert!(matches!(result, Err(ConduitError::Execution { ref code, .. }) if code == "tool_round_limit"));
        assert_eq!(*h.tool_calls.lock().unwrap(), 2);
    }

    // ── End to end over in-process sessions ───────────────────────────────────

    /// Serve every connection to `name`, answering tool calls with `respond`.
    fn spawn_server<F>(memory: &MemoryConnector, name: &str, tools: Vec<ToolAdvert>, respond: F)
    where
        F: Fn(&str, &Value) -> Value + Send + Sync + 'static,
    {
        let mut listener = memory.bind(name);
        let respond = Arc::new(respond);
        tokio::spawn(async move {
            while let Some(mut end) = listener.accept().await {
                let respond = respond.clone();
                let tools = tools.clone();
                tokio::spawn(async move {
                    end.send_frame(&ServerFrame::Capabilities { tools }).await;
                    while let Some(frame) = end.recv_frame().await {
                        match frame {
                            ClientFrame::ToolCall { id, tool, arguments, .. } => {
                                let payload = respond(&tool, &arguments);
                                end.send_frame(&ServerFrame::ToolResult { id, payload: Some(payload) }).await;
                            }
                            ClientFrame::Ping => {
                                end.send_frame(&ServerFrame::Pong).await;
                            }
                            _ => {}
                        }
                    }
                });
            }
        });
    }

    fn sent_tool_result(arguments: &Value) -> Option<String> {
        arguments["messages"]
            .as_array()?
            .iter()
            .find(|m| m["role"] == "tool")
            .and_then(|m| m["content"].as_str())
            .map(str::to_string)
    }

    #[tokio::test]
    async fn builder_wires_sessions_registry_and_models() {
        let root = tempfile::tempdir().unwrap();
        let notes = root.path().join("notes.txt");
        std::fs::write(&notes, "buy milk").unwrap();

        let memory = Arc::new(MemoryConnector::new());
        let read_file = ToolAdvert {
            name: "read_file".into(),
            schema: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }),
            side_effect_class: SideEffectClass::Read,
            requires_confirmation: false,
        };
        spawn_server(&memory, "fs", vec![read_file], |_tool, arguments| {
            let path = arguments["path"].as_str().unwrap_or_default();
            json!({ "content": std::fs::read_to_string(Path::new(path)).unwrap_or_default() })
        });
        let notes_path = notes.display().to_string();
        spawn_server(&memory, "llm", vec![advert("generate", SideEffectClass::Read)], move |_tool, arguments| {
            match sent_tool_result(arguments) {
                Some(result) => json!({ "kind": "final", "text": result }),
                None => json!({ "kind": "tool_call", "tool": "read_file", "arguments": { "path": notes_path } }),
            }
        });

        let mut fs = ServerConfig::new("fs", "memory://fs");
        fs.sandbox.allowed_roots = vec![root.path().to_path_buf()];
        let config = OrchestratorConfig {
            servers: vec![fs, ServerConfig::new("llm", "memory://llm"), ServerConfig::new("gone", "memory://gone")],
            models: vec![model("local", "llm")],
            ..OrchestratorConfig::default()
        };

        let audit = Arc::new(ChainedAuditSink::new("e2e"));
        let orchestrator = OrchestratorBuilder::new(config)
            .with_connector(memory.clone())
            .with_audit(audit.clone())
            .build()
            .await
            .unwrap();
        assert_eq!(orchestrator.sessions().len(), 2);

        // The model endpoint is reachable through the router only.
        let names: Vec<String> =
            orchestrator.dispatcher().registry().descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["read_file"]);

        let answer = orchestrator
            .handle("read notes.txt", &ClassifyContext::default())
            .await
            .unwrap();
        assert_eq!(answer.model_id, ModelId::new("local"));
        assert!(answer.tool_calls[0].result.is_success());
        assert!(answer.text.contains("buy milk"));
        assert_eq!(audit.len(), 2);

        match orchestrator.dispatcher().dispatch("generate", json!({ "messages": [] })).await {
            InvocationResult::ExecutionError { code, .. } => assert_eq!(code, "unknown_tool"),
            other => panic!("model endpoint dispatched as a tool: {other:?}"),
        }

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn builder_rejects_invalid_config() {
        let mut config = OrchestratorConfig::default();
        config.routing.weights.quality = 0.9;
        let result = OrchestratorBuilder::new(config).build().await;
        assert!(matches!(result, Err(ConduitError::Config { .. })));
    }
}
