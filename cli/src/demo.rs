//! Built-in scenarios against in-process capability servers.
//!
//! Two servers run inside this process over `memory://` connections:
//!
//!   filesystem — `read_file` and `delete_file`, sandboxed to a scratch dir
//!   llm        — a rule-based stand-in for a model server
//!
//! Each scenario goes through the real orchestrator: classifier, router,
//! dispatcher, sandbox, approval gate, and the hash-chained audit log.

use std::{path::PathBuf, sync::Arc};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

use conduit_audit::ChainedAuditSink;
use conduit_contracts::{
    config::{OrchestratorConfig, ServerConfig},
    error::{ConduitError, ConduitResult},
    model::{AvailabilityState, Category, Classification, Complexity, Locality, ModelDescriptor, ModelEndpoint, ModelId},
    tool::{ServerId, SideEffectClass, ToolAdvert},
    wire::{ClientFrame, ServerFrame, WireError},
};
use conduit_router::ClassifyContext;
use conduit_runtime::{Orchestrator, OrchestratorBuilder};
use conduit_session::MemoryConnector;

// ── In-process servers ────────────────────────────────────────────────────────

type Handler = fn(&str, &Value) -> Result<Value, WireError>;

/// Accept every connection to `name` and answer its tool calls with `handler`.
fn serve(memory: &MemoryConnector, name: &str, tools: Vec<ToolAdvert>, handler: Handler) {
    let mut listener = memory.bind(name);
    tokio::spawn(async move {
        while let Some(mut end) = listener.accept().await {
            let tools = tools.clone();
            tokio::spawn(async move {
                end.send_frame(&ServerFrame::Capabilities { tools }).await;
                while let Some(frame) = end.recv_frame().await {
                    let reply = match frame {
                        ClientFrame::ToolCall { id, tool, arguments, .. } => match handler(&tool, &arguments) {
                            Ok(payload) => ServerFrame::ToolResult { id, payload: Some(payload) },
                            Err(error) => ServerFrame::Error { id: Some(id), error },
                        },
                        ClientFrame::Ping => ServerFrame::Pong,
                        _ => continue,
                    };
                    if !end.send_frame(&reply).await {
                        break;
                    }
                }
            });
        }
    });
}

fn path_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "path": { "type": "string" } },
        "required": ["path"]
    })
}

fn filesystem_tools() -> Vec<ToolAdvert> {
    vec![
        ToolAdvert {
            name: "read_file".to_string(),
            schema: path_schema(),
            side_effect_class: SideEffectClass::Read,
            requires_confirmation: false,
        },
        ToolAdvert {
            name: "delete_file".to_string(),
            schema: path_schema(),
            side_effect_class: SideEffectClass::Destructive,
            requires_confirmation: true,
        },
    ]
}

fn io_error(e: std::io::Error) -> WireError {
    WireError { code: "io_error".to_string(), message: e.to_string() }
}

fn filesystem(tool: &str, arguments: &Value) -> Result<Value, WireError> {
    let path = arguments["path"].as_str().unwrap_or_default();
    match tool {
        "read_file" => std::fs::read_to_string(path)
            .map(|content| json!({ "content": content }))
            .map_err(io_error),
        "delete_file" => std::fs::remove_file(path)
            .map(|()| json!({ "deleted": path }))
            .map_err(io_error),
        other => Err(WireError { code: "unknown_tool".to_string(), message: other.to_string() }),
    }
}

/// Asks for `read_file`/`delete_file` when the request starts with "read"
/// or "delete", and reports the tool result once it has one.
fn model_server(_tool: &str, arguments: &Value) -> Result<Value, WireError> {
    let messages = arguments["messages"].as_array().cloned().unwrap_or_default();
    if let Some(result) = messages.iter().rev().find(|m| m["role"] == "tool") {
        let text = format!("tool replied: {}", result["content"].as_str().unwrap_or_default());
        return Ok(json!({ "kind": "final", "text": text }));
    }

    let request = messages
        .iter()
        .find(|m| m["role"] == "user")
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default();
    let mut words = request.splitn(2, ' ');
    let reply = match (words.next(), words.next()) {
        (Some("read"), Some(path)) => json!({ "kind": "tool_call", "tool": "read_file", "arguments": { "path": path } }),
        (Some("delete"), Some(path)) => {
            json!({ "kind": "tool_call", "tool": "delete_file", "arguments": { "path": path } })
        }
        _ => json!({ "kind": "final", "text": format!("{} said: {request}", arguments["model"]) }),
    };
    Ok(reply)
}

// ── Configuration ─────────────────────────────────────────────────────────────

fn model(id: &str, locality: Locality, quality: f64, cost: f64) -> ModelDescriptor {
    ModelDescriptor {
        id: ModelId::new(id),
        capabilities: vec![],
        priority: 0,
        locality,
        quality,
        performance: 0.6,
        cost,
        availability: AvailabilityState::Available,
        endpoint: ModelEndpoint { server: ServerId::new("llm"), tool: "generate".to_string() },
    }
}

fn demo_config(sandbox: PathBuf) -> OrchestratorConfig {
    let mut filesystem = ServerConfig::new("filesystem", "memory://filesystem");
    filesystem.sandbox.allowed_roots = vec![sandbox];
    filesystem.sandbox.denied_extensions = vec!["exe".to_string()];

    OrchestratorConfig {
        servers: vec![filesystem, ServerConfig::new("llm", "memory://llm")],
        models: vec![
            model("llama-local", Locality::Local, 0.6, 0.0),
            model("frontier-cloud", Locality::Cloud, 0.95, 0.6),
        ],
        ..OrchestratorConfig::default()
    }
}

// ── Scenario runner ───────────────────────────────────────────────────────────

fn setup_error(e: std::io::Error) -> ConduitError {
    ConduitError::Execution { code: "demo_setup".to_string(), message: e.to_string() }
}

/// Run every scenario in sequence.
pub async fn run() -> ConduitResult<()> {
    print_banner();

    let sandbox = std::env::temp_dir().join(format!("conduit-demo-{}", std::process::id()));
    std::fs::create_dir_all(&sandbox).map_err(setup_error)?;
    let sandbox = sandbox.canonicalize().map_err(setup_error)?;
    std::fs::write(sandbox.join("notes.txt"), "water the plants").map_err(setup_error)?;
    std::fs::write(sandbox.join("scratch.tmp"), "temporary").map_err(setup_error)?;

    let memory = Arc::new(MemoryConnector::new());
    serve(&memory, "filesystem", filesystem_tools(), filesystem);
    serve(&memory, "llm", vec![], model_server);

    let audit = Arc::new(ChainedAuditSink::new("conduit-demo"));
    let (approvals, mut tickets) = mpsc::unbounded_channel();
    let orchestrator = OrchestratorBuilder::new(demo_config(sandbox.clone()))
        .with_connector(memory.clone())
        .with_audit(audit.clone())
        .with_approval_listener(approvals)
        .build()
        .await?;

    let gate = orchestrator.dispatcher().gate().clone();
    tokio::spawn(async move {
        while let Some(ticket) = tickets.recv().await {
            println!("  Approval requested:     {}", ticket.prompt);
            println!("  Approval decision:      approved (demo operator)");
            if let Err(e) = gate.resolve(ticket.request_id, true) {
                warn!(request_id = %ticket.request_id, error = %e, "could not resolve ticket");
            }
        }
    });

    let outcome = run_scenarios(&orchestrator, &sandbox).await;
    orchestrator.shutdown().await;
    if let Err(e) = std::fs::remove_dir_all(&sandbox) {
        warn!(path = %sandbox.display(), error = %e, "could not remove demo sandbox");
    }
    outcome?;

    let log = audit.export_log()?;
    println!("=== Audit ===");
    println!(
        "  Chain integrity:        {} ({} event(s))",
        if audit.verify_integrity() { "VERIFIED" } else { "FAILED" },
        log.events.len()
    );
    for entry in &log.events {
        println!("    #{:<3} {:<24} {}", entry.sequence, entry.event.action, entry.event.outcome);
    }
    println!();
    Ok(())
}

async fn run_scenarios(orchestrator: &Orchestrator, sandbox: &std::path::Path) -> ConduitResult<()> {
    let context = ClassifyContext::default();

    println!("=== Scenario 1: Read inside the sandbox ===");
    let text = format!("read {}", sandbox.join("notes.txt").display());
    report(orchestrator.handle(&text, &context).await?);

    println!("=== Scenario 2: Path escape ===");
    let text = format!("read {}/../../etc/passwd", sandbox.display());
    report(orchestrator.handle(&text, &context).await?);

    println!("=== Scenario 3: Destructive tool behind confirmation ===");
    let text = format!("delete {}", sandbox.join("scratch.tmp").display());
    report(orchestrator.handle(&text, &context).await?);

    println!("=== Scenario 4: Routing online vs offline ===");
    let creative = Classification { complexity: Complexity::Creative, category: Category::Creative };
    for online in [true, false] {
        let decision = orchestrator.router().decide_with(creative, online)?;
        let chain: Vec<String> = decision.chain().map(|m| m.to_string()).collect();
        println!("  {:<8} chain:          {}", if online { "Online" } else { "Offline" }, chain.join(" > "));
    }
    println!();
    Ok(())
}

fn report(answer: conduit_runtime::Answer) {
    println!(
        "  Routed:                 {:?}/{:?} → {}",
        answer.decision.classification.category, answer.decision.classification.complexity, answer.model_id
    );
    for call in &answer.tool_calls {
        println!("  Tool {:<18} {}", format!("{}:", call.tool), call.result.outcome());
    }
    println!("  Answer:                 {}", answer.text);
    println!();
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("Conduit — Capability Orchestration Core");
    println!("In-process Demo");
    println!("=======================================");
    println!();
    println!("Per tool call:");
    println!("  [1] Registry lookup and argument schema check");
    println!("  [2] Sandbox policy: path containment, symlinks, extensions, size");
    println!("  [3] Confirmation ticket for tools that require one");
    println!("  [4] Session call with deadline, then a hash-chained audit record");
    println!();
}
