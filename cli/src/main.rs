//! Conduit — command-line front end.
//!
//! Classify and route requests, check sandbox decisions, call tools directly,
//! or run the full agent loop against the servers in a configuration file.
//!
//! Usage:
//!   conduit classify "ls -la ~/Downloads"
//!   conduit route --config conduit.toml --offline "write a poem"
//!   conduit sandbox-check --config conduit.toml --server filesystem --path /etc/passwd
//!   conduit invoke --config conduit.toml read_file '{"path": "/srv/sandbox/a.txt"}'
//!   conduit chat --config conduit.toml "summarise ~/notes/todo.md"
//!   conduit demo

mod demo;
mod prompt;

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use conduit_audit::ChainedAuditSink;
use conduit_contracts::{
    config::OrchestratorConfig,
    error::{ConduitError, ConduitResult},
    model::Complexity,
    sandbox::{AccessRequest, SandboxPolicy},
    tool::{ServerId, SideEffectClass},
};
use conduit_core::traits::SandboxEvaluator;
use conduit_policy::{FromToml, FsSandbox};
use conduit_router::{classify, ClassifyContext, ModelRouter, SessionModelBackend, StaticProbe};
use conduit_runtime::{config, Orchestrator, OrchestratorBuilder};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Conduit — capability-server orchestration.
#[derive(Parser)]
#[command(
    name = "conduit",
    about = "Capability-server orchestration core",
    long_about = "Routes requests to local or cloud models, dispatches the tools they ask for\n\
                  to capability servers, and enforces each server's sandbox on every call."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct ConfigArg {
    /// Orchestrator configuration file.
    #[arg(long, env = "CONDUIT_CONFIG")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a request without routing it.
    Classify {
        text: String,
        /// Force a complexity instead of inferring one.
        #[arg(long, value_enum)]
        complexity: Option<ComplexityArg>,
    },
    /// Show the routing decision for a request.
    Route {
        #[command(flatten)]
        config: ConfigArg,
        text: String,
        /// Route as if there were no network.
        #[arg(long)]
        offline: bool,
        #[arg(long, value_enum)]
        complexity: Option<ComplexityArg>,
    },
    /// Evaluate a server's sandbox policy against an access.
    SandboxCheck {
        /// Configuration file to take the policy from.
        #[arg(long, env = "CONDUIT_CONFIG")]
        config: Option<PathBuf>,
        /// Server whose sandbox to use (with --config).
        #[arg(long, requires = "config")]
        server: Option<String>,
        /// A standalone sandbox policy TOML file. Wins over --config.
        #[arg(long)]
        policy: Option<PathBuf>,
        #[arg(long, default_value = "check")]
        tool: String,
        #[arg(long, value_enum, default_value_t = ClassArg::Read)]
        class: ClassArg,
        #[arg(long = "path")]
        paths: Vec<PathBuf>,
        #[arg(long = "process")]
        processes: Vec<String>,
        #[arg(long = "app")]
        applications: Vec<String>,
        #[arg(long)]
        bytes: Option<u64>,
    },
    /// Dispatch one tool call through the sandbox.
    Invoke {
        #[command(flatten)]
        config: ConfigArg,
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(default_value = "{}")]
        arguments: String,
        /// Approve every confirmation without asking.
        #[arg(long)]
        yes: bool,
    },
    /// Run the full agent loop on one request.
    Chat {
        #[command(flatten)]
        config: ConfigArg,
        text: String,
        #[arg(long, value_enum)]
        complexity: Option<ComplexityArg>,
        #[arg(long)]
        offline: bool,
        #[arg(long)]
        yes: bool,
        /// Print the hash-chained audit log afterwards.
        #[arg(long)]
        audit: bool,
    },
    /// Run the built-in scenarios against in-process servers.
    Demo,
}

#[derive(Clone, Copy, ValueEnum)]
enum ComplexityArg {
    Simple,
    Moderate,
    Complex,
    Creative,
    Analytical,
}

impl From<ComplexityArg> for Complexity {
    fn from(arg: ComplexityArg) -> Self {
        match arg {
            ComplexityArg::Simple => Complexity::Simple,
            ComplexityArg::Moderate => Complexity::Moderate,
            ComplexityArg::Complex => Complexity::Complex,
            ComplexityArg::Creative => Complexity::Creative,
            ComplexityArg::Analytical => Complexity::Analytical,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ClassArg {
    Read,
    Write,
    Destructive,
    System,
}

impl From<ClassArg> for SideEffectClass {
    fn from(arg: ClassArg) -> Self {
        match arg {
            ClassArg::Read => SideEffectClass::Read,
            ClassArg::Write => SideEffectClass::Write,
            ClassArg::Destructive => SideEffectClass::Destructive,
            ClassArg::System => SideEffectClass::System,
        }
    }
}

fn context(complexity: Option<ComplexityArg>) -> ClassifyContext {
    ClassifyContext { complexity: complexity.map(Complexity::from) }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Set RUST_LOG=debug for per-step output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Classify { text, complexity } => run_classify(&text, complexity),
        Command::Route { config, text, offline, complexity } => run_route(config, &text, offline, complexity),
        Command::SandboxCheck { config, server, policy, tool, class, paths, processes, applications, bytes } => {
            let mut access = AccessRequest::new(tool, class.into());
            access.paths = paths;
            access.processes = processes;
            access.applications = applications;
            access.declared_bytes = bytes;
            run_sandbox_check(config, server, policy, &access)
        }
        Command::Invoke { config, tool, arguments, yes } => run_invoke(config, &tool, &arguments, yes).await,
        Command::Chat { config, text, complexity, offline, yes, audit } => {
            run_chat(config, &text, context(complexity), offline, yes, audit).await
        }
        Command::Demo => demo::run().await,
    };

    if let Err(e) = result {
        eprintln!("conduit: {}", e);
        std::process::exit(1);
    }
}

// ── Subcommands ───────────────────────────────────────────────────────────────

fn print_json<T: serde::Serialize>(value: &T) -> ConduitResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| ConduitError::Protocol {
        reason: format!("failed to render output: {e}"),
    })?;
    println!("{text}");
    Ok(())
}

fn run_classify(text: &str, complexity: Option<ComplexityArg>) -> ConduitResult<()> {
    print_json(&classify(text, &context(complexity)))
}

/// Routing only needs the model fleet, so no server is contacted.
fn run_route(config: ConfigArg, text: &str, offline: bool, complexity: Option<ComplexityArg>) -> ConduitResult<()> {
    let config = config::load(&config.config)?;
    let router = ModelRouter::new(
        config.models,
        config.routing,
        Arc::new(SessionModelBackend::new()),
        Arc::new(StaticProbe(!offline)),
    );
    let classification = classify(text, &context(complexity));
    print_json(&router.decide_with(classification, !offline)?)
}

fn run_sandbox_check(
    config: Option<PathBuf>,
    server: Option<String>,
    policy: Option<PathBuf>,
    access: &AccessRequest,
) -> ConduitResult<()> {
    let policy = match (config, policy) {
        (_, Some(path)) => SandboxPolicy::from_file(&path)?,
        (Some(path), None) => {
            let config = config::load(&path)?;
            let server = server.ok_or_else(|| ConduitError::Config {
                reason: "--server is required with --config".to_string(),
            })?;
            let id = ServerId::new(server);
            config
                .servers
                .into_iter()
                .find(|s| s.id == id)
                .map(|s| s.sandbox)
                .ok_or_else(|| ConduitError::Config { reason: format!("no server '{id}' in configuration") })?
        }
        (None, None) => {
            return Err(ConduitError::Config { reason: "pass --policy or --config".to_string() });
        }
    };
    print_json(&FsSandbox.evaluate(&policy, access))
}

/// Build an orchestrator whose confirmation tickets are answered on the
/// terminal, or approved outright with `--yes`.
async fn connect(
    config: OrchestratorConfig,
    offline: bool,
    yes: bool,
    audit: Arc<ChainedAuditSink>,
) -> ConduitResult<Orchestrator> {
    let (approvals, tickets) = tokio::sync::mpsc::unbounded_channel();
    let mut builder = OrchestratorBuilder::new(config).with_audit(audit).with_approval_listener(approvals);
    if offline {
        builder = builder.with_probe(Arc::new(StaticProbe(false)));
    }
    let orchestrator = builder.build().await?;
    prompt::spawn(orchestrator.dispatcher().gate().clone(), tickets, yes);
    Ok(orchestrator)
}

async fn run_invoke(config: ConfigArg, tool: &str, arguments: &str, yes: bool) -> ConduitResult<()> {
    let arguments: serde_json::Value = serde_json::from_str(arguments).map_err(|e| ConduitError::Config {
        reason: format!("arguments are not valid JSON: {e}"),
    })?;
    let config = config::load(&config.config)?;
    let audit = Arc::new(ChainedAuditSink::new("conduit-invoke"));
    let orchestrator = connect(config, false, yes, audit).await?;

    let result = orchestrator.dispatcher().dispatch(tool, arguments).await;
    orchestrator.shutdown().await;
    print_json(&result)
}

async fn run_chat(
    config: ConfigArg,
    text: &str,
    context: ClassifyContext,
    offline: bool,
    yes: bool,
    show_audit: bool,
) -> ConduitResult<()> {
    let config = config::load(&config.config)?;
    let audit = Arc::new(ChainedAuditSink::new("conduit-chat"));
    let orchestrator = connect(config, offline, yes, audit.clone()).await?;

    let answer = orchestrator.handle(text, &context).await;
    orchestrator.shutdown().await;
    let answer = answer?;

    println!("[{}] {}", answer.model_id, answer.text);
    for call in &answer.tool_calls {
        println!("  tool {} → {}", call.tool, call.result.outcome());
    }
    if show_audit {
        print_json(&audit.export_log()?)?;
    }
    Ok(())
}
