//! Wiring a validated configuration into a running orchestrator.

use std::{collections::HashSet, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};

use conduit_audit::ChainedAuditSink;
use conduit_contracts::{
    approval::ApprovalTicket,
    config::OrchestratorConfig,
    error::ConduitResult,
    tool::{ServerId, ToolAdvert},
};
use conduit_core::{
    approval::ApprovalGate,
    registry::ToolRegistry,
    traits::{AuditSink, ToolChannel},
    Dispatcher, ServerBinding,
};
use conduit_policy::FsSandbox;
use conduit_router::{ConnectivityProbe, ModelRouter, SessionModelBackend, StaticProbe, TcpProbe};
use conduit_session::{Connector, SchemeConnector, Session, SessionState};

use crate::{config, orchestrator::Orchestrator};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// `(server, tool)` pairs that serve model completions.
///
/// These are reached through the router only, so they never enter the tool
/// registry and a model cannot call another model as a tool.
type ModelEndpoints = Arc<HashSet<(ServerId, String)>>;

fn callable_tools(server_id: &ServerId, adverts: &[ToolAdvert], endpoints: &ModelEndpoints) -> Vec<ToolAdvert> {
    adverts
        .iter()
        .filter(|advert| !endpoints.contains(&(server_id.clone(), advert.name.clone())))
        .cloned()
        .collect()
}

/// Builds an [`Orchestrator`] from configuration.
///
/// Every setting has a default: WebSocket connections, a fresh hash-chained
/// audit log, and the configured probe (or "always online").
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    connector: Arc<dyn Connector>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    audit: Option<Arc<dyn AuditSink>>,
    approvals: Option<mpsc::UnboundedSender<ApprovalTicket>>,
}

impl OrchestratorBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            connector: Arc::new(SchemeConnector::new()),
            probe: None,
            audit: None,
            approvals: None,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Override the probe named in the configuration.
    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Announce every approval ticket on `listener`.
    pub fn with_approval_listener(mut self, listener: mpsc::UnboundedSender<ApprovalTicket>) -> Self {
        self.approvals = Some(listener);
        self
    }

    /// Validate the configuration, connect every server, and wire the
    /// dispatcher and router.
    ///
    /// A server that cannot be reached is logged and left out; its tools are
    /// simply not registered and models behind it fail over.
    pub async fn build(self) -> ConduitResult<Orchestrator> {
        let Self { config, connector, probe, audit, approvals } = self;
        config::validate(&config)?;

        let opened = join_all(
            config
                .servers
                .iter()
                .map(|server| Session::open(server.clone(), connector.clone())),
        )
        .await;

        let registry = Arc::new(ToolRegistry::new());
        let endpoints: ModelEndpoints = Arc::new(
            config
                .models
                .iter()
                .map(|model| (model.endpoint.server.clone(), model.endpoint.tool.clone()))
                .collect(),
        );
        let audit: Arc<dyn AuditSink> = match audit {
            Some(audit) => audit,
            None => Arc::new(ChainedAuditSink::new(format!("conduit-{}", uuid::Uuid::new_v4()))),
        };
        let mut gate = ApprovalGate::new(config.approval.expiry());
        if let Some(listener) = approvals {
            gate = gate.with_listener(listener);
        }

        let mut dispatcher = Dispatcher::new(registry.clone(), Box::new(FsSandbox), Arc::new(gate), audit.clone());
        let mut backend = SessionModelBackend::new();
        let mut sessions = Vec::new();

        for (server, opened) in config.servers.iter().zip(opened) {
            let session = match opened {
                Ok(session) => Arc::new(session),
                Err(e) => {
                    warn!(server_id = %server.id, error = %e, "server unavailable; continuing without it");
                    continue;
                }
            };

            let tools = callable_tools(&server.id, &session.tools(), &endpoints);
            if let Err(e) = registry.register_server(&server.id, tools) {
                warn!(server_id = %server.id, error = %e, "tool advertisement rejected");
            }
            spawn_registry_refresh(registry.clone(), &session, endpoints.clone());

            let channel: Arc<dyn ToolChannel> = session.clone();
            dispatcher = dispatcher.with_server(
                server.id.clone(),
                ServerBinding {
                    policy: server.sandbox.clone(),
                    channel: channel.clone(),
                    request_timeout: server.request_timeout(),
                },
            );
            backend = backend.with_channel(channel);
            sessions.push(session);
        }

        let probe: Arc<dyn ConnectivityProbe> = match (probe, &config.routing.probe) {
            (Some(probe), _) => probe,
            (None, Some(addr)) => Arc::new(TcpProbe::new(addr.clone(), PROBE_TIMEOUT)),
            (None, None) => Arc::new(StaticProbe(true)),
        };
        let router = ModelRouter::new(config.models.clone(), config.routing.clone(), Arc::new(backend), probe);

        info!(
            servers = sessions.len(),
            configured = config.servers.len(),
            tools = registry.descriptors().len(),
            models = config.models.len(),
            "orchestrator ready"
        );

        Ok(Orchestrator::new(Arc::new(dispatcher), router, audit, config.routing.max_tool_rounds)
            .with_sessions(sessions))
    }
}

/// Keep the registry in step with a session's advertised tools.
///
/// The task watches channels rather than holding the session, so it ends
/// when the session does. The server's tools are dropped once it closes.
fn spawn_registry_refresh(registry: Arc<ToolRegistry>, session: &Session, endpoints: ModelEndpoints) {
    let server_id = session.server_id().clone();
    let mut tools = session.watch_tools();
    let mut state = session.subscribe_state();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = tools.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let adverts = callable_tools(&server_id, &tools.borrow_and_update(), &endpoints);
                    if let Err(e) = registry.register_server(&server_id, adverts) {
                        warn!(server_id = %server_id, error = %e, "tool re-advertisement rejected");
                    }
                }
                changed = state.changed() => {
                    if changed.is_err() || *state.borrow_and_update() == SessionState::Closed {
                        break;
                    }
                }
            }
        }
        registry.unregister_server(&server_id);
    });
}
