//! The model router: decides a fallback chain and walks it.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use conduit_contracts::{
    config::RoutingConfig,
    error::{ConduitError, ConduitResult},
    model::{Classification, FailedAttempt, ModelDescriptor, ModelId, ModelReply, ModelRequest, RoutingDecision},
};

use crate::{
    backend::ModelBackend,
    health::{spawn_monitor, HealthHandle, HealthPolicy, HealthReport, HealthTable},
    policy,
    probe::ConnectivityProbe,
};

/// Routes requests across a fixed fleet of models.
///
/// The fleet is fixed at construction. Health changes arrive through the
/// monitor task, never by mutating the router.
pub struct ModelRouter {
    models: Vec<ModelDescriptor>,
    config: RoutingConfig,
    backend: Arc<dyn ModelBackend>,
    probe: Arc<dyn ConnectivityProbe>,
    health: HealthHandle,
}

impl ModelRouter {
    /// Build a router and spawn its health monitor. Must be called inside a
    /// tokio runtime.
    pub fn new(
        models: Vec<ModelDescriptor>,
        config: RoutingConfig,
        backend: Arc<dyn ModelBackend>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        let policy = HealthPolicy {
            failure_threshold: config.failure_threshold,
            recovery_after: config.recovery_after(),
        };
        let health = spawn_monitor(HealthTable::new(&models, policy));
        Self { models, config, backend, probe, health }
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn health(&self) -> &HealthHandle {
        &self.health
    }

    /// Probe connectivity, then route.
    pub async fn decide(&self, classification: Classification) -> ConduitResult<RoutingDecision> {
        let online = self.probe.is_online().await;
        self.decide_with(classification, online)
    }

    /// Route with a known connectivity state.
    pub fn decide_with(&self, classification: Classification, online: bool) -> ConduitResult<RoutingDecision> {
        policy::route(
            classification,
            &self.models,
            &self.health.snapshot(),
            &self.config.weights,
            online,
        )
    }

    /// Try each model of `decision` in order until one replies.
    ///
    /// Attempts are strictly sequential and each is bounded by the configured
    /// model timeout. Every attempt is reported to the health monitor.
    pub async fn invoke(
        &self,
        decision: &RoutingDecision,
        request: &ModelRequest,
    ) -> ConduitResult<(ModelId, ModelReply)> {
        self.invoke_from(decision, None, request).await
    }

    /// Like [`invoke`](Self::invoke), but start at `resume` instead of the
    /// primary. Models ranked ahead of `resume` are not tried again. A
    /// `resume` that is not in the chain starts from the primary.
    pub async fn invoke_from(
        &self,
        decision: &RoutingDecision,
        resume: Option<&ModelId>,
        request: &ModelRequest,
    ) -> ConduitResult<(ModelId, ModelReply)> {
        let budget = self.config.model_timeout();
        let skip = resume
            .and_then(|id| decision.chain().position(|m| m == id))
            .unwrap_or(0);
        let mut attempts = Vec::new();

        for model_id in decision.chain().skip(skip) {
            let Some(model) = self.models.iter().find(|m| &m.id == model_id) else {
                warn!(model_id = %model_id, "routed model is not in the fleet");
                attempts.push(FailedAttempt { model_id: model_id.clone(), reason: "unknown model".to_string() });
                continue;
            };

            debug!(model_id = %model_id, attempt = attempts.len() + 1, "model attempt");
            let started = Instant::now();
            let outcome = tokio::time::timeout(budget, self.backend.complete(model, request, budget)).await;
            let latency = started.elapsed();

            let reason = match outcome {
                Ok(Ok(reply)) => {
                    self.health.report(HealthReport { model_id: model_id.clone(), success: true, latency });
                    if !attempts.is_empty() {
                        info!(model_id = %model_id, failed = attempts.len(), "fallback model answered");
                    }
                    return Ok((model_id.clone(), reply));
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => ConduitError::Timeout.to_string(),
            };

            warn!(model_id = %model_id, reason = %reason, "model attempt failed");
            self.health.report(HealthReport { model_id: model_id.clone(), success: false, latency });
            attempts.push(FailedAttempt { model_id: model_id.clone(), reason });
        }

        warn!(attempts = attempts.len(), "fallback chain exhausted");
        Err(ConduitError::ModelUnavailable { attempts })
    }
}
