//! Model health tracking.
//!
//! A single monitor task owns the health table. Everyone else sends it
//! `HealthReport`s and reads immutable `HealthSnapshot`s from a watch
//! channel, so there is exactly one writer.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tracing::{debug, info, warn};

use conduit_contracts::model::{AvailabilityState, ModelDescriptor, ModelId};

/// Weight of the newest sample in every moving average.
const EWMA_ALPHA: f64 = 0.3;

/// The outcome of one model attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub model_id: ModelId,
    pub success: bool,
    pub latency: Duration,
}

/// Rolling health of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelHealth {
    pub state: AvailabilityState,
    /// EWMA of success, in `[0, 1]`.
    pub score: f64,
    /// EWMA of latency in milliseconds; 0 until the first sample.
    pub latency_ms: f64,
    pub consecutive_failures: u32,
    pub samples: u64,
    unavailable_until: Option<Instant>,
}

impl ModelHealth {
    fn new(state: AvailabilityState) -> Self {
        Self {
            state,
            score: 1.0,
            latency_ms: 0.0,
            consecutive_failures: 0,
            samples: 0,
            unavailable_until: None,
        }
    }
}

/// Immutable view of every model's health at one moment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSnapshot {
    models: HashMap<ModelId, ModelHealth>,
}

impl HealthSnapshot {
    pub fn get(&self, id: &ModelId) -> Option<&ModelHealth> {
        self.models.get(id)
    }

    pub fn state(&self, id: &ModelId) -> Option<AvailabilityState> {
        self.models.get(id).map(|h| h.state)
    }

    /// Availability score, 1.0 for models never reported on.
    pub fn score(&self, id: &ModelId) -> f64 {
        self.models.get(id).map(|h| h.score).unwrap_or(1.0)
    }
}

/// Thresholds the monitor applies.
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    pub failure_threshold: u32,
    pub recovery_after: Duration,
}

/// The health table and its transition rules.
#[derive(Debug, Clone)]
pub struct HealthTable {
    policy: HealthPolicy,
    models: HashMap<ModelId, ModelHealth>,
}

impl HealthTable {
    pub fn new(models: &[ModelDescriptor], policy: HealthPolicy) -> Self {
        let models = models
            .iter()
            .map(|m| (m.id.clone(), ModelHealth::new(m.availability)))
            .collect();
        Self { policy, models }
    }

    pub fn apply(&mut self, report: &HealthReport, now: Instant) {
        let policy = self.policy;
        let health = self
            .models
            .entry(report.model_id.clone())
            .or_insert_with(|| ModelHealth::new(AvailabilityState::Available));

        let sample = if report.success { 1.0 } else { 0.0 };
        health.score = EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * health.score;
        let latency_ms = report.latency.as_secs_f64() * 1000.0;
        health.latency_ms = if health.samples == 0 {
            latency_ms
        } else {
            EWMA_ALPHA * latency_ms + (1.0 - EWMA_ALPHA) * health.latency_ms
        };
        health.samples += 1;

        if report.success {
            if health.state != AvailabilityState::Available {
                info!(model_id = %report.model_id, "model available again");
            }
            health.state = AvailabilityState::Available;
            health.consecutive_failures = 0;
            health.unavailable_until = None;
            return;
        }

        health.consecutive_failures += 1;
        if health.consecutive_failures >= policy.failure_threshold {
            if health.state != AvailabilityState::Unavailable {
                warn!(
                    model_id = %report.model_id,
                    failures = health.consecutive_failures,
                    "model marked unavailable"
                );
            }
            health.state = AvailabilityState::Unavailable;
            health.unavailable_until = Some(now + policy.recovery_after);
        } else {
            health.state = AvailabilityState::Degraded;
        }
    }

    /// Move every model whose sit-out has elapsed back to Degraded.
    pub fn recover(&mut self, now: Instant) {
        for (id, health) in &mut self.models {
            if health.unavailable_until.is_some_and(|until| until <= now) {
                debug!(model_id = %id, "model sit-out elapsed");
                health.state = AvailabilityState::Degraded;
                health.unavailable_until = None;
                health.consecutive_failures = 0;
            }
        }
    }

    /// The earliest pending recovery, if any model is sitting out.
    pub fn next_recovery(&self) -> Option<Instant> {
        self.models.values().filter_map(|h| h.unavailable_until).min()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot { models: self.models.clone() }
    }
}

/// Handle to a running health monitor.
#[derive(Debug, Clone)]
pub struct HealthHandle {
    reports: mpsc::UnboundedSender<HealthReport>,
    snapshots: watch::Receiver<Arc<HealthSnapshot>>,
}

impl HealthHandle {
    pub fn report(&self, report: HealthReport) {
        if self.reports.send(report).is_err() {
            debug!("health monitor has stopped; report dropped");
        }
    }

    pub fn snapshot(&self) -> Arc<HealthSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<HealthSnapshot>> {
        self.snapshots.clone()
    }
}

/// Spawn the monitor task. It stops once every handle is dropped.
pub fn spawn_monitor(table: HealthTable) -> HealthHandle {
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(table.snapshot()));
    tokio::spawn(run_monitor(table, report_rx, snapshot_tx));
    HealthHandle { reports: report_tx, snapshots: snapshot_rx }
}

async fn run_monitor(
    mut table: HealthTable,
    mut reports: mpsc::UnboundedReceiver<HealthReport>,
    snapshots: watch::Sender<Arc<HealthSnapshot>>,
) {
    loop {
        let next = table.next_recovery();
        tokio::select! {
            report = reports.recv() => match report {
                Some(report) => table.apply(&report, Instant::now()),
                None => break,
            },
            _ = tokio::time::sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                table.recover(Instant::now());
            }
        }
        snapshots.send_replace(Arc::new(table.snapshot()));
    }
    debug!("health monitor stopped");
}
