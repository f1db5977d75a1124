//! The decision/approval gate.
//!
//! Each ticket is a four-state machine: Pending → Approved | Denied by
//! explicit resolution, or Pending → Expired when its deadline passes. The
//! gate's lock is only held for map bookkeeping, never across an await, so a
//! ticket waiting for a human never blocks unrelated invocations.
//!
//! Expiry does not depend on anyone waiting: `open` arms a timer that expires
//! the ticket at its deadline even if the waiter was dropped.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use conduit_contracts::{
    approval::{ApprovalTicket, TicketState},
    error::{ConduitError, ConduitResult},
    invocation::RequestId,
};

/// Resolved tickets remembered so late resolutions stay idempotent.
const HISTORY_LIMIT: usize = 1024;

struct PendingTicket {
    ticket: ApprovalTicket,
    notify: watch::Sender<TicketState>,
}

#[derive(Default)]
struct GateState {
    pending: HashMap<RequestId, PendingTicket>,
    resolved: HashMap<RequestId, TicketState>,
    order: VecDeque<RequestId>,
}

impl GateState {
    fn remember(&mut self, id: RequestId, state: TicketState) {
        self.resolved.insert(id, state);
        self.order.push_back(id);
        while self.order.len() > HISTORY_LIMIT {
            if let Some(old) = self.order.pop_front() {
                self.resolved.remove(&old);
            }
        }
    }

    /// Move a pending ticket to `outcome` and wake its waiter.
    ///
    /// If the ticket already left Pending, its existing state is returned and
    /// nobody is woken.
    fn settle(&mut self, id: RequestId, outcome: TicketState) -> Option<TicketState> {
        if let Some(entry) = self.pending.remove(&id) {
            // The waiter may already be gone (cancelled); that is fine.
            let _ = entry.notify.send(outcome);
            self.remember(id, outcome);
            return Some(outcome);
        }
        self.resolved.get(&id).copied()
    }
}

/// Expire `id` unless it was already settled; returns its terminal state.
fn expire_ticket(state: &Mutex<GateState>, id: RequestId) -> TicketState {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    match state.settle(id, TicketState::Expired) {
        Some(TicketState::Expired) => {
            warn!(request_id = %id, "approval ticket expired");
            TicketState::Expired
        }
        Some(other) => other,
        None => TicketState::Expired,
    }
}

/// What a dispatcher holds while it waits on a ticket.
#[derive(Debug)]
pub struct TicketHandle {
    pub request_id: RequestId,
    rx: watch::Receiver<TicketState>,
    deadline: tokio::time::Instant,
}

/// Holds every outstanding approval ticket.
///
/// Any holder of the gate may resolve a ticket. An optional listener is told
/// about every new ticket so a UI can present it.
pub struct ApprovalGate {
    expiry: Duration,
    state: Arc<Mutex<GateState>>,
    listener: Option<mpsc::UnboundedSender<ApprovalTicket>>,
}

impl ApprovalGate {
    /// Create a gate whose tickets expire `expiry` after they are opened.
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            state: Arc::new(Mutex::new(GateState::default())),
            listener: None,
        }
    }

    /// Announce every new ticket on `listener`.
    pub fn with_listener(mut self, listener: mpsc::UnboundedSender<ApprovalTicket>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Open a ticket for `request_id`.
    ///
    /// Only one ticket may ever exist per request; a second `open` for the
    /// same id is an error whether or not the first has been resolved.
    pub fn open(&self, request_id: RequestId, prompt: impl Into<String>) -> ConduitResult<TicketHandle> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(self.expiry).unwrap_or(chrono::Duration::zero());
        let ticket = ApprovalTicket {
            request_id,
            prompt: prompt.into(),
            state: TicketState::Pending,
            created_at: now,
            expires_at,
        };

        let (tx, rx) = watch::channel(TicketState::Pending);
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.pending.contains_key(&request_id) || state.resolved.contains_key(&request_id) {
                return Err(ConduitError::Approval {
                    reason: format!("a ticket already exists for request {request_id}"),
                });
            }
            state.pending.insert(
                request_id,
                PendingTicket { ticket: ticket.clone(), notify: tx },
            );
        }

        let deadline = tokio::time::Instant::now() + self.expiry;
        self.arm_expiry(request_id, deadline);

        info!(request_id = %request_id, prompt = %ticket.prompt, "approval ticket opened");
        if let Some(listener) = &self.listener {
            if listener.send(ticket).is_err() {
                debug!(request_id = %request_id, "approval listener has gone away");
            }
        }

        Ok(TicketHandle { request_id, rx, deadline })
    }

    /// Expire the ticket at `deadline` whether or not anyone is waiting.
    ///
    /// The timer holds the gate weakly and does nothing once it is dropped.
    /// Outside a runtime there is nothing to spawn on, and the ticket then
    /// expires only through `wait`.
    fn arm_expiry(&self, request_id: RequestId, deadline: tokio::time::Instant) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(request_id = %request_id, "no runtime; ticket expires only while awaited");
            return;
        };
        let state = Arc::downgrade(&self.state);
        runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(state) = state.upgrade() {
                expire_ticket(&state, request_id);
            }
        });
    }

    /// Approve (`true`) or deny (`false`) a ticket.
    ///
    /// Idempotent: resolving a ticket that already reached a terminal state
    /// returns that state and has no other effect.
    pub fn resolve(&self, request_id: RequestId, approve: bool) -> ConduitResult<TicketState> {
        let outcome = if approve { TicketState::Approved } else { TicketState::Denied };
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.settle(request_id, outcome) {
            Some(settled) => {
                if settled == outcome {
                    info!(request_id = %request_id, state = ?settled, "approval ticket resolved");
                } else {
                    debug!(request_id = %request_id, state = ?settled, "ticket already settled");
                }
                Ok(settled)
            }
            None => Err(ConduitError::Approval {
                reason: format!("no ticket for request {request_id}"),
            }),
        }
    }

    /// Current state of a ticket, if the gate still knows about it.
    pub fn state(&self, request_id: RequestId) -> Option<TicketState> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.pending.contains_key(&request_id) {
            return Some(TicketState::Pending);
        }
        state.resolved.get(&request_id).copied()
    }

    /// Snapshot of every ticket still awaiting a decision, oldest first.
    pub fn pending(&self) -> Vec<ApprovalTicket> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<ApprovalTicket> = state.pending.values().map(|p| p.ticket.clone()).collect();
        out.sort_by_key(|t| t.created_at);
        out
    }

    /// Wait until the ticket is resolved or its deadline passes.
    ///
    /// On deadline the ticket is moved to Expired, unless a resolution won
    /// the race, in which case that resolution is returned.
    pub async fn wait(&self, handle: TicketHandle) -> TicketState {
        let TicketHandle { request_id, mut rx, deadline } = handle;

        let waited = tokio::time::timeout_at(deadline, async {
            loop {
                let current = *rx.borrow_and_update();
                if current.is_terminal() {
                    return Some(current);
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        })
        .await;

        match waited {
            Ok(Some(state)) => state,
            Ok(None) | Err(_) => expire_ticket(&self.state, request_id),
        }
    }
}
