//! Approval ticket types for the confirmation gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::invocation::RequestId;

/// Lifecycle of one approval ticket.
///
/// `Pending` is the only non-terminal state. Once a ticket leaves it, the
/// state never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketState {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl TicketState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A request for external sign-off on one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalTicket {
    pub request_id: RequestId,
    /// Text shown to whoever resolves the ticket.
    pub prompt: String,
    pub state: TicketState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
