//! Terminal resolution of confirmation tickets.

use std::sync::Arc;

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::warn;

use conduit_contracts::approval::ApprovalTicket;
use conduit_core::approval::ApprovalGate;

/// Answer every ticket announced on `tickets`: approve outright when
/// `auto_approve` is set, otherwise ask on stderr and read y/n from stdin.
///
/// A ticket left unanswered simply expires.
pub fn spawn(gate: Arc<ApprovalGate>, mut tickets: mpsc::UnboundedReceiver<ApprovalTicket>, auto_approve: bool) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(ticket) = tickets.recv().await {
            let approve = if auto_approve {
                eprintln!("approving: {}", ticket.prompt);
                true
            } else {
                eprint!("{} [y/N] ", ticket.prompt);
                match lines.next_line().await {
                    Ok(Some(line)) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
                    _ => false,
                }
            };
            if let Err(e) = gate.resolve(ticket.request_id, approve) {
                warn!(request_id = %ticket.request_id, error = %e, "could not resolve ticket");
            }
        }
    });
}
