//! Connectivity probing.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

/// Answers "are we online right now?" for the routing policy table.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Online if a TCP connection to `addr` opens within `timeout`.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self { addr: addr.into(), timeout }
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_online(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(addr = %self.addr, error = %e, "connectivity probe failed");
                false
            }
            Err(_) => {
                debug!(addr = %self.addr, "connectivity probe timed out");
                false
            }
        }
    }
}

/// A fixed answer. Used for `--offline` and when no probe is configured.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn is_online(&self) -> bool {
        self.0
    }
}
