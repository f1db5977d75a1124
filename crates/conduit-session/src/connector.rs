//! Connectors turn a server URL into a duplex stream of text frames.
//!
//! The session never touches a socket directly. It owns a `Connection`: a
//! sender for outbound frames and a receiver for inbound ones. The inbound
//! receiver closing means the connection is gone.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, warn};

use conduit_contracts::{
    config::ServerConfig,
    error::{ConduitError, ConduitResult},
};

use crate::memory::MemoryConnector;

/// Buffered frames per direction before senders wait.
pub(crate) const FRAME_BUFFER: usize = 64;

/// One live connection to a capability server.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Opens connections to capability servers.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, server: &ServerConfig) -> ConduitResult<Connection>;
}

// ── WebSocket ─────────────────────────────────────────────────────────────────

/// Connects to `ws://` and `wss://` servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, server: &ServerConfig) -> ConduitResult<Connection> {
        let (ws, _) = connect_async(server.url.as_str())
            .await
            .map_err(|e| ConduitError::Connect {
                server_id: server.id.clone(),
                reason: e.to_string(),
            })?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(FRAME_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<String>(FRAME_BUFFER);
        let server_id = server.id.clone();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    debug!(server_id = %server_id, error = %e, "websocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let server_id = server.id.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!(server_id = %server_id, "dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(WsMessage::Close(frame)) => {
                        debug!(server_id = %server_id, ?frame, "websocket closed by server");
                        break;
                    }
                    // Transport-level ping/pong is answered by tungstenite.
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(server_id = %server_id, error = %e, "websocket read failed");
                        break;
                    }
                };
                if in_tx.send(text).await.is_err() {
                    break;
                }
            }
        });

        Ok(Connection { outbound: out_tx, inbound: in_rx })
    }
}

// ── Scheme dispatch ───────────────────────────────────────────────────────────

/// Picks a connector by URL scheme: WebSocket for `ws://`/`wss://`, the
/// in-process registry for `memory://`.
#[derive(Default, Clone)]
pub struct SchemeConnector {
    ws: WsConnector,
    memory: Option<Arc<MemoryConnector>>,
}

impl SchemeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory(mut self, memory: Arc<MemoryConnector>) -> Self {
        self.memory = Some(memory);
        self
    }
}

#[async_trait]
impl Connector for SchemeConnector {
    async fn connect(&self, server: &ServerConfig) -> ConduitResult<Connection> {
        if server.url.starts_with("ws://") || server.url.starts_with("wss://") {
            return self.ws.connect(server).await;
        }
        if server.url.starts_with("memory://") {
            if let Some(memory) = &self.memory {
                return memory.connect(server).await;
            }
        }
        Err(ConduitError::Connect {
            server_id: server.id.clone(),
            reason: format!("no connector for '{}'", server.url),
        })
    }
}
