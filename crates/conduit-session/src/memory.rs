//! In-process connections for tests and embedded capability servers.
//!
//! A server binds a name and accepts `ServerEnd`s; a session configured with
//! `memory://<name>` connects to it through a pair of channels.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use conduit_contracts::{
    config::ServerConfig,
    error::{ConduitError, ConduitResult},
    wire::{ClientFrame, ServerFrame},
};

use crate::connector::{Connection, Connector, FRAME_BUFFER};

/// The server's half of an in-process connection.
#[derive(Debug)]
pub struct ServerEnd {
    /// Frames the client sent.
    pub inbound: mpsc::Receiver<String>,
    /// Frames for the client.
    pub outbound: mpsc::Sender<String>,
}

impl ServerEnd {
    /// Next well-formed client frame, or `None` once the client is gone.
    pub async fn recv_frame(&mut self) -> Option<ClientFrame> {
        while let Some(text) = self.inbound.recv().await {
            if let Ok(frame) = ClientFrame::decode(&text) {
                return Some(frame);
            }
        }
        None
    }

    /// Send a frame; false if the client is gone.
    pub async fn send_frame(&self, frame: &ServerFrame) -> bool {
        self.outbound.send(frame.encode()).await.is_ok()
    }

    /// Send raw text, well-formed or not.
    pub async fn send_raw(&self, text: impl Into<String>) -> bool {
        self.outbound.send(text.into()).await.is_ok()
    }
}

/// Accepts connections made to one bound name.
#[derive(Debug)]
pub struct MemoryListener {
    rx: mpsc::UnboundedReceiver<ServerEnd>,
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<ServerEnd> {
        self.rx.recv().await
    }
}

/// Registry of in-process servers, keyed by name.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    listeners: Mutex<HashMap<String, mpsc::UnboundedSender<ServerEnd>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, replacing any earlier listener.
    pub fn bind(&self, name: impl Into<String>) -> MemoryListener {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), tx);
        MemoryListener { rx }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, server: &ServerConfig) -> ConduitResult<Connection> {
        let name = server.url.strip_prefix("memory://").unwrap_or(&server.url);
        let refused = |reason: String| ConduitError::Connect {
            server_id: server.id.clone(),
            reason,
        };

        let listener = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| refused(format!("nothing is listening on memory://{name}")))?;

        let (client_tx, server_rx) = mpsc::channel(FRAME_BUFFER);
        let (server_tx, client_rx) = mpsc::channel(FRAME_BUFFER);
        listener
            .send(ServerEnd { inbound: server_rx, outbound: server_tx })
            .map_err(|_| refused(format!("listener on memory://{name} has shut down")))?;

        Ok(Connection { outbound: client_tx, inbound: client_rx })
    }
}
