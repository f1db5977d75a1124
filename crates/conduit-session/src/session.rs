//! A long-lived session to one capability server.
//!
//! Each session is backed by a single task that owns the connection and the
//! map of outstanding requests. Callers talk to that task over an mpsc
//! channel and get their answer back on a oneshot, so nothing here is shared
//! mutable state.
//!
//! Lifecycle:
//!
//!   Connecting → Open ⇄ Degraded → (reconnect) → Open … → Closed
//!
//! The session never retries a request. A dropped connection fails every
//! outstanding request with `ConnectionLost` and then reconnects in the
//! background with exponential backoff.

use std::{collections::HashMap, future::Future, pin::pin, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{interval_at, timeout, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conduit_contracts::{
    config::ServerConfig,
    error::{ConduitError, ConduitResult, TransportError},
    invocation::{InvocationRequest, RequestId},
    tool::{ServerId, ToolAdvert},
    wire::{ClientFrame, ServerFrame},
};
use conduit_core::traits::ToolChannel;

use crate::connector::{Connection, Connector};

const COMMAND_BUFFER: usize = 64;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    /// Connected but not trusted, or reconnecting. Requests are refused.
    Degraded,
    Closed,
}

type Reply = oneshot::Sender<Result<Value, TransportError>>;

enum Command {
    Call { request: InvocationRequest, reply: Reply },
    /// The caller cancelled: drop the entry and tell the server.
    Cancel { id: RequestId },
    /// The caller's deadline fired: drop the entry quietly.
    Forget { id: RequestId },
    Close { done: oneshot::Sender<()> },
}

/// Handle to a session. Cheap to share behind an `Arc`; dropping every handle
/// shuts the session down.
pub struct Session {
    server_id: ServerId,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    tools: watch::Receiver<Arc<Vec<ToolAdvert>>>,
}

impl Session {
    /// Connect to `config.url` and complete the capability handshake.
    ///
    /// Fails with `ConduitError::Connect` if either the connection or the
    /// handshake does not finish within its configured timeout.
    pub async fn open(config: ServerConfig, connector: Arc<dyn Connector>) -> ConduitResult<Self> {
        info!(server_id = %config.id, url = %config.url, "opening session");
        let (conn, tools) = establish(&config, connector.as_ref()).await?;
        info!(server_id = %config.id, tool_count = tools.len(), "session open");

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(SessionState::Open);
        let (tools_tx, tools_rx) = watch::channel(Arc::new(tools));

        let server_id = config.id.clone();
        let task = SessionTask {
            config,
            connector,
            commands: command_rx,
            state: state_tx,
            tools: tools_tx,
            pending: HashMap::new(),
        };
        tokio::spawn(task.run(conn));

        Ok(Self {
            server_id,
            commands: command_tx,
            state: state_rx,
            tools: tools_rx,
        })
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// The tool set from the most recent handshake.
    pub fn tools(&self) -> Arc<Vec<ToolAdvert>> {
        self.tools.borrow().clone()
    }

    /// Notified every time the server (re-)advertises its tools.
    pub fn watch_tools(&self) -> watch::Receiver<Arc<Vec<ToolAdvert>>> {
        self.tools.clone()
    }

    /// Send `request` and wait for its response or deadline.
    pub async fn send(&self, request: &InvocationRequest) -> Result<Value, TransportError> {
        self.send_with_cancel(request, CancellationToken::new()).await
    }

    /// Send `request` and wait for its response, its deadline, or `cancel`.
    pub async fn send_with_cancel(
        &self,
        request: &InvocationRequest,
        cancel: CancellationToken,
    ) -> Result<Value, TransportError> {
        if self.state() == SessionState::Closed {
            return Err(TransportError::Closed);
        }

        let id = request.id;
        let deadline = Instant::now() + request.remaining();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Call { request: request.clone(), reply: reply_tx })
            .await
            .map_err(|_| TransportError::Closed)?;

        tokio::select! {
            reply = reply_rx => reply.unwrap_or(Err(TransportError::Closed)),
            _ = tokio::time::sleep_until(deadline) => {
                debug!(server_id = %self.server_id, request_id = %id, "request deadline elapsed");
                let _ = self.commands.send(Command::Forget { id }).await;
                Err(TransportError::Timeout)
            }
            _ = cancel.cancelled() => {
                debug!(server_id = %self.server_id, request_id = %id, "request cancelled");
                let _ = self.commands.send(Command::Cancel { id }).await;
                Err(TransportError::Cancelled)
            }
        }
    }

    /// Fail outstanding requests with `Closed` and shut the session down.
    pub async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Close { done: done_tx }).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

#[async_trait]
impl ToolChannel for Session {
    fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    async fn call(&self, request: &InvocationRequest, cancel: CancellationToken) -> Result<Value, TransportError> {
        self.send_with_cancel(request, cancel).await
    }
}

// ── Connection setup ──────────────────────────────────────────────────────────

async fn establish(config: &ServerConfig, connector: &dyn Connector) -> ConduitResult<(Connection, Vec<ToolAdvert>)> {
    let connect_error = |reason: String| ConduitError::Connect {
        server_id: config.id.clone(),
        reason,
    };

    let mut conn = timeout(config.connect_timeout(), connector.connect(config))
        .await
        .map_err(|_| connect_error(format!("no connection within {:?}", config.connect_timeout())))??;

    let tools = timeout(config.handshake_timeout(), read_capabilities(&mut conn))
        .await
        .map_err(|_| connect_error(format!("no capabilities within {:?}", config.handshake_timeout())))?
        .map_err(connect_error)?;

    Ok((conn, tools))
}

/// Wait for the `capabilities` frame, answering any pings that come first.
async fn read_capabilities(conn: &mut Connection) -> Result<Vec<ToolAdvert>, String> {
    loop {
        let Some(text) = conn.inbound.recv().await else {
            return Err("connection closed during handshake".to_string());
        };
        match ServerFrame::decode(&text) {
            Ok(ServerFrame::Capabilities { tools }) => return Ok(tools),
            Ok(ServerFrame::Ping) => {
                let _ = conn.outbound.send(ClientFrame::Pong.encode()).await;
            }
            Ok(ServerFrame::Pong) => {}
            Ok(other) => return Err(format!("expected capabilities, got {:?}", other)),
            Err(e) => return Err(format!("malformed handshake frame: {e}")),
        }
    }
}

// ── Session task ──────────────────────────────────────────────────────────────

/// Why `drive` returned.
enum Exit {
    Dropped,
    Closed(Option<oneshot::Sender<()>>),
}

struct SessionTask {
    config: ServerConfig,
    connector: Arc<dyn Connector>,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<SessionState>,
    tools: watch::Sender<Arc<Vec<ToolAdvert>>>,
    pending: HashMap<RequestId, Reply>,
}

impl SessionTask {
    async fn run(mut self, mut conn: Connection) {
        let done = loop {
            match self.drive(&mut conn).await {
                Exit::Closed(done) => break done,
                Exit::Dropped => {
                    self.set_state(SessionState::Degraded);
                    warn!(
                        server_id = %self.config.id,
                        pending = self.pending.len(),
                        "connection lost"
                    );
                    self.fail_all(TransportError::ConnectionLost);
                    match self.reconnect().await {
                        Ok(next) => conn = next,
                        Err(done) => break done,
                    }
                }
            }
        };

        self.fail_all(TransportError::Closed);
        self.set_state(SessionState::Closed);
        info!(server_id = %self.config.id, "session closed");
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    /// Serve one connection until it drops or the session is closed.
    async fn drive(&mut self, conn: &mut Connection) -> Exit {
        let period = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut missed_pongs: u32 = 0;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None => return Exit::Closed(None),
                    Some(Command::Close { done }) => return Exit::Closed(Some(done)),
                    Some(Command::Call { request, reply }) => {
                        if !self.start_call(conn, request, reply).await {
                            return Exit::Dropped;
                        }
                    }
                    Some(Command::Cancel { id }) => {
                        if self.pending.remove(&id).is_some() {
                            let frame = ClientFrame::Cancel { id: id.to_string() };
                            let _ = conn.outbound.send(frame.encode()).await;
                        }
                    }
                    Some(Command::Forget { id }) => {
                        self.pending.remove(&id);
                    }
                },

                inbound = conn.inbound.recv() => match inbound {
                    None => return Exit::Dropped,
                    Some(text) => match self.handle_frame(conn, &text).await {
                        FrameOutcome::Continue => {}
                        FrameOutcome::Pong => missed_pongs = 0,
                        FrameOutcome::Dropped => return Exit::Dropped,
                    },
                },

                _ = heartbeat.tick() => {
                    if missed_pongs >= self.config.max_missed_pongs {
                        warn!(server_id = %self.config.id, missed_pongs, "heartbeat lost");
                        return Exit::Dropped;
                    }
                    missed_pongs += 1;
                    if conn.outbound.send(ClientFrame::Ping.encode()).await.is_err() {
                        return Exit::Dropped;
                    }
                }
            }
        }
    }

    /// Register and send one request. Returns false if the connection died.
    async fn start_call(&mut self, conn: &Connection, request: InvocationRequest, reply: Reply) -> bool {
        if *self.state.borrow() != SessionState::Open {
            let _ = reply.send(Err(TransportError::NotConnected));
            return true;
        }
        if self.pending.contains_key(&request.id) {
            let _ = reply.send(Err(TransportError::Protocol(format!(
                "request {} is already outstanding",
                request.id
            ))));
            return true;
        }

        let frame = ClientFrame::ToolCall {
            id: request.id.to_string(),
            tool: request.tool.clone(),
            arguments: request.arguments.clone(),
            deadline_ms: request.remaining().as_millis() as u64,
        };
        if conn.outbound.send(frame.encode()).await.is_err() {
            let _ = reply.send(Err(TransportError::ConnectionLost));
            return false;
        }
        debug!(server_id = %self.config.id, request_id = %request.id, tool = %request.tool, "request sent");
        self.pending.insert(request.id, reply);
        true
    }

    async fn handle_frame(&mut self, conn: &Connection, text: &str) -> FrameOutcome {
        let frame = match ServerFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(server_id = %self.config.id, error = %e, "malformed frame");
                self.set_state(SessionState::Degraded);
                return FrameOutcome::Continue;
            }
        };

        if *self.state.borrow() == SessionState::Degraded {
            info!(server_id = %self.config.id, "session recovered");
            self.set_state(SessionState::Open);
        }

        match frame {
            ServerFrame::ToolResult { id, payload } => {
                self.complete(&id, Ok(payload.unwrap_or(Value::Null)));
            }
            ServerFrame::Error { id: Some(id), error } => {
                self.complete(&id, Err(TransportError::Remote { code: error.code, message: error.message }));
            }
            ServerFrame::Error { id: None, error } => {
                warn!(server_id = %self.config.id, code = %error.code, message = %error.message, "server error");
            }
            ServerFrame::Capabilities { tools } => {
                info!(server_id = %self.config.id, tool_count = tools.len(), "tools re-advertised");
                self.tools.send_replace(Arc::new(tools));
            }
            ServerFrame::Ping => {
                if conn.outbound.send(ClientFrame::Pong.encode()).await.is_err() {
                    return FrameOutcome::Dropped;
                }
            }
            ServerFrame::Pong => return FrameOutcome::Pong,
        }
        FrameOutcome::Continue
    }

    fn complete(&mut self, id: &str, result: Result<Value, TransportError>) {
        let entry = RequestId::parse(id).and_then(|rid| self.pending.remove(&rid));
        match entry {
            Some(reply) => {
                // The caller may have given up in the meantime.
                let _ = reply.send(result);
            }
            None => debug!(server_id = %self.config.id, request_id = %id, "response for unknown request dropped"),
        }
    }

    /// Reconnect with backoff. `Err` carries the close acknowledgement when
    /// the session should stop instead.
    async fn reconnect(&mut self) -> Result<Connection, Option<oneshot::Sender<()>>> {
        let backoff = self.config.backoff.clone();
        for attempt in 0..backoff.max_attempts {
            let delay = backoff.delay_for(attempt);
            debug!(server_id = %self.config.id, attempt, ?delay, "reconnect scheduled");
            self.serve_while(tokio::time::sleep(delay)).await?;

            self.set_state(SessionState::Connecting);
            let config = self.config.clone();
            let connector = self.connector.clone();
            let established = self
                .serve_while(async move { establish(&config, connector.as_ref()).await })
                .await?;

            match established {
                Ok((conn, tools)) => {
                    info!(server_id = %self.config.id, attempt, tool_count = tools.len(), "session reconnected");
                    self.tools.send_replace(Arc::new(tools));
                    self.set_state(SessionState::Open);
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(server_id = %self.config.id, attempt, error = %e, "reconnect failed");
                    self.set_state(SessionState::Degraded);
                }
            }
        }

        warn!(
            server_id = %self.config.id,
            attempts = backoff.max_attempts,
            "reconnect attempts exhausted"
        );
        Err(None)
    }

    /// Run `fut` to completion while refusing requests. `Err` if the session
    /// was closed meanwhile.
    async fn serve_while<F: Future>(&mut self, fut: F) -> Result<F::Output, Option<oneshot::Sender<()>>> {
        let mut fut = pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return Ok(out),
                command = self.commands.recv() => match command {
                    None => return Err(None),
                    Some(Command::Close { done }) => return Err(Some(done)),
                    Some(Command::Call { reply, .. }) => {
                        let _ = reply.send(Err(TransportError::NotConnected));
                    }
                    Some(Command::Cancel { .. }) | Some(Command::Forget { .. }) => {}
                },
            }
        }
    }

    fn fail_all(&mut self, error: TransportError) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(error.clone()));
        }
    }

    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(server_id = %self.config.id, from = ?current, to = ?next, "session state");
            *current = next;
            true
        });
    }
}

enum FrameOutcome {
    Continue,
    Pong,
    Dropped,
}
