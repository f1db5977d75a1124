//! # conduit-session
//!
//! Long-lived, duplex sessions to capability servers.
//!
//! A [`Session`] handshakes once on open, then correlates pipelined requests
//! with their responses, enforces per-request deadlines, keeps the
//! connection alive with pings, and reconnects with exponential backoff when
//! the connection drops. It implements
//! [`ToolChannel`](conduit_core::traits::ToolChannel) so the dispatcher can
//! use it directly.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use conduit_session::{Session, SchemeConnector};
//!
//! let session = Session::open(server_config, Arc::new(SchemeConnector::new())).await?;
//! let payload = session.send(&request).await?;
//! ```

pub mod connector;
pub mod memory;
pub mod session;

pub use connector::{Connection, Connector, SchemeConnector, WsConnector};
pub use memory::{MemoryConnector, MemoryListener, ServerEnd};
pub use session::{Session, SessionState};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use conduit_contracts::{
        config::{BackoffConfig, ServerConfig},
        error::{ConduitError, TransportError},
        invocation::InvocationRequest,
        tool::{SideEffectClass, ToolAdvert},
        wire::{ClientFrame, ServerFrame, WireError},
    };
    use conduit_core::traits::ToolChannel;

    use super::{MemoryConnector, MemoryListener, ServerEnd, Session, SessionState};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn config(name: &str) -> ServerConfig {
        let mut config = ServerConfig::new(name, format!("memory://{name}"));
        config.connect_timeout_ms = 500;
        config.handshake_timeout_ms = 500;
        config.backoff = BackoffConfig { initial_ms: 10, max_ms: 100, multiplier: 2.0, max_attempts: 3 };
        config
    }

    fn adverts(names: &[&str]) -> Vec<ToolAdvert> {
        names
            .iter()
            .map(|name| ToolAdvert {
                name: name.to_string(),
                schema: json!({ "type": "object" }),
                side_effect_class: SideEffectClass::Read,
                requires_confirmation: false,
            })
            .collect()
    }

    fn request(tool: &str, budget: Duration) -> InvocationRequest {
        InvocationRequest::new(tool, json!({}), budget)
    }

    async fn accept_with_tools(listener: &mut MemoryListener, tools: Vec<ToolAdvert>) -> ServerEnd {
        let end = listener.accept().await.expect("listener closed");
        assert!(end.send_frame(&ServerFrame::Capabilities { tools }).await);
        end
    }

    /// Open a session against an in-process server that advertises `tools`.
    async fn open_pair(config: ServerConfig, tools: &[&str]) -> (Arc<Session>, ServerEnd, MemoryListener) {
        let memory = Arc::new(MemoryConnector::new());
        let name = config.url.trim_start_matches("memory://").to_string();
        let mut listener = memory.bind(name);
        let (session, end) = tokio::join!(
            Session::open(config, memory.clone()),
            accept_with_tools(&mut listener, adverts(tools)),
        );
        (Arc::new(session.expect("session should open")), end, listener)
    }

    fn call_id(frame: ClientFrame) -> (String, String) {
        match frame {
            ClientFrame::ToolCall { id, tool, .. } => (id, tool),
            other => panic!("expected ToolCall, got {:?}", other),
        }
    }

    // ── Handshake ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn open_publishes_advertised_tools() {
        let (session, _server, _listener) = open_pair(config("fs"), &["read_file", "list_dir"]).await;
        assert_eq!(session.state(), SessionState::Open);
        let names: Vec<String> = session.tools().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["read_file".to_string(), "list_dir".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_fails_handshake_with_connect_error() {
        let memory = Arc::new(MemoryConnector::new());
        let mut listener = memory.bind("mute");
        let (result, _end) = tokio::join!(Session::open(config("mute"), memory.clone()), listener.accept());
        assert!(matches!(result, Err(ConduitError::Connect { .. })));
    }

    #[tokio::test]
    async fn nothing_listening_is_connect_error() {
        let memory = Arc::new(MemoryConnector::new());
        let result = Session::open(config("nobody"), memory).await;
        assert!(matches!(result, Err(ConduitError::Connect { .. })));
    }

    // ── Correlation ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn pipelined_responses_resolve_out_of_order() {
        let (session, mut server, _listener) = open_pair(config("fs"), &["a", "b"]).await;

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.send(&request("a", Duration::from_secs(5))).await })
        };
        let second = {
            let channel: Arc<dyn ToolChannel> = session.clone();
            tokio::spawn(async move {
                channel
                    .call(&request("b", Duration::from_secs(5)), CancellationToken::new())
                    .await
            })
        };

        let mut calls = vec![
            call_id(server.recv_frame().await.unwrap()),
            call_id(server.recv_frame().await.unwrap()),
        ];
        calls.reverse();
        for (id, tool) in calls {
            let frame = ServerFrame::ToolResult { id, payload: Some(json!({ "echo": tool })) };
            assert!(server.send_frame(&frame).await);
        }

        assert_eq!(first.await.unwrap().unwrap(), json!({ "echo": "a" }));
        assert_eq!(second.await.unwrap().unwrap(), json!({ "echo": "b" }));
    }

    #[tokio::test]
    async fn error_frame_is_remote_error() {
        let (session, mut server, _listener) = open_pair(config("fs"), &["read_file"]).await;
        let call = {
            let session = session.clone();
            tokio::spawn(async move { session.send(&request("read_file", Duration::from_secs(5))).await })
        };
        let (id, _) = call_id(server.recv_frame().await.unwrap());
        let error = WireError { code: "ENOENT".into(), message: "no such file".into() };
        server.send_frame(&ServerFrame::Error { id: Some(id), error }).await;

        assert_eq!(
            call.await.unwrap(),
            Err(TransportError::Remote { code: "ENOENT".into(), message: "no such file".into() })
        );
    }

    /// A fired deadline removes the pending entry; the late answer is dropped
    /// and the session keeps working.
    #[tokio::test(start_paused = true)]
    async fn deadline_times_out_and_late_reply_is_dropped() {
        let (session, mut server, _listener) = open_pair(config("fs"), &["slow", "fast"]).await;

        let result = session.send(&request("slow", Duration::from_secs(1))).await;
        assert_eq!(result, Err(TransportError::Timeout));

        let (late_id, _) = call_id(server.recv_frame().await.unwrap());
        server
            .send_frame(&ServerFrame::ToolResult { id: late_id, payload: Some(json!("late")) })
            .await;

        let call = {
            let session = session.clone();
            tokio::spawn(async move { session.send(&request("fast", Duration::from_secs(5))).await })
        };
        let (id, _) = call_id(server.recv_frame().await.unwrap());
        server.send_frame(&ServerFrame::ToolResult { id, payload: Some(json!("ok")) }).await;

        assert_eq!(call.await.unwrap(), Ok(json!("ok")));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn cancel_resolves_caller_and_notifies_server() {
        let (session, mut server, _listener) = open_pair(config("fs"), &["copy"]).await;
        let token = CancellationToken::new();
        let call = {
            let session = session.clone();
            let token = token.clone();
            tokio::spawn(async move {
                session
                    .send_with_cancel(&request("copy", Duration::from_secs(30)), token)
                    .await
            })
        };

        let (id, _) = call_id(server.recv_frame().await.unwrap());
        token.cancel();
        assert_eq!(call.await.unwrap(), Err(TransportError::Cancelled));
        assert_eq!(server.recv_frame().await.unwrap(), ClientFrame::Cancel { id });
    }

    // ── Connection health ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn drop_fails_pending_then_reconnects() {
        let (session, mut server, mut listener) = open_pair(config("fs"), &["read_file"]).await;
        let mut state = session.subscribe_state();

        let call = {
            let session = session.clone();
            tokio::spawn(async move { session.send(&request("read_file", Duration::from_secs(5))).await })
        };
        server.recv_frame().await.unwrap();
        drop(server);

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err, TransportError::ConnectionLost);
        assert!(err.is_retryable());

        // Requests are refused until the session is back.
        assert_eq!(
            session.send(&request("read_file", Duration::from_secs(5))).await,
            Err(TransportError::NotConnected)
        );

        let _server = accept_with_tools(&mut listener, adverts(&["read_file", "stat"])).await;
        state.wait_for(|s| *s == SessionState::Open).await.unwrap();
        let names: Vec<String> = session.tools().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["read_file".to_string(), "stat".to_string()]);
    }

    #[tokio::test]
    async fn exhausted_reconnects_close_the_session() {
        let (session, server, listener) = open_pair(config("fs"), &["read_file"]).await;
        let mut state = session.subscribe_state();
        drop(listener);
        drop(server);

        state.wait_for(|s| *s == SessionState::Closed).await.unwrap();
        assert_eq!(
            session.send(&request("read_file", Duration::from_secs(5))).await,
            Err(TransportError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missed_pongs_degrade_the_session() {
        let mut config = config("fs");
        config.heartbeat_interval_ms = 1_000;
        config.max_missed_pongs = 2;
        let (session, _server, _listener) = open_pair(config, &["read_file"]).await;

        let mut state = session.subscribe_state();
        state.wait_for(|s| *s != SessionState::Open).await.unwrap();
        assert_ne!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn malformed_frame_degrades_until_next_good_frame() {
        let (session, server, _listener) = open_pair(config("fs"), &["read_file"]).await;
        let mut state = session.subscribe_state();

        server.send_raw("{ this is not json").await;
        state.wait_for(|s| *s == SessionState::Degraded).await.unwrap();
        assert_eq!(
            session.send(&request("read_file", Duration::from_secs(5))).await,
            Err(TransportError::NotConnected)
        );

        server.send_frame(&ServerFrame::Pong).await;
        state.wait_for(|s| *s == SessionState::Open).await.unwrap();
    }

    #[tokio::test]
    async fn server_ping_is_answered() {
        let (_session, mut server, _listener) = open_pair(config("fs"), &["read_file"]).await;
        server.send_frame(&ServerFrame::Ping).await;
        assert_eq!(server.recv_frame().await.unwrap(), ClientFrame::Pong);
    }

    #[tokio::test]
    async fn close_fails_pending_with_closed() {
        let (session, mut server, _listener) = open_pair(config("fs"), &["read_file"]).await;
        let call = {
            let session = session.clone();
            tokio::spawn(async move { session.send(&request("read_file", Duration::from_secs(5))).await })
        };
        server.recv_frame().await.unwrap();

        session.close().await;
        assert_eq!(call.await.unwrap(), Err(TransportError::Closed));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            session.send(&request("read_file", Duration::from_secs(5))).await,
            Err(TransportError::Closed)
        );
    }
}
