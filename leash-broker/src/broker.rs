//! TCP listener and connection lifecycle
//!
//! One task per connection. After the handshake the connection's frames are
//! routed through [`HandlerContext`]; messages addressed to it by other
//! connections arrive over its registry channel and are written by the same
//! task.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use leash_protocol::{
    ClientMessage, CodecError, ErrorCode, Role, ServerCodec, ServerMessage, PROTOCOL_VERSION,
};
use leash_utils::{LeashError, Result};

use crate::config::BrokerConfig;
use crate::handlers::{HandlerContext, HandlerResult};
use crate::pending::PendingRelay;
use crate::registry::ConnRegistry;

/// How long a connection may take to complete its handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outgoing queue depth per connection
const CHANNEL_CAPACITY: usize = 100;

/// Interval between sweeps of abandoned relay entries
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Broker state shared by every connection task
pub struct Broker {
    addr: String,
    token: Option<String>,
    registry: Arc<ConnRegistry>,
    pending: Arc<PendingRelay>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Broker {
    pub fn new(config: &BrokerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            addr: config.addr(),
            token: config.token.clone(),
            registry: Arc::new(ConnRegistry::new()),
            pending: Arc::new(PendingRelay::new()),
            shutdown_tx,
        }
    }

    /// Bind the listener
    ///
    /// The returned listener reports the actual port when the configured
    /// port was 0.
    pub async fn listen(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.addr).await.map_err(|e| {
            LeashError::connection_refused(format!("failed to bind {}: {}", self.addr, e))
        })
    }

    /// Signal every task spawned by [`Broker::serve`] to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the accept loop until shutdown
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        // Sweep abandoned relay entries in the background
        let sweeper = {
            let pending = Arc::clone(&self.pending);
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            pending.sweep();
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            })
        };

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!("New connection from {}", peer_addr);
                            let broker = Arc::clone(&self);
                            tokio::spawn(async move {
                                broker.handle_connection(stream).await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        sweeper.abort();
    }

    /// Run the registration handshake
    ///
    /// Refusals send a coded error frame and return `None`, which closes
    /// the connection.
    async fn handshake(
        &self,
        framed: &mut Framed<TcpStream, ServerCodec>,
    ) -> Option<(Role, Option<String>)> {
        let first = match timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                debug!("Unreadable handshake frame: {}", e);
                let _ = framed
                    .send(ServerMessage::Error {
                        code: ErrorCode::BadEnvelope,
                        message: format!("unreadable handshake frame: {e}"),
                    })
                    .await;
                return None;
            }
            Ok(None) => return None,
            Err(_) => {
                debug!("Handshake timed out");
                return None;
            }
        };

        let ClientMessage::Hello {
            role,
            project,
            token,
            protocol_version,
        } = first
        else {
            let _ = framed
                .send(ServerMessage::Error {
                    code: ErrorCode::BadEnvelope,
                    message: "first frame must be hello".to_string(),
                })
                .await;
            return None;
        };

        if protocol_version != PROTOCOL_VERSION {
            let _ = framed
                .send(ServerMessage::Error {
                    code: ErrorCode::ProtocolMismatch,
                    message: format!(
                        "protocol version {} not supported (broker speaks {})",
                        protocol_version, PROTOCOL_VERSION
                    ),
                })
                .await;
            return None;
        }

        if let Some(expected) = &self.token {
            if token.as_deref() != Some(expected.as_str()) {
                warn!("Rejecting {} connection with invalid token", role);
                let _ = framed
                    .send(ServerMessage::Error {
                        code: ErrorCode::AuthFailed,
                        message: "invalid or missing token".to_string(),
                    })
                    .await;
                return None;
            }
        }

        let project = match (role, project) {
            (Role::Target, Some(project)) if !project.is_empty() => Some(project),
            (Role::Target, _) => {
                let _ = framed
                    .send(ServerMessage::Error {
                        code: ErrorCode::BadEnvelope,
                        message: "target hello requires a project".to_string(),
                    })
                    .await;
                return None;
            }
            (Role::Agent, project) => project,
        };

        Some((role, project))
    }

    /// Serve one connection from handshake to teardown
    async fn handle_connection(self: Arc<Self>, stream: TcpStream) {
        let mut framed = Framed::new(stream, ServerCodec::new());

        let Some((role, project)) = self.handshake(&mut framed).await else {
            return;
        };

        let (tx, mut outgoing_rx) = mpsc::channel::<ServerMessage>(CHANNEL_CAPACITY);
        let conn_id = self.registry.register_conn(tx);

        if let (Role::Target, Some(project)) = (role, project.as_deref()) {
            match self.registry.register_target(conn_id, project) {
                Some(superseded) => info!(
                    "Target for '{}' registered as {}, superseding {}",
                    project, conn_id, superseded
                ),
                None => info!("Target for '{}' registered as {}", project, conn_id),
            }
        } else {
            debug!("Agent registered as {}", conn_id);
        }

        // Welcome goes out only after registration, so a peer that has seen
        // it is already routable
        if framed
            .send(ServerMessage::Welcome {
                protocol_version: PROTOCOL_VERSION,
            })
            .await
            .is_err()
        {
            self.registry.unregister_conn(conn_id);
            return;
        }

        let ctx = HandlerContext::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.pending),
            conn_id,
        );
        let (mut sink, mut stream) = framed.split();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                // Messages routed to this connection by other tasks
                Some(msg) = outgoing_rx.recv() => {
                    if let Err(e) = sink.send(msg).await {
                        debug!("Failed to write to {}: {}", conn_id, e);
                        break;
                    }
                }

                // Frames arriving from the peer
                result = stream.next() => {
                    match result {
                        Some(Ok(msg)) => {
                            match ctx.route_message(msg).await {
                                HandlerResult::Response(reply) => {
                                    if sink.send(reply).await.is_err() {
                                        break;
                                    }
                                }
                                HandlerResult::NoResponse => {}
                            }
                        }
                        Some(Err(CodecError::Json(e))) => {
                            // The offending line was consumed, framing is intact
                            warn!("Discarding malformed frame from {}: {}", conn_id, e);
                        }
                        Some(Err(e)) => {
                            warn!("Connection {} failed: {}", conn_id, e);
                            break;
                        }
                        None => {
                            debug!("Connection {} closed by peer", conn_id);
                            break;
                        }
                    }
                }

                _ = shutdown_rx.recv() => break,
            }
        }

        self.registry.unregister_conn(conn_id);
        self.pending.drop_for_requester(conn_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leash_protocol::ClientCodec;

    async fn start_broker(token: Option<&str>) -> (Arc<Broker>, std::net::SocketAddr) {
        let config = BrokerConfig {
            port: 0,
            token: token.map(String::from),
            ..Default::default()
        };
        let broker = Arc::new(Broker::new(&config));
        let listener = broker.listen().await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Arc::clone(&broker).serve(listener));
        (broker, addr)
    }

    async fn dial(addr: std::net::SocketAddr) -> Framed<TcpStream, ClientCodec> {
        let stream = TcpStream::connect(addr).await.unwrap();
        Framed::new(stream, ClientCodec::new())
    }

    fn hello(role: Role, project: Option<&str>, token: Option<&str>, version: u32) -> ClientMessage {
        ClientMessage::Hello {
            role,
            project: project.map(String::from),
            token: token.map(String::from),
            protocol_version: version,
        }
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let (broker, _addr) = start_broker(None).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.shutdown();
        // If the accept loop ignored the signal, later tests would hang on
        // the leaked task; nothing further to assert here
    }

    #[tokio::test]
    async fn test_handshake_accepts_valid_hello() {
        let (_broker, addr) = start_broker(None).await;
        let mut conn = dial(addr).await;

        conn.send(hello(Role::Agent, None, None, PROTOCOL_VERSION))
            .await
            .unwrap();

        match conn.next().await.unwrap().unwrap() {
            ServerMessage::Welcome { protocol_version } => {
                assert_eq!(protocol_version, PROTOCOL_VERSION)
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_rejects_version_mismatch() {
        let (_broker, addr) = start_broker(None).await;
        let mut conn = dial(addr).await;

        conn.send(hello(Role::Agent, None, None, 999)).await.unwrap();

        match conn.next().await.unwrap().unwrap() {
            ServerMessage::Error { code, .. } => {
                assert_eq!(code, ErrorCode::ProtocolMismatch)
            }
            other => panic!("unexpected message: {other:?}"),
        }
        // Broker closes after a refusal
        assert!(conn.next().await.is_none());
    }

    #[tokio::test]
    async fn test_handshake_rejects_bad_token() {
        let (_broker, addr) = start_broker(Some("secret")).await;
        let mut conn = dial(addr).await;

        conn.send(hello(Role::Agent, None, Some("wrong"), PROTOCOL_VERSION))
            .await
            .unwrap();

        match conn.next().await.unwrap().unwrap() {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::AuthFailed),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_requires_project_for_targets() {
        let (_broker, addr) = start_broker(None).await;
        let mut conn = dial(addr).await;

        conn.send(hello(Role::Target, None, None, PROTOCOL_VERSION))
            .await
            .unwrap();

        match conn.next().await.unwrap().unwrap() {
            ServerMessage::Error { code, message } => {
                assert_eq!(code, ErrorCode::BadEnvelope);
                assert!(message.contains("project"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_rejects_non_hello_first_frame() {
        let (_broker, addr) = start_broker(None).await;
        let mut conn = dial(addr).await;

        conn.send(ClientMessage::Ping).await.unwrap();

        match conn.next().await.unwrap().unwrap() {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::BadEnvelope),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ping_pong_after_handshake() {
        let (_broker, addr) = start_broker(None).await;
        let mut conn = dial(addr).await;

        conn.send(hello(Role::Agent, None, None, PROTOCOL_VERSION))
            .await
            .unwrap();
        conn.next().await.unwrap().unwrap(); // Welcome

        conn.send(ClientMessage::Ping).await.unwrap();
        match conn.next().await.unwrap().unwrap() {
            ServerMessage::Pong => {}
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
