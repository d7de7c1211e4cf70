//! Broker connection and command multiplexing
//!
//! One spawned driver task owns the socket. Callers queue frames through a
//! channel and park on a per-request oneshot until the driver resolves it
//! with the matching response. Requests are correlated by id, so replies
//! may arrive in any order relative to submission.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use leash_hierarchy::HierarchyNode;
use leash_protocol::{
    new_request_id, Action, ClientCodec, ClientMessage, CommandEnvelope, Direction, ErrorCode,
    LogRecord, ResponseBody, ResponseEnvelope, ResponsePayload, Role, ServerMessage, TargetInfo,
    Velocity, DEFAULT_LONG_PRESS_MS, DEFAULT_PORT, DEFAULT_SCROLL_AMOUNT, PROTOCOL_VERSION,
};
use leash_utils::{load_runtime_config, LeashError, Result};

use crate::logs::LogRouter;
use crate::pending::PendingCommands;

/// Deadline for one command round trip unless the caller picks another
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the broker may take to answer the registration handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outgoing queue depth
const CHANNEL_CAPACITY: usize = 100;

/// Where and how to reach the broker
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    /// Shared secret; required when the broker was started with one
    pub token: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            token: None,
        }
    }
}

impl ConnectOptions {
    /// Read the connection details a locally running broker recorded at
    /// startup
    ///
    /// Returns `None` when no broker has written a runtime file.
    pub fn from_runtime() -> Result<Option<Self>> {
        Ok(load_runtime_config()?.map(|runtime| Self {
            host: runtime.host,
            port: runtime.port,
            token: runtime.token,
        }))
    }
}

pub(crate) struct ClientInner {
    pub(crate) outgoing: mpsc::Sender<ClientMessage>,
    pub(crate) pending: PendingCommands,
    pub(crate) logs: LogRouter,
    pub(crate) connected: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one broker connection
///
/// Cheap to clone; every clone shares the connection and may issue
/// commands concurrently.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl Client {
    /// Connect to the broker and register as an agent
    ///
    /// Fails with [`LeashError::ConnectionRefused`] when the broker is
    /// unreachable or rejects the handshake.
    pub async fn connect(options: ConnectOptions) -> Result<Self> {
        let addr = format!("{}:{}", options.host, options.port);
        let stream = TcpStream::connect(&addr).await.map_err(|e| {
            LeashError::connection_refused(format!("failed to reach broker at {addr}: {e}"))
        })?;
        let mut framed = Framed::new(stream, ClientCodec::new());

        framed
            .send(ClientMessage::Hello {
                role: Role::Agent,
                project: None,
                token: options.token,
                protocol_version: PROTOCOL_VERSION,
            })
            .await
            .map_err(|e| LeashError::connection_refused(format!("handshake send failed: {e}")))?;

        match timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
            Ok(Some(Ok(ServerMessage::Welcome { protocol_version }))) => {
                debug!("Connected to broker at {} (protocol {})", addr, protocol_version);
            }
            Ok(Some(Ok(ServerMessage::Error { code, message }))) => {
                return Err(LeashError::connection_refused(format!(
                    "broker refused registration ({code:?}): {message}"
                )));
            }
            Ok(Some(Ok(other))) => {
                return Err(LeashError::protocol(format!(
                    "unexpected handshake reply: {other:?}"
                )));
            }
            Ok(Some(Err(e))) => {
                return Err(LeashError::connection_refused(format!(
                    "handshake failed: {e}"
                )));
            }
            Ok(None) => {
                return Err(LeashError::connection_refused(
                    "broker closed the connection during handshake",
                ));
            }
            Err(_) => return Err(LeashError::connection_refused("handshake timed out")),
        }

        let (outgoing_tx, outgoing_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let pending = PendingCommands::new();
        let logs = LogRouter::new();
        let connected = Arc::new(AtomicBool::new(true));

        let driver = tokio::spawn(drive_connection(
            framed,
            outgoing_rx,
            pending.clone(),
            logs.clone(),
            Arc::clone(&connected),
        ));

        Ok(Self {
            inner: Arc::new(ClientInner {
                outgoing: outgoing_tx,
                pending,
                logs,
                connected,
                driver: Mutex::new(Some(driver)),
            }),
        })
    }

    /// Connect using the runtime file of a locally running broker
    pub async fn connect_local() -> Result<Self> {
        let options = ConnectOptions::from_runtime()?.ok_or_else(|| {
            LeashError::connection_refused("no broker runtime file found; is the broker running?")
        })?;
        Self::connect(options).await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Send one command and wait for its reply
    pub async fn send_command(
        &self,
        project: &str,
        action: Action,
    ) -> Result<Option<ResponsePayload>> {
        self.send_command_with_timeout(project, action, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    /// Send one command with an explicit deadline
    ///
    /// The deadline is fixed at submission. A reply that loses the race
    /// against it can no longer resolve the request; the command fails
    /// with [`LeashError::CommandTimedOut`] and the late reply is dropped.
    pub async fn send_command_with_timeout(
        &self,
        project: &str,
        action: Action,
        deadline: Duration,
    ) -> Result<Option<ResponsePayload>> {
        if !self.is_connected() {
            return Err(LeashError::ConnectionClosed);
        }

        let action_name = action.name();
        let command = CommandEnvelope::new(project, action);
        let id = command.id.clone();

        // Register before transmitting so even an instant reply finds its
        // entry
        let rx = self.inner.pending.register(&id);

        if self
            .inner
            .outgoing
            .send(ClientMessage::Command { command })
            .await
            .is_err()
        {
            self.inner.pending.forget(&id);
            return Err(LeashError::ConnectionClosed);
        }

        let response = self.await_reply(rx, &id, action_name, deadline).await?;
        unpack_response(project, response)
    }

    /// Park on `rx` until the response arrives or `deadline` passes
    async fn await_reply(
        &self,
        rx: oneshot::Receiver<ResponseEnvelope>,
        id: &str,
        what: &str,
        deadline: Duration,
    ) -> Result<ResponseEnvelope> {
        match timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            // The driver failed the request when the connection went away
            Ok(Err(_)) => Err(LeashError::ConnectionClosed),
            Err(_) => {
                self.inner.pending.forget(id);
                Err(LeashError::command_timed_out(
                    what,
                    deadline.as_millis() as u64,
                ))
            }
        }
    }

    // ==================== Target primitives ====================

    /// Tap the element with the given testID
    pub async fn tap(&self, project: &str, test_id: &str) -> Result<()> {
        self.send_command(
            project,
            Action::Tap {
                test_id: test_id.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    /// Replace the text of an input element
    pub async fn input(&self, project: &str, test_id: &str, value: &str) -> Result<()> {
        self.send_command(
            project,
            Action::Input {
                test_id: test_id.to_string(),
                value: value.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    /// Scroll a container; `None` scrolls by the target's default amount
    pub async fn scroll(
        &self,
        project: &str,
        test_id: &str,
        direction: Direction,
        amount: Option<f64>,
    ) -> Result<()> {
        self.send_command(
            project,
            Action::Scroll {
                test_id: test_id.to_string(),
                direction,
                amount: amount.unwrap_or(DEFAULT_SCROLL_AMOUNT),
            },
        )
        .await?;
        Ok(())
    }

    /// Swipe across an element; `None` swipes at medium velocity
    pub async fn swipe(
        &self,
        project: &str,
        test_id: &str,
        direction: Direction,
        velocity: Option<Velocity>,
    ) -> Result<()> {
        self.send_command(
            project,
            Action::Swipe {
                test_id: test_id.to_string(),
                direction,
                velocity: velocity.unwrap_or_default(),
            },
        )
        .await?;
        Ok(())
    }

    /// Press and hold an element; `None` holds for the target's default
    pub async fn long_press(
        &self,
        project: &str,
        test_id: &str,
        duration_ms: Option<u64>,
    ) -> Result<()> {
        self.send_command(
            project,
            Action::LongPress {
                test_id: test_id.to_string(),
                duration_ms: duration_ms.unwrap_or(DEFAULT_LONG_PRESS_MS),
            },
        )
        .await?;
        Ok(())
    }

    /// Snapshot the target's current UI tree
    pub async fn get_view_hierarchy(&self, project: &str) -> Result<HierarchyNode> {
        match self.send_command(project, Action::GetViewHierarchy).await? {
            Some(ResponsePayload::Hierarchy { hierarchy }) => Ok(hierarchy),
            other => Err(LeashError::protocol(format!(
                "expected hierarchy payload, got {}",
                payload_kind(&other)
            ))),
        }
    }

    /// Deliver an opaque payload to the application's deep-link handler
    pub async fn agent_link(&self, project: &str, payload: &str) -> Result<()> {
        self.send_command(
            project,
            Action::AgentLink {
                payload: payload.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    /// Fetch the target's buffered console output
    pub async fn get_logs(&self, project: &str) -> Result<Vec<LogRecord>> {
        match self.send_command(project, Action::GetConsoleLogs).await? {
            Some(ResponsePayload::Logs { logs }) => Ok(logs),
            // A target with nothing buffered may answer with a bare ok
            None => Ok(Vec::new()),
            Some(other) => Err(LeashError::protocol(format!(
                "expected logs payload, got {}",
                payload_kind(&Some(other))
            ))),
        }
    }

    /// List the targets currently registered with the broker
    pub async fn list_targets(&self) -> Result<Vec<TargetInfo>> {
        if !self.is_connected() {
            return Err(LeashError::ConnectionClosed);
        }

        let id = new_request_id();
        let rx = self.inner.pending.register(&id);

        if self
            .inner
            .outgoing
            .send(ClientMessage::ListTargets { id: id.clone() })
            .await
            .is_err()
        {
            self.inner.pending.forget(&id);
            return Err(LeashError::ConnectionClosed);
        }

        let response = self
            .await_reply(rx, &id, "listTargets", DEFAULT_COMMAND_TIMEOUT)
            .await?;
        match response.body {
            ResponseBody::Ok {
                payload: Some(ResponsePayload::Targets { targets }),
            } => Ok(targets),
            ResponseBody::Ok { payload } => Err(LeashError::protocol(format!(
                "expected targets payload, got {}",
                payload_kind(&payload)
            ))),
            ResponseBody::Error { error, .. } => Err(LeashError::target(error)),
        }
    }

    /// Tear the connection down
    ///
    /// Every command still outstanding fails with
    /// [`LeashError::ConnectionClosed`] before this returns. Safe to call
    /// more than once.
    pub async fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);

        if let Some(driver) = self.inner.driver.lock().await.take() {
            driver.abort();
        }

        self.inner.pending.fail_all();
        self.inner.logs.close_all();
        debug!("Disconnected from broker");
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.is_connected())
            .field("pending", &self.inner.pending)
            .finish()
    }
}

/// Pump the socket: write queued frames, dispatch arriving ones
///
/// Runs until the broker closes the connection, the socket fails, or every
/// [`Client`] handle is gone. Whatever the cause, outstanding requests and
/// log subscriptions are failed on the way out.
async fn drive_connection(
    framed: Framed<TcpStream, ClientCodec>,
    mut outgoing_rx: mpsc::Receiver<ClientMessage>,
    pending: PendingCommands,
    logs: LogRouter,
    connected: Arc<AtomicBool>,
) {
    let (mut sink, mut stream) = framed.split();

    loop {
        tokio::select! {
            queued = outgoing_rx.recv() => {
                match queued {
                    Some(msg) => {
                        if let Err(e) = sink.send(msg).await {
                            debug!("Write to broker failed: {}", e);
                            break;
                        }
                    }
                    // Every sender is gone; the client was dropped
                    None => break,
                }
            }

            arrived = stream.next() => {
                match arrived {
                    Some(Ok(ServerMessage::Response { response })) => {
                        let id = response.id.clone();
                        if !pending.complete(response) {
                            debug!("Response {} matches no outstanding request", id);
                        }
                    }
                    Some(Ok(ServerMessage::Log { event })) => {
                        logs.publish(event);
                    }
                    Some(Ok(ServerMessage::Pong)) => {}
                    Some(Ok(ServerMessage::Error { code, message })) => {
                        warn!("Broker reported an error ({:?}): {}", code, message);
                    }
                    Some(Ok(other)) => {
                        debug!("Ignoring unexpected frame from broker: {:?}", other);
                    }
                    Some(Err(e)) => {
                        warn!("Broker connection failed: {}", e);
                        break;
                    }
                    None => {
                        debug!("Broker closed the connection");
                        break;
                    }
                }
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    pending.fail_all();
    logs.close_all();
}

fn unpack_response(project: &str, response: ResponseEnvelope) -> Result<Option<ResponsePayload>> {
    match response.body {
        ResponseBody::Ok { payload } => Ok(payload),
        ResponseBody::Error {
            error,
            code,
            known_projects,
        } => match code {
            Some(ErrorCode::NoTargetConnected) => {
                Err(LeashError::no_target(project, known_projects))
            }
            _ => Err(LeashError::target(error)),
        },
    }
}

fn payload_kind(payload: &Option<ResponsePayload>) -> &'static str {
    match payload {
        None => "none",
        Some(ResponsePayload::Hierarchy { .. }) => "hierarchy",
        Some(ResponsePayload::Logs { .. }) => "logs",
        Some(ResponsePayload::Targets { .. }) => "targets",
        Some(ResponsePayload::Value { .. }) => "value",
    }
}
