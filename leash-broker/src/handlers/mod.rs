//! Message handlers for connected parties
//!
//! Routes each incoming `ClientMessage` to the appropriate handler. Role
//! separation falls out of registry state rather than explicit checks: a
//! connection that never registered as a target has no project, so its
//! responses and logs are discarded, while any connection may issue
//! commands.

mod agent;
mod target;

use std::sync::Arc;

use tracing::warn;

use leash_protocol::{ClientMessage, ServerMessage};

use crate::pending::PendingRelay;
use crate::registry::{ConnId, ConnRegistry};

/// Context for message handlers
///
/// Provides access to the broker state needed to route one connection's
/// messages.
pub struct HandlerContext {
    /// Connection registry for routing and fan-out
    pub registry: Arc<ConnRegistry>,
    /// In-flight command relay table
    pub pending: Arc<PendingRelay>,
    /// The connection the message arrived on
    pub conn_id: ConnId,
}

/// Result of handling a message
pub enum HandlerResult {
    /// Single reply to send back on the same connection
    Response(ServerMessage),
    /// Nothing to send; routing and fan-out happen through the registry
    NoResponse,
}

impl HandlerContext {
    pub fn new(registry: Arc<ConnRegistry>, pending: Arc<PendingRelay>, conn_id: ConnId) -> Self {
        Self {
            registry,
            pending,
            conn_id,
        }
    }

    /// Route a message to the appropriate handler
    pub async fn route_message(&self, msg: ClientMessage) -> HandlerResult {
        match msg {
            ClientMessage::Hello { .. } => {
                warn!("Connection {} sent Hello after handshake, ignoring", self.conn_id);
                HandlerResult::NoResponse
            }

            ClientMessage::Ping => HandlerResult::Response(ServerMessage::Pong),

            // Requester-side messages
            ClientMessage::Command { command } => self.handle_command(command).await,
            ClientMessage::ListTargets { id } => self.handle_list_targets(id),

            // Target-side messages
            ClientMessage::Response { response } => self.handle_response(response).await,
            ClientMessage::Logs { entries } => self.handle_logs(entries).await,
            ClientMessage::DeviceInfo { device } => self.handle_device_info(device),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::mpsc;

    /// Register a connection and build a handler context for it
    pub(crate) fn connect(
        registry: &Arc<ConnRegistry>,
        pending: &Arc<PendingRelay>,
    ) -> (HandlerContext, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(32);
        let conn_id = registry.register_conn(tx);
        let ctx = HandlerContext::new(Arc::clone(registry), Arc::clone(pending), conn_id);
        (ctx, rx)
    }

    pub(crate) fn fresh_state() -> (Arc<ConnRegistry>, Arc<PendingRelay>) {
        (
            Arc::new(ConnRegistry::new()),
            Arc::new(PendingRelay::new()),
        )
    }
}
