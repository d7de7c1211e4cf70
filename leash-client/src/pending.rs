//! Outstanding-request tracking
//!
//! Each in-flight command owns one entry keyed by request id. The driver
//! task resolves entries as responses arrive; the requesting task removes
//! its own entry when its deadline fires. Whoever removes the entry first
//! decides the outcome, so a request resolves exactly once.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use leash_protocol::ResponseEnvelope;

/// Shared map of requests awaiting a response
#[derive(Clone, Default)]
pub(crate) struct PendingCommands {
    entries: Arc<DashMap<String, oneshot::Sender<ResponseEnvelope>>>,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request id and get the channel its response will arrive on
    pub fn register(&self, id: &str) -> oneshot::Receiver<ResponseEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id.to_string(), tx);
        rx
    }

    /// Resolve the request matching this response, if it is still waiting
    ///
    /// Returns false when the id matches nothing, which happens when the
    /// requester already gave up on its deadline.
    pub fn complete(&self, response: ResponseEnvelope) -> bool {
        match self.entries.remove(&response.id) {
            Some((id, tx)) => {
                if tx.send(response).is_err() {
                    debug!("Requester for {} stopped listening", id);
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// Withdraw a request, keeping any late response from resolving it
    ///
    /// Returns false when a response already claimed the entry.
    pub fn forget(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Drop every entry, waking all waiting requesters with a closed channel
    pub fn fail_all(&self) {
        let count = self.entries.len();
        if count > 0 {
            debug!("Failing {} outstanding request(s)", count);
        }
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl std::fmt::Debug for PendingCommands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCommands")
            .field("outstanding", &self.entries.len())
            .finish()
    }
}
