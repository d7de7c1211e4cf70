//! In-flight command relay table
//!
//! Maps a forwarded command's request id to the connection that issued it,
//! so the target's reply can be routed back. Entries are removed the first
//! time they are claimed; a late duplicate reply finds nothing and is
//! discarded. Requesters enforce their own deadlines, so the broker only
//! sweeps abandoned entries to bound memory.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::registry::ConnId;

/// How long a relay entry may sit unanswered before the sweeper drops it.
/// Well past any requester deadline, so a sweep never races a live reply.
pub const RELAY_TTL: Duration = Duration::from_secs(60);

struct RelayEntry {
    requester: ConnId,
    project: String,
    expires_at: Instant,
}

/// Table of commands forwarded to targets and awaiting replies
#[derive(Default)]
pub struct PendingRelay {
    entries: DashMap<String, RelayEntry>,
}

impl PendingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `requester` is waiting on the command with this id
    pub fn insert(&self, id: &str, requester: ConnId, project: &str) {
        self.entries.insert(
            id.to_string(),
            RelayEntry {
                requester,
                project: project.to_string(),
                expires_at: Instant::now() + RELAY_TTL,
            },
        );
    }

    /// Claim the entry for a reply, removing it
    ///
    /// Returns the requester and project, or `None` if the id is unknown
    /// or was already claimed.
    pub fn take(&self, id: &str) -> Option<(ConnId, String)> {
        self.entries
            .remove(id)
            .map(|(_, entry)| (entry.requester, entry.project))
    }

    /// Drop every entry issued by a now-disconnected requester
    pub fn drop_for_requester(&self, requester: ConnId) {
        self.entries.retain(|_, entry| entry.requester != requester);
    }

    /// Remove entries that outlived [`RELAY_TTL`], returning how many
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Swept {} abandoned relay entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PendingRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRelay")
            .field("len", &self.entries.len())
            .finish()
    }
}
