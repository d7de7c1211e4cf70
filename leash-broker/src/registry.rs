//! Connection registry
//!
//! Tracks every live connection and the target registered for each project,
//! bridging the accept loop with command routing and log fan-out. At most
//! one connection is the active target for a project; a later registration
//! supersedes the earlier one, and routing ignores the superseded
//! connection from then on.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use leash_protocol::{DeviceInfo, LogEvent, ServerMessage, TargetInfo};

/// Unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    /// Create a ConnId from a raw value (mainly for testing)
    #[cfg(test)]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Conn({})", self.0)
    }
}

/// Entry for a live connection
pub struct ConnEntry {
    /// Channel for sending messages to this connection's writer task
    pub sender: mpsc::Sender<ServerMessage>,
    /// Project this connection registered as a target for, if any
    pub project: Option<String>,
}

/// The active target for a project
#[derive(Debug, Clone)]
pub struct TargetEntry {
    pub conn_id: ConnId,
    pub device: Option<DeviceInfo>,
}

/// Registry tracking connections, active targets, and log subscribers
///
/// Thread-safe for concurrent access from all connection handler tasks.
pub struct ConnRegistry {
    /// Connection ID -> connection entry
    conns: DashMap<ConnId, ConnEntry>,
    /// Project -> active target
    targets: DashMap<String, TargetEntry>,
    /// Project -> connections subscribed to its log stream
    log_subscribers: DashMap<String, HashSet<ConnId>>,
    /// Counter for generating unique connection IDs
    next_conn_id: AtomicU64,
}

impl Default for ConnRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnRegistry {
    pub fn new() -> Self {
        Self {
            conns: DashMap::new(),
            targets: DashMap::new(),
            log_subscribers: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    // ==================== Connection Management ====================

    /// Register a new connection, returning its assigned id
    pub fn register_conn(&self, sender: mpsc::Sender<ServerMessage>) -> ConnId {
        let id = ConnId(self.next_conn_id.fetch_add(1, Ordering::SeqCst));

        self.conns.insert(
            id,
            ConnEntry {
                sender,
                project: None,
            },
        );
        debug!("Registered connection {}", id);

        id
    }

    /// Remove a connection and every association it holds
    ///
    /// Clears the active-target slot only if this connection still owns it;
    /// a superseded connection disconnecting leaves the new target alone.
    pub fn unregister_conn(&self, conn_id: ConnId) {
        if let Some((_, entry)) = self.conns.remove(&conn_id) {
            if let Some(project) = entry.project {
                let still_active = self
                    .targets
                    .get(&project)
                    .map(|t| t.conn_id == conn_id)
                    .unwrap_or(false);
                if still_active {
                    self.targets.remove(&project);
                    debug!("Target for project '{}' disconnected", project);
                }
            }

            self.log_subscribers.retain(|_, subs| {
                subs.remove(&conn_id);
                !subs.is_empty()
            });

            debug!("Unregistered connection {}", conn_id);
        }
    }

    /// Number of live connections
    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }

    // ==================== Target Registration ====================

    /// Make `conn_id` the active target for `project`
    ///
    /// Returns the superseded connection's id if a different connection
    /// held the slot. The superseded connection stays open but routing
    /// ignores it from now on.
    pub fn register_target(&self, conn_id: ConnId, project: &str) -> Option<ConnId> {
        if let Some(mut entry) = self.conns.get_mut(&conn_id) {
            entry.project = Some(project.to_string());
        }

        let old = self.targets.insert(
            project.to_string(),
            TargetEntry {
                conn_id,
                device: None,
            },
        );

        match old {
            Some(old) if old.conn_id != conn_id => {
                debug!(
                    "Target for project '{}' superseded: {} -> {}",
                    project, old.conn_id, conn_id
                );
                Some(old.conn_id)
            }
            _ => None,
        }
    }

    /// The project a connection registered under, if any
    pub fn conn_project(&self, conn_id: ConnId) -> Option<String> {
        self.conns.get(&conn_id)?.project.clone()
    }

    /// Whether `conn_id` is still the active target for `project`
    pub fn is_current_target(&self, conn_id: ConnId, project: &str) -> bool {
        self.targets
            .get(project)
            .map(|t| t.conn_id == conn_id)
            .unwrap_or(false)
    }

    /// The active target connection for a project
    pub fn target_conn(&self, project: &str) -> Option<ConnId> {
        self.targets.get(project).map(|t| t.conn_id)
    }

    /// Attach device metadata to the active target for a project
    ///
    /// Ignored if the reporting connection has been superseded.
    pub fn set_device(&self, conn_id: ConnId, device: DeviceInfo) {
        let Some(project) = self.conn_project(conn_id) else {
            return;
        };
        if let Some(mut target) = self.targets.get_mut(&project) {
            if target.conn_id == conn_id {
                target.device = Some(device);
            }
        }
    }

    /// Projects that currently have a registered target, sorted
    pub fn known_projects(&self) -> Vec<String> {
        let mut projects: Vec<String> = self.targets.iter().map(|t| t.key().clone()).collect();
        projects.sort();
        projects
    }

    /// Connected targets with their device metadata, sorted by project
    pub fn list_targets(&self) -> Vec<TargetInfo> {
        let mut targets: Vec<TargetInfo> = self
            .targets
            .iter()
            .map(|t| TargetInfo {
                project: t.key().clone(),
                device: t.device.clone(),
            })
            .collect();
        targets.sort_by(|a, b| a.project.cmp(&b.project));
        targets
    }

    // ==================== Log Subscriptions ====================

    /// Subscribe a connection to a project's log stream
    ///
    /// Subscribing twice is a no-op. The subscription survives target
    /// restarts; it is keyed by project, not by target connection.
    pub fn subscribe_logs(&self, project: &str, conn_id: ConnId) {
        self.log_subscribers
            .entry(project.to_string())
            .or_default()
            .insert(conn_id);
        debug!("Connection {} subscribed to '{}' logs", conn_id, project);
    }

    /// Number of log subscribers for a project
    pub fn log_subscriber_count(&self, project: &str) -> usize {
        self.log_subscribers
            .get(project)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    // ==================== Message Delivery ====================

    /// Send a message to a specific connection
    ///
    /// Returns `true` on success. A closed channel means the connection is
    /// gone; it is unregistered automatically.
    pub async fn send_to_conn(&self, conn_id: ConnId, message: ServerMessage) -> bool {
        // Clone the sender so the map lock is not held across the send
        let sender = match self.conns.get(&conn_id) {
            Some(entry) => entry.sender.clone(),
            None => return false,
        };

        match sender.send(message).await {
            Ok(()) => true,
            Err(_) => {
                warn!("Connection {} channel closed, removing from registry", conn_id);
                self.unregister_conn(conn_id);
                false
            }
        }
    }

    /// Fan a log event out to every subscriber of its project
    ///
    /// Returns the number of subscribers that received it.
    pub async fn fan_out_log(&self, event: LogEvent) -> usize {
        let subscriber_ids: Vec<ConnId> = match self.log_subscribers.get(&event.project) {
            Some(subs) => subs.iter().copied().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for conn_id in subscriber_ids {
            let message = ServerMessage::Log {
                event: event.clone(),
            };
            if self.send_to_conn(conn_id, message).await {
                delivered += 1;
            }
        }

        delivered
    }
}

impl std::fmt::Debug for ConnRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnRegistry")
            .field("conn_count", &self.conns.len())
            .field("target_count", &self.targets.len())
            .field("next_conn_id", &self.next_conn_id.load(Ordering::SeqCst))
            .finish()
    }
}
