//! Log subscriptions
//!
//! Incoming log events are fanned out locally: the driver task hands each
//! one to the [`LogRouter`], which copies it to every subscription attached
//! to that project. The stream from the target is started at most once per
//! project; later subscriptions just attach another listener.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tracing::warn;

use leash_protocol::{Action, LogEvent};

use crate::client::Client;

struct ProjectListener {
    token: u64,
    tx: mpsc::UnboundedSender<LogEvent>,
}

/// Fan-out point between the driver task and log subscriptions
#[derive(Clone, Default)]
pub(crate) struct LogRouter {
    inner: Arc<RouterInner>,
}

#[derive(Default)]
struct RouterInner {
    listeners: DashMap<String, Vec<ProjectListener>>,
    /// Projects whose target has already been asked to stream
    requested: DashSet<String>,
    next_token: AtomicU64,
    closed: AtomicBool,
}

impl LogRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy an event to every listener attached to its project
    pub fn publish(&self, event: LogEvent) {
        if let Some(mut listeners) = self.inner.listeners.get_mut(&event.project) {
            listeners.retain(|listener| listener.tx.send(event.clone()).is_ok());
        }
    }

    /// Attach a listener for a project
    ///
    /// On a closed router the returned channel is already dead, so the
    /// subscription reports end-of-stream instead of hanging.
    pub fn add_listener(&self, project: &str) -> (u64, mpsc::UnboundedReceiver<LogEvent>) {
        let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        if !self.inner.closed.load(Ordering::SeqCst) {
            self.inner
                .listeners
                .entry(project.to_string())
                .or_default()
                .push(ProjectListener { token, tx });
        }

        (token, rx)
    }

    /// Detach one listener; other listeners for the project are untouched
    pub fn remove_listener(&self, project: &str, token: u64) {
        if let Some(mut listeners) = self.inner.listeners.get_mut(project) {
            listeners.retain(|listener| listener.token != token);
        }
        self.inner
            .listeners
            .remove_if(project, |_, listeners| listeners.is_empty());
    }

    /// Record that the target for `project` is being asked to stream
    ///
    /// True only the first time per connection.
    pub fn mark_requested(&self, project: &str) -> bool {
        self.inner.requested.insert(project.to_string())
    }

    /// Drop every listener and refuse new ones
    pub fn close_all(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.listeners.clear();
    }

    #[cfg(test)]
    pub fn listener_count(&self, project: &str) -> usize {
        self.inner
            .listeners
            .get(project)
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for LogRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRouter")
            .field("projects", &self.inner.listeners.len())
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// A live feed of one project's console output
///
/// Dropping the handle detaches it. The underlying stream from the target
/// keeps flowing for as long as any subscription for the project exists.
pub struct LogSubscription {
    project: String,
    token: u64,
    rx: mpsc::UnboundedReceiver<LogEvent>,
    router: LogRouter,
}

impl LogSubscription {
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Next log line, in the order the target emitted them
    ///
    /// Returns `None` once the subscription is detached or the client
    /// disconnects.
    pub async fn recv(&mut self) -> Option<LogEvent> {
        self.rx.recv().await
    }

    /// Detach from the stream
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.router.remove_listener(&self.project, self.token);
    }
}

impl std::fmt::Debug for LogSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSubscription")
            .field("project", &self.project)
            .field("token", &self.token)
            .finish()
    }
}

impl Client {
    /// Subscribe to a project's live console-log stream
    ///
    /// The first subscription for a project asks its target, best effort,
    /// to start streaming; if no target is connected yet the broker holds
    /// the subscription and delivery begins once one registers. Calling
    /// this again for the same project only attaches another listener.
    pub async fn subscribe_logs(&self, project: &str) -> LogSubscription {
        // Attach before asking the target to stream, so nothing emitted
        // after the ack can slip past this subscription
        let (token, rx) = self.inner.logs.add_listener(project);

        if self.inner.logs.mark_requested(project) {
            if let Err(e) = self.send_command(project, Action::SubscribeLogs).await {
                warn!("subscribeLogs for '{}' failed: {}", project, e);
            }
        }

        LogSubscription {
            project: project.to_string(),
            token,
            rx,
            router: self.inner.logs.clone(),
        }
    }
}
