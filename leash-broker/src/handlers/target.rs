//! Target-side message handlers
//!
//! Handles: Response, Logs, DeviceInfo
//!
//! Every handler here starts from the same gate: the frame only counts if
//! the sending connection is still the active target for its project. A
//! superseded connection may keep talking for a while; its frames are
//! logged and dropped.

use tracing::debug;

use leash_protocol::{DeviceInfo, LogEntry, LogEvent, ResponseEnvelope, ServerMessage};

use super::{HandlerContext, HandlerResult};

impl HandlerContext {
    /// The sending connection's project, if it is still the active target
    fn active_project(&self) -> Option<String> {
        let project = self.registry.conn_project(self.conn_id)?;
        if self.registry.is_current_target(self.conn_id, &project) {
            Some(project)
        } else {
            debug!(
                "Dropping frame from superseded target {} for '{}'",
                self.conn_id, project
            );
            None
        }
    }

    /// Route a target's reply back to the requester that issued the command
    pub(super) async fn handle_response(&self, response: ResponseEnvelope) -> HandlerResult {
        if self.active_project().is_none() {
            return HandlerResult::NoResponse;
        }

        match self.pending.take(&response.id) {
            Some((requester, _project)) => {
                debug!("Relaying response {} to {}", response.id, requester);
                self.registry
                    .send_to_conn(requester, ServerMessage::Response { response })
                    .await;
            }
            None => {
                debug!("Response {} matches no outstanding request", response.id);
            }
        }

        HandlerResult::NoResponse
    }

    /// Fan console output out to this project's log subscribers
    pub(super) async fn handle_logs(&self, entries: Vec<LogEntry>) -> HandlerResult {
        let Some(project) = self.active_project() else {
            return HandlerResult::NoResponse;
        };

        for entry in entries {
            self.registry
                .fan_out_log(LogEvent::from_entry(project.clone(), entry))
                .await;
        }

        HandlerResult::NoResponse
    }

    /// Record the device a target is running on
    pub(super) fn handle_device_info(&self, device: DeviceInfo) -> HandlerResult {
        // set_device ignores superseded connections on its own
        self.registry.set_device(self.conn_id, device);
        HandlerResult::NoResponse
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{connect, fresh_state};
    use super::*;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            level: "log".to_string(),
            message: message.to_string(),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_response_relayed_to_requester() {
        let (registry, pending) = fresh_state();
        let (agent, mut agent_rx) = connect(&registry, &pending);
        let (target, _target_rx) = connect(&registry, &pending);
        registry.register_target(target.conn_id, "demo");
        pending.insert("req-1", agent.conn_id, "demo");

        target
            .route_message(leash_protocol::ClientMessage::Response {
                response: ResponseEnvelope::ok("req-1"),
            })
            .await;

        match agent_rx.recv().await.unwrap() {
            ServerMessage::Response { response } => {
                assert_eq!(response.id, "req-1");
                assert!(response.is_ok());
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_response_from_superseded_target_dropped() {
        let (registry, pending) = fresh_state();
        let (agent, mut agent_rx) = connect(&registry, &pending);
        let (old_target, _old_rx) = connect(&registry, &pending);
        let (new_target, _new_rx) = connect(&registry, &pending);

        registry.register_target(old_target.conn_id, "demo");
        pending.insert("req-1", agent.conn_id, "demo");
        registry.register_target(new_target.conn_id, "demo");

        // The old connection answers after being superseded
        old_target
            .route_message(leash_protocol::ClientMessage::Response {
                response: ResponseEnvelope::ok("req-1"),
            })
            .await;

        // Nothing reaches the requester; the entry is left to its deadline
        assert!(agent_rx.try_recv().is_err());
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_response_with_unknown_id_discarded() {
        let (registry, pending) = fresh_state();
        let (target, _target_rx) = connect(&registry, &pending);
        registry.register_target(target.conn_id, "demo");

        target
            .route_message(leash_protocol::ClientMessage::Response {
                response: ResponseEnvelope::ok("never-issued"),
            })
            .await;
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_response_from_unregistered_conn_dropped() {
        let (registry, pending) = fresh_state();
        let (agent, mut agent_rx) = connect(&registry, &pending);
        let (intruder, _rx) = connect(&registry, &pending);
        pending.insert("req-1", agent.conn_id, "demo");

        // A connection that never registered as a target cannot answer
        intruder
            .route_message(leash_protocol::ClientMessage::Response {
                response: ResponseEnvelope::ok("req-1"),
            })
            .await;

        assert!(agent_rx.try_recv().is_err());
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_logs_fanned_out_with_project_stamp() {
        let (registry, pending) = fresh_state();
        let (subscriber, mut sub_rx) = connect(&registry, &pending);
        let (target, _target_rx) = connect(&registry, &pending);
        registry.register_target(target.conn_id, "demo");
        registry.subscribe_logs("demo", subscriber.conn_id);

        target
            .route_message(leash_protocol::ClientMessage::Logs {
                entries: vec![entry("first"), entry("second")],
            })
            .await;

        for expected in ["first", "second"] {
            match sub_rx.recv().await.unwrap() {
                ServerMessage::Log { event } => {
                    assert_eq!(event.project, "demo");
                    assert_eq!(event.message, expected);
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_logs_from_superseded_target_dropped() {
        let (registry, pending) = fresh_state();
        let (subscriber, mut sub_rx) = connect(&registry, &pending);
        let (old_target, _old_rx) = connect(&registry, &pending);
        let (new_target, _new_rx) = connect(&registry, &pending);

        registry.register_target(old_target.conn_id, "demo");
        registry.register_target(new_target.conn_id, "demo");
        registry.subscribe_logs("demo", subscriber.conn_id);

        old_target
            .route_message(leash_protocol::ClientMessage::Logs {
                entries: vec![entry("stale line")],
            })
            .await;

        assert!(sub_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_device_info_recorded() {
        let (registry, pending) = fresh_state();
        let (target, _target_rx) = connect(&registry, &pending);
        registry.register_target(target.conn_id, "demo");

        target
            .route_message(leash_protocol::ClientMessage::DeviceInfo {
                device: DeviceInfo {
                    is_simulator: true,
                    device_name: Some("Pixel 8".to_string()),
                    ..Default::default()
                },
            })
            .await;

        let targets = registry.list_targets();
        let device = targets[0].device.as_ref().unwrap();
        assert_eq!(device.device_name.as_deref(), Some("Pixel 8"));
    }
}
