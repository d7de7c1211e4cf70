//! Requester-side message handlers
//!
//! Handles: Command, ListTargets

use tracing::debug;

use leash_protocol::{
    Action, CommandEnvelope, ResponseEnvelope, ResponsePayload, ServerMessage,
};

use super::{HandlerContext, HandlerResult};

impl HandlerContext {
    /// Handle a command addressed to a project
    ///
    /// Routing failures are answered immediately rather than left to the
    /// requester's deadline; the reply names the projects that do have a
    /// target so a misspelled identifier is easy to spot.
    pub(super) async fn handle_command(&self, command: CommandEnvelope) -> HandlerResult {
        // Arm the subscription before forwarding, so no line emitted after
        // the target's ack can be missed
        if let Action::SubscribeLogs = command.action {
            self.registry.subscribe_logs(&command.project, self.conn_id);
        }

        let Some(target) = self.registry.target_conn(&command.project) else {
            if let Action::SubscribeLogs = command.action {
                // Subscription is armed broker-side; ack instead of failing
                // so a subscriber can attach before its target starts
                debug!(
                    "Subscribed {} to '{}' logs with no target connected",
                    self.conn_id, command.project
                );
                return HandlerResult::Response(ServerMessage::Response {
                    response: ResponseEnvelope::ok(command.id),
                });
            }

            debug!(
                "No target for project '{}', rejecting command {}",
                command.project, command.id
            );
            return HandlerResult::Response(ServerMessage::Response {
                response: ResponseEnvelope::no_target(
                    command.id,
                    &command.project,
                    self.registry.known_projects(),
                ),
            });
        };

        self.pending
            .insert(&command.id, self.conn_id, &command.project);
        debug!(
            "Forwarding {} command {} for '{}' to {}",
            command.action.name(),
            command.id,
            command.project,
            target
        );

        let id = command.id.clone();
        let project = command.project.clone();
        let forwarded = self
            .registry
            .send_to_conn(target, ServerMessage::Command { command })
            .await;

        if !forwarded {
            // The target vanished between lookup and send
            self.pending.take(&id);
            return HandlerResult::Response(ServerMessage::Response {
                response: ResponseEnvelope::no_target(
                    id,
                    &project,
                    self.registry.known_projects(),
                ),
            });
        }

        HandlerResult::NoResponse
    }

    /// Answer a target listing from broker state
    pub(super) fn handle_list_targets(&self, id: String) -> HandlerResult {
        let targets = self.registry.list_targets();
        HandlerResult::Response(ServerMessage::Response {
            response: ResponseEnvelope::ok_with(id, ResponsePayload::Targets { targets }),
        })
    }
}
