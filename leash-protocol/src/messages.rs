//! Message types for broker communication
//!
//! [`ClientMessage`] covers every frame a connected party may send to the
//! broker, regardless of role; [`ServerMessage`] covers every frame the
//! broker sends back. The first frame on any connection must be
//! [`ClientMessage::Hello`], answered by [`ServerMessage::Welcome`] or a
//! [`ServerMessage::Error`] followed by a close.

use serde::{Deserialize, Serialize};

use crate::types::{
    CommandEnvelope, DeviceInfo, ErrorCode, LogEntry, LogEvent, ResponseEnvelope,
};

/// Connection role declared in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A running application instance that executes commands
    Target,
    /// A controller that issues commands and consumes logs
    Agent,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Target => write!(f, "target"),
            Role::Agent => write!(f, "agent"),
        }
    }
}

/// Messages sent from a connected party to the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Registration handshake; must be the first frame on a connection
    Hello {
        role: Role,
        /// Project identifier; required when the role is `target`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project: Option<String>,
        /// Shared secret; required when the broker was started with one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        protocol_version: u32,
    },
    /// Command for a target, issued by an agent
    Command {
        #[serde(flatten)]
        command: CommandEnvelope,
    },
    /// Reply from a target to a forwarded command
    Response {
        #[serde(flatten)]
        response: ResponseEnvelope,
    },
    /// Console output emitted by a target
    Logs { entries: Vec<LogEntry> },
    /// Device metadata reported by a target after registering
    DeviceInfo { device: DeviceInfo },
    /// Request the list of connected targets, answered by the broker itself
    ListTargets { id: String },
    /// Keepalive probe
    Ping,
}

/// Messages sent from the broker to a connected party
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted
    Welcome { protocol_version: u32 },
    /// Command forwarded to a target
    Command {
        #[serde(flatten)]
        command: CommandEnvelope,
    },
    /// Response routed back to the requester
    Response {
        #[serde(flatten)]
        response: ResponseEnvelope,
    },
    /// Log line fanned out to a subscriber
    Log {
        #[serde(flatten)]
        event: LogEvent,
    },
    /// Connection-level failure, sent before the broker closes the socket
    Error { code: ErrorCode, message: String },
    /// Keepalive reply
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Action;
    use serde_json::json;

    // ==================== Handshake Tests ====================

    #[test]
    fn test_hello_target_wire_shape() {
        let hello = ClientMessage::Hello {
            role: Role::Target,
            project: Some("demo".to_string()),
            token: Some("secret".to_string()),
            protocol_version: 1,
        };
        let value = serde_json::to_value(&hello).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "hello",
                "role": "target",
                "project": "demo",
                "token": "secret",
                "protocol_version": 1
            })
        );
    }

    #[test]
    fn test_hello_agent_omits_empty_fields() {
        let hello = ClientMessage::Hello {
            role: Role::Agent,
            project: None,
            token: None,
            protocol_version: 1,
        };
        let value = serde_json::to_value(&hello).unwrap();
        assert_eq!(
            value,
            json!({"type": "hello", "role": "agent", "protocol_version": 1})
        );
    }

    #[test]
    fn test_welcome_roundtrip() {
        let welcome = ServerMessage::Welcome {
            protocol_version: 1,
        };
        let text = serde_json::to_string(&welcome).unwrap();
        let parsed: ServerMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, welcome);
    }

    // ==================== Framing Tests ====================

    #[test]
    fn test_command_flattens_through_type_tag() {
        let message = ClientMessage::Command {
            command: CommandEnvelope {
                id: "req-1".to_string(),
                project: "demo".to_string(),
                action: Action::Tap {
                    test_id: "save".to_string(),
                },
            },
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "command",
                "id": "req-1",
                "project": "demo",
                "action": "tap",
                "testID": "save"
            })
        );
    }

    #[test]
    fn test_server_log_is_flat() {
        let message = ServerMessage::Log {
            event: LogEvent {
                project: "demo".to_string(),
                level: "log".to_string(),
                message: "ready".to_string(),
                timestamp: 7,
            },
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "log",
                "project": "demo",
                "level": "log",
                "message": "ready",
                "timestamp": 7
            })
        );
    }

    #[test]
    fn test_error_frame_wire_shape() {
        let message = ServerMessage::Error {
            code: ErrorCode::AuthFailed,
            message: "invalid token".to_string(),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"type": "error", "code": "auth_failed", "message": "invalid token"})
        );
    }

    #[test]
    fn test_logs_message_roundtrip() {
        let message = ClientMessage::Logs {
            entries: vec![LogEntry {
                level: "log".to_string(),
                message: "started".to_string(),
                timestamp: 1,
            }],
        };
        let text = serde_json::to_string(&message).unwrap();
        let parsed: ClientMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_list_targets_roundtrip() {
        let message = ClientMessage::ListTargets {
            id: "req-9".to_string(),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value, json!({"type": "list_targets", "id": "req-9"}));
    }

    #[test]
    fn test_ping_pong_are_bare() {
        assert_eq!(
            serde_json::to_value(&ClientMessage::Ping).unwrap(),
            json!({"type": "ping"})
        );
        assert_eq!(
            serde_json::to_value(&ServerMessage::Pong).unwrap(),
            json!({"type": "pong"})
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_value(json!({"type": "shutdown"}));
        assert!(result.is_err());
    }
}
