//! Core wire types: command envelopes, responses, and log records
//!
//! Every command an agent issues travels in a [`CommandEnvelope`] and comes
//! back as a [`ResponseEnvelope`] carrying the same `id`. The envelopes are
//! serialized flat, so a tap command appears on the wire as
//! `{"type":"command","id":"...","project":"...","action":"tap","testID":"..."}`.

use serde::{Deserialize, Serialize};

use leash_hierarchy::HierarchyNode;

/// Scroll distance in logical pixels when the agent does not specify one
pub const DEFAULT_SCROLL_AMOUNT: f64 = 100.0;

/// Long-press hold duration in milliseconds when the agent does not specify one
pub const DEFAULT_LONG_PRESS_MS: u64 = 1000;

fn default_scroll_amount() -> f64 {
    DEFAULT_SCROLL_AMOUNT
}

fn default_long_press_ms() -> u64 {
    DEFAULT_LONG_PRESS_MS
}

fn default_log_level() -> String {
    "log".to_string()
}

/// Generate a fresh request id for a command envelope
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ==================== Commands ====================

/// Direction for scroll and swipe gestures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Swipe speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Velocity {
    Slow,
    #[default]
    Medium,
    Fast,
}

/// The closed set of operations a target knows how to perform
///
/// The `action` tag and the camelCase field names are the wire contract
/// with target runtimes, which deliver these payloads straight to UI
/// automation hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    /// Tap the element with the given testID
    Tap {
        #[serde(rename = "testID")]
        test_id: String,
    },
    /// Replace the text of an input element
    Input {
        #[serde(rename = "testID")]
        test_id: String,
        value: String,
    },
    /// Scroll a container by `amount` logical pixels
    Scroll {
        #[serde(rename = "testID")]
        test_id: String,
        direction: Direction,
        #[serde(default = "default_scroll_amount")]
        amount: f64,
    },
    /// Swipe across an element
    Swipe {
        #[serde(rename = "testID")]
        test_id: String,
        direction: Direction,
        #[serde(default)]
        velocity: Velocity,
    },
    /// Press and hold an element
    LongPress {
        #[serde(rename = "testID")]
        test_id: String,
        #[serde(rename = "duration", default = "default_long_press_ms")]
        duration_ms: u64,
    },
    /// Request a snapshot of the current UI tree
    GetViewHierarchy,
    /// Deliver an opaque payload to the application's deep-link handler
    AgentLink { payload: String },
    /// Request the target's buffered console output
    GetConsoleLogs,
    /// Ask the target to start streaming console output as it happens
    SubscribeLogs,
}

impl Action {
    /// Wire name of the action, for error messages and log lines
    pub fn name(&self) -> &'static str {
        match self {
            Action::Tap { .. } => "tap",
            Action::Input { .. } => "input",
            Action::Scroll { .. } => "scroll",
            Action::Swipe { .. } => "swipe",
            Action::LongPress { .. } => "longPress",
            Action::GetViewHierarchy => "getViewHierarchy",
            Action::AgentLink { .. } => "agentLink",
            Action::GetConsoleLogs => "getConsoleLogs",
            Action::SubscribeLogs => "subscribeLogs",
        }
    }
}

/// A routable command: which project it is for plus the action to perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Correlation id, echoed back in the response
    pub id: String,
    /// Project the command should be routed to
    pub project: String,
    #[serde(flatten)]
    pub action: Action,
}

impl CommandEnvelope {
    /// Build an envelope with a freshly generated id
    pub fn new(project: impl Into<String>, action: Action) -> Self {
        Self {
            id: new_request_id(),
            project: project.into(),
            action,
        }
    }
}

// ==================== Responses ====================

/// Machine-readable classification for routed errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No target is registered for the requested project
    NoTargetConnected,
    /// Handshake token was missing or wrong
    AuthFailed,
    /// Handshake protocol version is incompatible
    ProtocolMismatch,
    /// Frame was parseable JSON but not a valid envelope
    BadEnvelope,
}

/// Structured result data attached to a successful response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponsePayload {
    /// UI tree snapshot
    Hierarchy { hierarchy: HierarchyNode },
    /// Buffered console output
    Logs { logs: Vec<LogRecord> },
    /// Connected targets, answered by the broker itself
    Targets { targets: Vec<TargetInfo> },
    /// Free-form value for actions without a richer shape
    Value { value: serde_json::Value },
}

/// Success or failure of a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseBody {
    Ok {
        #[serde(flatten)]
        payload: Option<ResponsePayload>,
    },
    Error {
        /// Human-readable description of what went wrong
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        /// Projects that do have a registered target, attached to
        /// routing failures so callers can spot misspelled names
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        known_projects: Vec<String>,
    },
}

/// Reply to a command, correlated by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Id of the command this answers
    pub id: String,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl ResponseEnvelope {
    /// Successful response with no payload
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: ResponseBody::Ok { payload: None },
        }
    }

    /// Successful response carrying a payload
    pub fn ok_with(id: impl Into<String>, payload: ResponsePayload) -> Self {
        Self {
            id: id.into(),
            body: ResponseBody::Ok {
                payload: Some(payload),
            },
        }
    }

    /// Failure response without a machine-readable code
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: ResponseBody::Error {
                error: message.into(),
                code: None,
                known_projects: Vec::new(),
            },
        }
    }

    /// Failure response with a machine-readable code
    pub fn error_with_code(
        id: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            body: ResponseBody::Error {
                error: message.into(),
                code: Some(code),
                known_projects: Vec::new(),
            },
        }
    }

    /// Routing failure: no target registered for `project`
    pub fn no_target(id: impl Into<String>, project: &str, known_projects: Vec<String>) -> Self {
        Self {
            id: id.into(),
            body: ResponseBody::Error {
                error: format!("No target connected for project '{project}'"),
                code: Some(ErrorCode::NoTargetConnected),
                known_projects,
            },
        }
    }

    /// True when the body is `Ok`
    pub fn is_ok(&self) -> bool {
        matches!(self.body, ResponseBody::Ok { .. })
    }
}

// ==================== Logs ====================

/// One console line as a target reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Severity as the target names it ("log", "warn", "error", ...)
    #[serde(default = "default_log_level")]
    pub level: String,
    pub message: String,
    /// Milliseconds since the Unix epoch; zero when the target did not stamp it
    #[serde(default)]
    pub timestamp: u64,
}

impl LogEntry {
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            message: message.into(),
            timestamp: now_millis(),
        }
    }
}

/// A buffered log item, as returned by a console-log query
///
/// Older target runtimes report bare strings, newer ones structured
/// entries. Both deserialize into this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogRecord {
    Text(String),
    Entry(LogEntry),
}

impl LogRecord {
    /// The message text regardless of shape
    pub fn message(&self) -> &str {
        match self {
            LogRecord::Text(text) => text,
            LogRecord::Entry(entry) => &entry.message,
        }
    }
}

/// A log line as fanned out to subscribers, stamped with its project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Project of the target that emitted the line
    pub project: String,
    #[serde(default = "default_log_level")]
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: u64,
}

impl LogEvent {
    /// Stamp a reported entry with the project it came from
    pub fn from_entry(project: impl Into<String>, entry: LogEntry) -> Self {
        Self {
            project: project.into(),
            level: entry.level,
            message: entry.message,
            timestamp: entry.timestamp,
        }
    }
}

impl std::fmt::Display for LogEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

// ==================== Targets ====================

/// Device metadata a target reports after registering
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub is_simulator: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
}

/// One connected target, as reported by a target listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
}
