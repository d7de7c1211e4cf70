//! leash-protocol: Wire protocol for broker, agents, and targets
//!
//! This crate defines the message types exchanged over the broker's TCP
//! socket and the codec that frames them as newline-delimited JSON. Both
//! sides of every connection speak the same two enums: [`ClientMessage`]
//! for frames sent to the broker, [`ServerMessage`] for frames it sends
//! back.

pub mod codec;
pub mod messages;
pub mod types;

// Re-export commonly used types
pub use codec::{ClientCodec, CodecError, ServerCodec};
pub use messages::{ClientMessage, Role, ServerMessage};
pub use types::{
    new_request_id, now_millis, Action, CommandEnvelope, DeviceInfo, Direction, ErrorCode,
    LogEntry, LogEvent, LogRecord, ResponseBody, ResponseEnvelope, ResponsePayload, TargetInfo,
    Velocity, DEFAULT_LONG_PRESS_MS, DEFAULT_SCROLL_AMOUNT,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// TCP port the broker listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 9150;
