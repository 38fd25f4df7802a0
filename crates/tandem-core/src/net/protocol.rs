use std::time::Duration;

use serde_json::Value;
use serde_json::value::RawValue;
use uuid::Uuid;

use super::messages::{MessageKind, RelayEnvelope, SignalingMessage};

/// Maximum number of peers in one room.
pub const ROOM_CAPACITY: usize = 2;

/// A peer silent for longer than this is evicted with `CloseCode::Stale`.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Period of the idle sweep. Must stay well below `IDLE_TIMEOUT`.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Client liveness ping period.
pub const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Linear reconnect backoff increment per failed attempt.
pub const RECONNECT_STEP: Duration = Duration::from_secs(1);

/// Upper bound on the reconnect delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Request paths ending in this suffix are signaling upgrades.
pub const SIGNALING_PATH_SUFFIX: &str = "/signaling";

/// Query parameter carrying the room identifier.
pub const ROOM_QUERY_PARAM: &str = "room";

/// Maximum text frame size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    PayloadTooLarge(usize),
    Malformed(String),
    NotAnObject,
    MissingType,
    UnknownType(String),
    InvalidShape { kind: MessageKind, reason: String },
    Serialize(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::Malformed(e) => write!(f, "malformed JSON: {e}"),
            Self::NotAnObject => write!(f, "message is not a JSON object"),
            Self::MissingType => write!(f, "message has no string `type` field"),
            Self::UnknownType(t) => write!(f, "unknown message type: {t:?}"),
            Self::InvalidShape { kind, reason } => write!(f, "invalid {kind} message: {reason}"),
            Self::Serialize(e) => write!(f, "serialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Linear reconnect backoff: `step * attempts`, capped at `cap`.
///
/// `attempts` counts consecutive failed attempts so far, so the first retry
/// after a drop happens immediately.
pub fn reconnect_delay(attempts: u32, step: Duration, cap: Duration) -> Duration {
    step.saturating_mul(attempts).min(cap)
}

/// Encode a message to its JSON text form.
pub fn encode_message(msg: &SignalingMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Serialize(e.to_string()))
}

/// Parse and shape-check one text frame.
///
/// Only the five known variants are accepted. `offer`/`answer` need a string
/// `sdp`, `candidate` needs a non-null object `candidate`; `ping` and `ready`
/// need nothing beyond `type`. Extra fields are tolerated.
pub fn decode_message(text: &str) -> Result<SignalingMessage, ProtocolError> {
    let value = parse_frame(text)?;
    let kind = message_kind(&value)?;
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidShape {
        kind,
        reason: e.to_string(),
    })
}

/// Read the `type` tag of a parsed frame without validating the rest.
pub fn message_kind(value: &Value) -> Result<MessageKind, ProtocolError> {
    let obj = value.as_object().ok_or(ProtocolError::NotAnObject)?;
    let tag = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    MessageKind::from_tag(tag).ok_or_else(|| ProtocolError::UnknownType(tag.to_string()))
}

fn parse_frame(text: &str) -> Result<Value, ProtocolError> {
    if text.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(text.len()));
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Wrap an already-validated message text for cross-instance fanout.
pub fn wrap_envelope(
    room_id: &str,
    origin: Uuid,
    message_text: &str,
) -> Result<RelayEnvelope, ProtocolError> {
    let message = RawValue::from_string(message_text.to_string())
        .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    Ok(RelayEnvelope {
        room_id: room_id.to_string(),
        origin,
        message,
    })
}

pub fn encode_envelope(envelope: &RelayEnvelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(|e| ProtocolError::Serialize(e.to_string()))
}

pub fn decode_envelope(text: &str) -> Result<RelayEnvelope, ProtocolError> {
    if text.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
