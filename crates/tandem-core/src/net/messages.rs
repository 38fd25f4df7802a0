use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use uuid::Uuid;

/// An ICE candidate init dictionary. Opaque to the relay: only its shape
/// (a non-null JSON object) is checked.
pub type CandidateInit = Map<String, Value>;

/// One signaling message as carried on the wire, one JSON object per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: CandidateInit },
    Ping,
    /// Server -> client only: both room slots are filled.
    Ready,
}

impl SignalingMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Offer { .. } => MessageKind::Offer,
            Self::Answer { .. } => MessageKind::Answer,
            Self::Candidate { .. } => MessageKind::Candidate,
            Self::Ping => MessageKind::Ping,
            Self::Ready => MessageKind::Ready,
        }
    }
}

/// Message type discriminator, the value of the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Offer,
    Answer,
    Candidate,
    Ping,
    Ready,
}

impl MessageKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "candidate" => Some(Self::Candidate),
            "ping" => Some(Self::Ping),
            "ready" => Some(Self::Ready),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
            Self::Ping => "ping",
            Self::Ready => "ready",
        }
    }

    /// Variants a client is never allowed to originate.
    pub fn is_server_only(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Variants that are forwarded to the other room member.
    pub fn is_relayed(self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::Candidate)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol-level close codes. These drive the client's reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    Normal = 1000,
    GoingAway = 1001,
    RoomFull = 4000,
    Stale = 4001,
}

impl CloseCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            4000 => Some(Self::RoomFull),
            4001 => Some(Self::Stale),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Normal => "Normal closure",
            Self::GoingAway => "Client teardown",
            Self::RoomFull => "Room full",
            Self::Stale => "Idle connection",
        }
    }

    /// Whether a client seeing this code on close should stay disconnected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Normal | Self::RoomFull)
    }
}

/// Cross-instance fanout envelope. `message` is the sender's original JSON,
/// embedded verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEnvelope {
    pub room_id: String,
    pub origin: Uuid,
    pub message: Box<RawValue>,
}

impl RelayEnvelope {
    pub fn message_text(&self) -> &str {
        self.message.get()
    }
}
