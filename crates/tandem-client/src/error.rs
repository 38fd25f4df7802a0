use tandem_core::net::protocol::ProtocolError;

#[derive(Debug)]
pub enum ClientError {
    MissingRoomId,
    /// Room IDs must be at most 64 bytes with no control characters.
    InvalidRoomId(String),
    /// The signaling endpoint is not an absolute `ws://` or `wss://` URL.
    InvalidUrl(String),
    /// A connection is already open, being opened, or scheduled.
    AlreadyConnected,
    NotConnected,
    Protocol(ProtocolError),
    Transport(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRoomId => write!(f, "missing room ID"),
            Self::InvalidRoomId(id) => write!(f, "invalid room ID {id:?}"),
            Self::InvalidUrl(e) => write!(f, "invalid signaling URL: {e}"),
            Self::AlreadyConnected => write!(f, "already connected or connecting"),
            Self::NotConnected => write!(f, "signaling channel is not connected"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}
