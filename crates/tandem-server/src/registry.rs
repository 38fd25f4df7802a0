use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tandem_core::net::messages::CloseCode;
use tandem_core::net::protocol::ROOM_CAPACITY;

pub type PeerId = u64;

/// One outbound text frame. Shared so a relayed message is not copied per
/// recipient.
pub type Outbound = Arc<str>;

/// Per-peer sender for outbound WebSocket frames. Bounded so a slow client
/// cannot grow server memory; a full queue drops the frame.
pub type PeerSender = mpsc::Sender<Outbound>;

/// Server-initiated close for one peer.
///
/// Delivered beside the frame queue rather than through it, so a peer whose
/// queue is full (or whose socket is stuck) is still closed.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal {
    token: CancellationToken,
    code: Arc<OnceLock<CloseCode>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a close. The first code wins; later calls are no-ops.
    pub fn close(&self, code: CloseCode) {
        let _ = self.code.set(code);
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The code requested, once closed.
    pub fn code(&self) -> Option<CloseCode> {
        self.code.get().copied()
    }

    /// Resolves once a close has been requested.
    pub async fn closed(&self) -> Option<CloseCode> {
        self.token.cancelled().await;
        self.code()
    }
}

/// A peer's identity plus the channels feeding its socket writer.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub id: PeerId,
    pub sender: PeerSender,
    pub close: CloseSignal,
}

impl PeerHandle {
    pub fn new(id: PeerId, sender: PeerSender) -> Self {
        Self {
            id,
            sender,
            close: CloseSignal::new(),
        }
    }
}

/// Registry record for one connected peer.
struct PeerEntry {
    sender: PeerSender,
    close: CloseSignal,
    room_id: String,
    last_activity: Instant,
}

impl PeerEntry {
    fn handle(&self, id: PeerId) -> PeerHandle {
        PeerHandle {
            id,
            sender: self.sender.clone(),
            close: self.close.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    RoomFull { room_id: String, capacity: usize },
    AlreadyJoined { peer_id: PeerId },
}

impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoomFull { room_id, capacity } => {
                write!(f, "room {room_id:?} is full ({capacity} peers)")
            },
            Self::AlreadyJoined { peer_id } => write!(f, "peer {peer_id} already joined a room"),
        }
    }
}

impl std::error::Error for JoinError {}

/// Outcome of removing a registered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub room_id: String,
    pub remaining: usize,
}

impl Removal {
    pub fn room_destroyed(&self) -> bool {
        self.remaining == 0
    }
}

/// Room membership and per-peer liveness for one server instance.
///
/// Rooms are created on first join and deleted the moment their last member
/// is removed, so identifiers never accumulate.
pub struct Registry {
    rooms: HashMap<String, Vec<PeerId>>,
    peers: HashMap<PeerId, PeerEntry>,
    next_peer_id: PeerId,
    capacity: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_room_capacity(ROOM_CAPACITY)
    }

    pub fn with_room_capacity(capacity: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            peers: HashMap::new(),
            next_peer_id: 1,
            capacity,
        }
    }

    pub fn room_capacity(&self) -> usize {
        self.capacity
    }

    pub fn alloc_peer_id(&mut self) -> PeerId {
        let id = self.next_peer_id;
        self.next_peer_id += 1;
        id
    }

    /// Add a peer to a room. Returns the room's member count after the join.
    ///
    /// Fails without touching any state when the room is at capacity; the
    /// caller closes the rejected peer.
    pub fn join(&mut self, peer: PeerHandle, room_id: &str) -> Result<usize, JoinError> {
        if self.peers.contains_key(&peer.id) {
            return Err(JoinError::AlreadyJoined { peer_id: peer.id });
        }
        let occupied = self.rooms.get(room_id).map_or(0, Vec::len);
        if occupied >= self.capacity {
            return Err(JoinError::RoomFull {
                room_id: room_id.to_string(),
                capacity: self.capacity,
            });
        }

        let members = self.rooms.entry(room_id.to_string()).or_default();
        members.push(peer.id);
        let count = members.len();
        self.peers.insert(
            peer.id,
            PeerEntry {
                sender: peer.sender,
                close: peer.close,
                room_id: room_id.to_string(),
                last_activity: Instant::now(),
            },
        );
        Ok(count)
    }

    /// Remove a peer. No-op (returns `None`) if the peer is not registered.
    pub fn remove(&mut self, peer_id: PeerId) -> Option<Removal> {
        let entry = self.peers.remove(&peer_id)?;
        let remaining = match self.rooms.get_mut(&entry.room_id) {
            Some(members) => {
                members.retain(|&id| id != peer_id);
                members.len()
            },
            None => 0,
        };
        if remaining == 0 {
            self.rooms.remove(&entry.room_id);
        }
        Some(Removal {
            room_id: entry.room_id,
            remaining,
        })
    }

    /// Refresh a peer's last-activity time. Returns false for unknown peers.
    pub fn touch(&mut self, peer_id: PeerId) -> bool {
        match self.peers.get_mut(&peer_id) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                true
            },
            None => false,
        }
    }

    /// Members of a room in join order, or `None` if the room does not exist.
    pub fn members_of(&self, room_id: &str) -> Option<&[PeerId]> {
        self.rooms.get(room_id).map(Vec::as_slice)
    }

    pub fn room_of(&self, peer_id: PeerId) -> Option<&str> {
        self.peers.get(&peer_id).map(|e| e.room_id.as_str())
    }

    pub fn last_activity(&self, peer_id: PeerId) -> Option<Instant> {
        self.peers.get(&peer_id).map(|e| e.last_activity)
    }

    pub fn handle_of(&self, peer_id: PeerId) -> Option<PeerHandle> {
        self.peers.get(&peer_id).map(|e| e.handle(peer_id))
    }

    /// Queue a frame for every member of a room except `exclude`.
    /// Per-recipient failures are logged and skipped. Returns the number of
    /// peers the frame was queued for.
    pub fn send_to_room(&self, room_id: &str, exclude: Option<PeerId>, out: &Outbound) -> usize {
        let Some(members) = self.rooms.get(room_id) else {
            return 0;
        };
        let mut delivered = 0;
        for &peer_id in members {
            if Some(peer_id) == exclude {
                continue;
            }
            let Some(entry) = self.peers.get(&peer_id) else {
                continue;
            };
            match entry.sender.try_send(Arc::clone(out)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        peer_id, room = %room_id, error = %e,
                        "Failed to queue signaling message for peer"
                    );
                },
            }
        }
        delivered
    }

    /// Peers whose last activity is older than `max_idle` at `now`.
    pub fn idle_peers(&self, now: Instant, max_idle: Duration) -> Vec<PeerHandle> {
        self.peers
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_activity) > max_idle)
            .map(|(&id, e)| e.handle(id))
            .collect()
    }

    /// (active rooms, registered peers)
    pub fn stats(&self) -> (usize, usize) {
        (self.rooms.len(), self.peers.len())
    }
}
