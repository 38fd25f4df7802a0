use std::sync::Arc;

use tokio::time::Instant;
use uuid::Uuid;

use tandem_core::net::messages::{CloseCode, MessageKind, RelayEnvelope, SignalingMessage};
use tandem_core::net::protocol::{decode_message, encode_message, wrap_envelope};

use crate::broadcast::SignalBus;
use crate::registry::{PeerHandle, PeerId, Registry, Removal};
use crate::state::SharedRegistry;

/// Server-side lifecycle of one signaling connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Opening,
    Joining,
    Joined,
    Rejected,
    Closed,
}

impl PeerState {
    pub fn can_transition_to(self, next: PeerState) -> bool {
        use PeerState::*;
        matches!(
            (self, next),
            (Opening, Joining)
                | (Joining, Joined)
                | (Joining, Rejected)
                | (Joined, Closed)
                | (Rejected, Closed)
        )
    }
}

/// Why a peer is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The client closed the channel.
    Closed,
    /// The transport failed.
    Errored,
    RoomFull,
    Stale,
}

impl Teardown {
    /// Close code sent to the client, if the server initiates the close.
    pub fn close_code(self) -> Option<CloseCode> {
        match self {
            Self::Closed | Self::Errored => None,
            Self::RoomFull => Some(CloseCode::RoomFull),
            Self::Stale => Some(CloseCode::Stale),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Joined { members: usize },
    Rejected,
}

/// What happened to one inbound text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Ping,
    Relayed { local: usize },
    Dropped,
}

/// Routes messages between room members and across instances.
///
/// Every join, leave and relay goes through the registry lock, so a room's
/// membership can never be observed half-updated.
#[derive(Clone)]
pub struct SignalRouter {
    registry: SharedRegistry,
    bus: Arc<dyn SignalBus>,
    instance_id: Uuid,
}

impl SignalRouter {
    pub fn new(registry: SharedRegistry, bus: Arc<dyn SignalBus>, instance_id: Uuid) -> Self {
        Self {
            registry,
            bus,
            instance_id,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<dyn SignalBus> {
        &self.bus
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub async fn alloc_peer_id(&self) -> PeerId {
        self.registry.write().await.alloc_peer_id()
    }

    /// Join `peer` to `room_id`, or close it with `RoomFull`.
    ///
    /// When the join fills the room, every member (the joiner included) is
    /// sent `ready` exactly once.
    pub async fn admit(&self, peer: &PeerHandle, room_id: &str) -> Admission {
        let mut registry = self.registry.write().await;
        match registry.join(peer.clone(), room_id) {
            Ok(members) => {
                tracing::info!(peer_id = peer.id, room = %room_id, members, "Peer joined room");
                if members == registry.room_capacity() {
                    announce_ready(&registry, room_id);
                }
                Admission::Joined { members }
            },
            Err(e) => {
                tracing::warn!(peer_id = peer.id, room = %room_id, error = %e, "Rejecting peer");
                teardown_locked(&mut registry, peer, Teardown::RoomFull);
                Admission::Rejected
            },
        }
    }

    /// Refresh a peer's activity without routing anything.
    pub async fn touch(&self, peer_id: PeerId) {
        self.registry.write().await.touch(peer_id);
    }

    /// Route one text frame from a local peer.
    ///
    /// Invalid frames are logged and dropped; the channel stays open.
    pub async fn handle_text(&self, peer_id: PeerId, text: &str) -> Inbound {
        let mut registry = self.registry.write().await;
        registry.touch(peer_id);
        let Some(room_id) = registry.room_of(peer_id).map(str::to_string) else {
            tracing::debug!(peer_id, "Message from unregistered peer dropped");
            return Inbound::Dropped;
        };

        let kind = match decode_message(text) {
            Ok(msg) => msg.kind(),
            Err(e) => {
                tracing::warn!(peer_id, room = %room_id, error = %e, "Dropping invalid message");
                return Inbound::Dropped;
            },
        };
        if kind == MessageKind::Ping {
            return Inbound::Ping;
        }
        if kind.is_server_only() {
            tracing::warn!(peer_id, room = %room_id, %kind, "Rejected server-only message from client");
            return Inbound::Dropped;
        }

        let local = registry.send_to_room(&room_id, Some(peer_id), &Arc::from(text));
        drop(registry);
        tracing::debug!(peer_id, room = %room_id, %kind, local, "Relayed message");

        self.publish(&room_id, text);
        Inbound::Relayed { local }
    }

    fn publish(&self, room_id: &str, text: &str) {
        let envelope = match wrap_envelope(room_id, self.instance_id, text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(room = %room_id, error = %e, "Failed to wrap message for bus");
                return;
            },
        };
        if let Err(e) = self.bus.publish(&envelope) {
            tracing::warn!(room = %room_id, error = %e, "Bus publish failed");
        }
    }

    /// Relay an envelope from another instance to local room members.
    /// Never re-published.
    pub async fn relay_remote(&self, envelope: &RelayEnvelope) -> usize {
        if envelope.origin == self.instance_id {
            return 0;
        }
        let text = envelope.message_text();
        match decode_message(text) {
            Ok(msg) if msg.kind().is_relayed() => {},
            Ok(msg) => {
                tracing::warn!(room = %envelope.room_id, kind = %msg.kind(), "Dropping non-relayable envelope");
                return 0;
            },
            Err(e) => {
                tracing::warn!(room = %envelope.room_id, error = %e, "Dropping invalid envelope");
                return 0;
            },
        }

        let registry = self.registry.read().await;
        let local = registry.send_to_room(&envelope.room_id, None, &Arc::from(text));
        tracing::debug!(room = %envelope.room_id, origin = %envelope.origin, local, "Relayed remote message");
        local
    }

    /// Close (if the server initiates) and remove a peer. Idempotent.
    pub async fn teardown(&self, peer: &PeerHandle, reason: Teardown) -> Option<Removal> {
        let mut registry = self.registry.write().await;
        teardown_locked(&mut registry, peer, reason)
    }

    /// Close and remove every peer idle for longer than `max_idle`.
    pub async fn evict_idle(&self, now: Instant, max_idle: std::time::Duration) -> usize {
        let mut registry = self.registry.write().await;
        let idle = registry.idle_peers(now, max_idle);
        for peer in &idle {
            tracing::warn!(
                peer_id = peer.id,
                room = registry.room_of(peer.id).unwrap_or_default(),
                "Evicting idle peer"
            );
            teardown_locked(&mut registry, peer, Teardown::Stale);
        }
        idle.len()
    }
}

fn announce_ready(registry: &Registry, room_id: &str) {
    let text = match encode_message(&SignalingMessage::Ready) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(room = %room_id, error = %e, "Failed to encode ready");
            return;
        },
    };
    let sent = registry.send_to_room(room_id, None, &Arc::from(text));
    tracing::info!(room = %room_id, sent, "Room ready");
}

fn teardown_locked(registry: &mut Registry, peer: &PeerHandle, reason: Teardown) -> Option<Removal> {
    if let Some(code) = reason.close_code() {
        peer.close.close(code);
    }
    let removal = registry.remove(peer.id);
    if let Some(ref removal) = removal {
        tracing::info!(
            peer_id = peer.id,
            room = %removal.room_id,
            remaining = removal.remaining,
            ?reason,
            "Peer left room"
        );
        if removal.room_destroyed() {
            tracing::info!(room = %removal.room_id, "Room deleted");
        }
    }
    removal
}
