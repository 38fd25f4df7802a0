use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use axum::extract::{FromRequest, Query, Request, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tandem_core::net::protocol::MAX_MESSAGE_SIZE;
use tandem_core::rate_limit::TokenBucket;
use tandem_core::room::is_valid_room_id;

use crate::error::AppError;
use crate::registry::{CloseSignal, Outbound, PeerHandle, PeerId};
use crate::router::{Admission, PeerState, Teardown};
use crate::state::{AppState, ConnectionGuard};

/// Upper bound on flushing a server close frame to an unresponsive socket.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct SignalingQuery {
    room: Option<String>,
}

/// Validate the room identifier, then upgrade. Nothing is registered unless
/// the upgrade goes ahead.
pub async fn signaling_handler(state: AppState, request: Request) -> Result<Response, AppError> {
    let query = Query::<SignalingQuery>::try_from_uri(request.uri())
        .map_err(|e| AppError::BadRequest(format!("Invalid query: {e}")))?;
    let room_id = query
        .0
        .room
        .filter(|room| !room.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing room ID".to_string()))?;
    if !is_valid_room_id(&room_id) {
        return Err(AppError::BadRequest("Invalid room ID".to_string()));
    }

    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(AppError::ServiceUnavailable(
            "Too many connections".to_string(),
        ));
    }

    let ws = WebSocketUpgrade::from_request(request, &state)
        .await
        .map_err(|_| AppError::BadRequest("Expected a WebSocket upgrade".to_string()))?;

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, room_id))
        .into_response())
}

fn advance(peer_id: PeerId, phase: &mut PeerState, next: PeerState) {
    debug_assert!(
        phase.can_transition_to(next),
        "illegal transition {phase:?} -> {next:?}"
    );
    tracing::trace!(peer_id, from = ?phase, to = ?next, "Peer state");
    *phase = next;
}

async fn handle_socket(socket: WebSocket, state: AppState, room_id: String) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let router = &state.router;
    let (ws_sender, mut ws_receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<Outbound>(state.config.limits.peer_message_buffer);
    let peer_id = router.alloc_peer_id().await;
    let peer = PeerHandle::new(peer_id, tx);
    let mut writer = spawn_writer(ws_sender, rx, peer.close.clone(), peer_id);
    let mut phase = PeerState::Opening;

    advance(peer_id, &mut phase, PeerState::Joining);
    match router.admit(&peer, &room_id).await {
        Admission::Joined { .. } => advance(peer_id, &mut phase, PeerState::Joined),
        Admission::Rejected => {
            advance(peer_id, &mut phase, PeerState::Rejected);
            // Let the writer flush the close frame before the socket drops
            drop(peer);
            let _ = writer.await;
            advance(peer_id, &mut phase, PeerState::Closed);
            return;
        },
    }

    let reason = read_loop(&mut ws_receiver, &mut writer, &peer, &state, &room_id).await;
    router.teardown(&peer, reason).await;
    advance(peer_id, &mut phase, PeerState::Closed);
    drop(peer);
    if !writer.is_finished() {
        let _ = writer.await;
    }
}

fn spawn_writer(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    close: CloseSignal,
    peer_id: PeerId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                biased;
                _ = close.closed() => break,
                text = rx.recv() => match text {
                    Some(text) => text,
                    None => return,
                },
            };
            let sent = tokio::select! {
                biased;
                _ = close.closed() => break,
                sent = ws_sender.send(Message::Text(text.to_string().into())) => sent,
            };
            if let Err(e) = sent {
                tracing::debug!(peer_id, error = %e, "WebSocket send failed");
                return;
            }
        }

        // Server-initiated close; a dead socket must not hold the task
        let frame = close.code().map(|code| CloseFrame {
            code: code.as_u16(),
            reason: Utf8Bytes::from_static(code.reason()),
        });
        match tokio::time::timeout(CLOSE_FRAME_TIMEOUT, ws_sender.send(Message::Close(frame))).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => tracing::debug!(peer_id, error = %e, "Close frame not sent"),
            Err(_) => tracing::debug!(peer_id, "Close frame timed out"),
        }
    })
}

async fn read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    writer: &mut JoinHandle<()>,
    peer: &PeerHandle,
    state: &AppState,
    room_id: &str,
) -> Teardown {
    let router = &state.router;
    let peer_id = peer.id;
    let rate = state.config.limits.ws_rate_limit_per_sec;
    let mut rate_limiter = TokenBucket::per_second(rate);

    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            // The server closed this peer; teardown already ran
            code = peer.close.closed() => {
                tracing::debug!(peer_id, room = %room_id, ?code, "Server closed peer");
                return Teardown::Closed;
            }
            // Writer stopped: the socket failed
            _ = &mut *writer => return Teardown::Errored,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                tracing::warn!(peer_id, room = %room_id, error = %e, "WebSocket error");
                return Teardown::Errored;
            },
            None => return Teardown::Closed,
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => return Teardown::Closed,
            Message::Binary(_) => {
                router.touch(peer_id).await;
                tracing::warn!(peer_id, room = %room_id, "Dropping binary frame");
                continue;
            },
            Message::Ping(_) | Message::Pong(_) => {
                router.touch(peer_id).await;
                continue;
            },
        };

        if !rate_limiter.try_acquire() {
            router.touch(peer_id).await;
            tracing::warn!(peer_id, room = %room_id, "Rate limited");
            continue;
        }
        if text.len() > MAX_MESSAGE_SIZE {
            router.touch(peer_id).await;
            tracing::warn!(peer_id, room = %room_id, size = text.len(), "Dropping oversized message");
            continue;
        }

        router.handle_text(peer_id, text.as_str()).await;
    }
}
