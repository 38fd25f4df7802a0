//! Fanout hub for tandem's cross-instance bus.
//!
//! Each server instance holds one WebSocket to `/bus/{topic}`. Every text
//! frame an instance sends is forwarded unmodified to every other instance on
//! the same topic. The hub keeps no history and never inspects payloads.

pub mod hub;

use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use tandem_core::net::protocol::MAX_MESSAGE_SIZE;
use tandem_core::rate_limit::TokenBucket;

use hub::{HubState, MemberId, SharedHubState};

/// Queue depth per member before frames are dropped.
const MEMBER_BUFFER: usize = 256;

/// Frames per second each member may send.
const MEMBER_RATE_LIMIT: f64 = 200.0;

pub fn build_app(max_topics: usize) -> (Router<()>, SharedHubState) {
    let state: SharedHubState = Arc::new(RwLock::new(HubState::new(max_topics)));
    let app = Router::new()
        .route("/bus/{topic}", axum::routing::get(bus_ws_handler))
        .with_state(Arc::clone(&state));
    (app, state)
}

async fn bus_ws_handler(
    ws: WebSocketUpgrade,
    Path(topic): Path<String>,
    State(state): State<SharedHubState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_member_socket(socket, state, topic))
}

async fn handle_member_socket(socket: WebSocket, state: SharedHubState, topic: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<String>(MEMBER_BUFFER);

    let member = match state.write().await.join(&topic, tx) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "Refusing hub member");
            return;
        },
    };
    tracing::info!(topic = %topic, member, "Instance joined topic");

    spawn_member_writer(ws_sender, rx);
    member_read_loop(&mut ws_receiver, &state, &topic, member).await;

    let destroyed = state.write().await.leave(&topic, member);
    tracing::info!(topic = %topic, member, destroyed, "Instance left topic");
}

fn spawn_member_writer(mut ws_sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<String>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });
}

async fn member_read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &SharedHubState,
    topic: &str,
    member: MemberId,
) {
    let mut rate_limiter = TokenBucket::per_second(MEMBER_RATE_LIMIT);

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let frame = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        if frame.is_empty() {
            continue;
        }
        // Envelopes carry a message plus routing fields
        if frame.len() > 2 * MAX_MESSAGE_SIZE {
            tracing::warn!(topic, member, size = frame.len(), "Oversized frame dropped");
            continue;
        }
        if !rate_limiter.try_acquire() {
            tracing::warn!(topic, member, "Member rate limited");
            continue;
        }

        let delivered = state.read().await.fan_out(topic, member, frame.as_str());
        tracing::debug!(topic, member, delivered, "Fanned out frame");
    }
}
