//! WebRTC signaling rendezvous server.
//!
//! Peers connect over WebSocket to any path ending in `/signaling` with a
//! `room` query parameter. Two peers per room; once both are present each is
//! sent `ready`, after which offers, answers and ICE candidates are relayed
//! between them. Other instances sharing the same bus see the same rooms.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod health;
pub mod reaper;
pub mod registry;
pub mod router;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use tandem_core::net::protocol::SIGNALING_PATH_SUFFIX;

use broadcast::{MemoryBus, RelayBus, SignalBus};
use config::ServerConfig;
use state::AppState;

/// Build the router and state with the bus chosen by `config.bus`.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let bus = bus_from_config(&config);
    build_app_with_bus(config, bus)
}

/// Build the router and state on an existing bus. Instances built on clones
/// of one `MemoryBus` relay to each other.
pub fn build_app_with_bus(config: ServerConfig, bus: Arc<dyn SignalBus>) -> (Router<()>, AppState) {
    let state = AppState::new(config, bus);

    let app = Router::new()
        .route("/health", axum::routing::get(health::health_check))
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    (app, state)
}

pub fn bus_from_config(config: &ServerConfig) -> Arc<dyn SignalBus> {
    match config.bus.relay_url {
        Some(ref url) => {
            tracing::info!(url = %url, topic = %config.bus.topic, "Using relay hub bus");
            Arc::new(RelayBus::connect(url, &config.bus.topic, config.bus.capacity))
        },
        None => {
            tracing::info!("Using in-process bus");
            Arc::new(MemoryBus::new(config.bus.capacity))
        },
    }
}

/// Handles for the reaper and bus listener of one instance.
pub struct BackgroundTasks {
    pub reaper: JoinHandle<()>,
    pub bus_listener: JoinHandle<()>,
}

impl BackgroundTasks {
    pub fn abort(&self) {
        self.reaper.abort();
        self.bus_listener.abort();
    }
}

pub fn spawn_background_tasks(state: &AppState) -> BackgroundTasks {
    let signaling = &state.config.signaling;
    let reaper = reaper::spawn_idle_reaper(
        state.router.clone(),
        signaling.sweep_interval(),
        signaling.idle_timeout(),
    );
    let bus_listener =
        broadcast::spawn_bus_listener(state.router.clone(), state.router.bus().as_ref());
    BackgroundTasks {
        reaper,
        bus_listener,
    }
}

/// Signaling upgrades for any path ending in `/signaling`, static files for
/// everything else.
async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    if request.uri().path().ends_with(SIGNALING_PATH_SUFFIX) {
        return match ws::signaling_handler(state, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "Signaling request refused");
                e.into_response()
            },
        };
    }

    match ServeDir::new(&state.config.web_root).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}
