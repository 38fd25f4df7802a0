use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use tandem_server::broadcast::{MemoryBus, SignalBus};
use tandem_server::config::ServerConfig;
use tandem_server::state::AppState;
use tandem_server::{BackgroundTasks, build_app_with_bus, spawn_background_tasks};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const READY: &str = r#"{"type":"ready"}"#;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    tasks: BackgroundTasks,
    serve: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.tasks.abort();
        self.serve.abort();
    }
}

impl TestServer {
    /// Start a test server on its own in-process bus.
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let bus = Arc::new(MemoryBus::new(config.bus.capacity));
        Self::with_bus(config, bus).await
    }

    /// Start a test server on a shared bus, acting as one of several instances.
    pub async fn with_bus(config: ServerConfig, bus: Arc<dyn SignalBus>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app_with_bus(config, bus);
        let tasks = spawn_background_tasks(&state);

        let serve = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            tasks,
            serve,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Signaling URL for `room`, percent-encoded the way a browser would.
    pub fn ws_url(&self, room: &str) -> String {
        let mut url = Url::parse(&format!("ws://{}/signaling", self.addr)).unwrap();
        url.query_pairs_mut().append_pair("room", room);
        url.into()
    }

    /// Number of registered peers, straight from the registry.
    pub async fn peer_count(&self) -> usize {
        self.state.registry().read().await.stats().1
    }

    /// Wait until the registry holds `expected` peers (2s timeout).
    pub async fn wait_for_peers(&self, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.peer_count().await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {expected} peers"));
    }

    /// Number of peers registered in one room.
    pub async fn room_member_count(&self, room: &str) -> usize {
        self.state
            .registry()
            .read()
            .await
            .members_of(room)
            .map_or(0, <[_]>::len)
    }

    /// Wait until `room` holds `expected` members (2s timeout).
    pub async fn wait_for_room_members(&self, room: &str, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.room_member_count(room).await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {expected} members in {room:?}"));
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Connect two peers to `room` and consume the `ready` each receives.
pub async fn connect_pair(server: &TestServer, room: &str) -> (WsStream, WsStream) {
    let mut a = ws_connect(&server.ws_url(room)).await;
    server.wait_for_room_members(room, 1).await;
    let mut b = ws_connect(&server.ws_url(room)).await;
    assert_eq!(ws_read_text(&mut a).await, READY);
    assert_eq!(ws_read_text(&mut b).await, READY);
    (a, b)
}

pub async fn ws_send_text(stream: &mut WsStream, text: &str) {
    stream.send(Message::text(text.to_string())).await.unwrap();
}

/// Read the next text frame (5s timeout).
pub async fn ws_read_text(stream: &mut WsStream) -> String {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Close(frame))) => panic!("WebSocket closed unexpectedly: {frame:?}"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Try to read a text frame, returning None on timeout.
pub async fn ws_try_read_text(stream: &mut WsStream, timeout_ms: u64) -> Option<String> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

/// Wait for the server's close frame and return its code (5s timeout).
/// Text frames before the close are skipped.
pub async fn ws_read_close_code(stream: &mut WsStream) -> Option<u16> {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("WebSocket error before close: {e}"),
                None => return None,
            }
        }
    })
    .await
    .expect("Timed out waiting for close frame")
}
