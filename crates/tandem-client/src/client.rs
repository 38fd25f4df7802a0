use std::collections::VecDeque;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use tandem_core::net::messages::SignalingMessage;
use tandem_core::net::protocol::{
    MAX_RECONNECT_DELAY, PING_INTERVAL, RECONNECT_STEP, ROOM_QUERY_PARAM, decode_message,
    encode_message,
};
use tandem_core::room::{generate_room_id, is_valid_room_id};

use crate::error::ClientError;
use crate::handlers::SignalingHandlers;
use crate::machine::{Action, ConnectionState, SignalingMachine};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Signaling endpoint, e.g. `ws://host:8080/signaling`.
    pub url: String,
    pub ping_interval: Duration,
    pub reconnect_step: Duration,
    pub max_reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ping_interval: PING_INTERVAL,
            reconnect_step: RECONNECT_STEP,
            max_reconnect_delay: MAX_RECONNECT_DELAY,
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_backoff(mut self, step: Duration, cap: Duration) -> Self {
        self.reconnect_step = step;
        self.max_reconnect_delay = cap;
        self
    }

    /// The endpoint with `room_id` appended as a percent-encoded query pair.
    fn room_url(&self, room_id: &str) -> Result<String, ClientError> {
        let mut url =
            Url::parse(&self.url).map_err(|e| ClientError::InvalidUrl(format!("{}: {e}", self.url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidUrl(format!(
                "{}: scheme must be ws or wss",
                self.url
            )));
        }
        url.query_pairs_mut().append_pair(ROOM_QUERY_PARAM, room_id);
        Ok(url.into())
    }
}

enum Command {
    Connect(oneshot::Sender<Result<(), ClientError>>),
    SetHandlers(SignalingHandlers),
    Send(String),
    Close,
    /// Close, then stop the background task.
    Shutdown,
}

/// Handle to one room's signaling channel.
///
/// A background task owns the socket, keeps it alive with pings, and
/// reconnects after transient closures. Dropping the handle closes the
/// channel.
pub struct SignalingClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl SignalingClient {
    /// Create a client for `room_id`. Nothing is opened until [`connect`].
    ///
    /// [`connect`]: SignalingClient::connect
    pub fn new(config: ClientConfig, room_id: &str) -> Result<Self, ClientError> {
        if room_id.is_empty() {
            return Err(ClientError::MissingRoomId);
        }
        if !is_valid_room_id(room_id) {
            return Err(ClientError::InvalidRoomId(room_id.to_string()));
        }
        let url = config.room_url(room_id)?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let task = tokio::spawn(drive(config, url, command_rx, state_tx));

        Ok(Self {
            commands,
            state,
            task: Some(task),
        })
    }

    /// A fresh room identifier to share with the other peer.
    pub fn random_room_id() -> String {
        generate_room_id()
    }

    /// Open the channel. Returns after the first attempt, which either
    /// connected or scheduled a retry. Fails with `AlreadyConnected` unless
    /// the client is disconnected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect(reply))?;
        rx.await
            .map_err(|_| ClientError::Transport("client task stopped".to_string()))?
    }

    /// Register the peer-connection callbacks, replacing any previous set.
    pub fn set_handlers(&self, handlers: SignalingHandlers) -> Result<(), ClientError> {
        self.command(Command::SetHandlers(handlers))
    }

    pub fn send(&self, msg: &SignalingMessage) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Connected {
            tracing::warn!(kind = %msg.kind(), "Signaling not connected, message not sent");
            return Err(ClientError::NotConnected);
        }
        let text = encode_message(msg)?;
        self.command(Command::Send(text))
    }

    /// Close with `GOING_AWAY`; no reconnect follows.
    pub fn close(&self) {
        let _ = self.command(Command::Close);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Close and wait for the background task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.command(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn command(&self, cmd: Command) -> Result<(), ClientError> {
        self.commands
            .send(cmd)
            .map_err(|_| ClientError::Transport("client task stopped".to_string()))
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
    }
}

/// Socket, timers and callbacks owned by the background task.
struct Driver {
    config: ClientConfig,
    url: String,
    machine: SignalingMachine,
    handlers: Option<SignalingHandlers>,
    socket: Option<WsStream>,
    ping: Option<Interval>,
    reconnect_at: Option<Instant>,
    state_tx: watch::Sender<ConnectionState>,
}

async fn drive(
    config: ClientConfig,
    url: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let machine = SignalingMachine::new(config.reconnect_step, config.max_reconnect_delay);
    let mut driver = Driver {
        config,
        url,
        machine,
        handlers: None,
        socket: None,
        ping: None,
        reconnect_at: None,
        state_tx,
    };

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    let actions = driver.machine.close();
                    driver.apply(actions).await;
                    break;
                };
                if matches!(cmd, Command::Shutdown) {
                    let actions = driver.machine.close();
                    driver.apply(actions).await;
                    break;
                }
                driver.handle_command(cmd).await;
            }
            frame = next_frame(&mut driver.socket) => driver.handle_frame(frame).await,
            () = next_tick(&mut driver.ping) => driver.send_text(ping_text()).await,
            () = sleep_until(driver.reconnect_at) => {
                driver.reconnect_at = None;
                let actions = driver.machine.on_reconnect_due();
                driver.apply(actions).await;
            }
        }
    }
}

impl Driver {
    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(reply) => match self.machine.connect() {
                Ok(actions) => {
                    // Reply once the first attempt has settled
                    self.apply(actions).await;
                    let _ = reply.send(Ok(()));
                },
                Err(e) => {
                    tracing::warn!(url = %self.url, "Signaling already connected or connecting");
                    let _ = reply.send(Err(e));
                },
            },
            Command::SetHandlers(handlers) => self.handlers = Some(handlers),
            Command::Send(text) => self.send_text(text).await,
            Command::Close | Command::Shutdown => {
                let actions = self.machine.close();
                self.apply(actions).await;
            },
        }
    }

    async fn handle_frame(&mut self, frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
            Some(Ok(Message::Close(frame))) => {
                let code = frame.map(|f| u16::from(f.code));
                tracing::info!(url = %self.url, ?code, "Signaling closed by server");
                self.socket = None;
                let actions = self.machine.on_close(code);
                self.apply(actions).await;
            },
            Some(Ok(_)) => {},
            Some(Err(e)) => {
                tracing::warn!(url = %self.url, error = %e, "Signaling transport error");
                self.socket = None;
                let actions = self.machine.on_error();
                self.apply(actions).await;
            },
            None => {
                tracing::warn!(url = %self.url, "Signaling stream ended without close");
                self.socket = None;
                let actions = self.machine.on_error();
                self.apply(actions).await;
            },
        }
    }

    fn dispatch(&mut self, text: &str) {
        let msg = match decode_message(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping invalid signaling message");
                return;
            },
        };
        let kind = msg.kind();
        let Some(handlers) = self.handlers.as_mut() else {
            tracing::warn!(%kind, "Signaling message before handlers were registered, dropped");
            return;
        };
        if !handlers.dispatch(msg) {
            tracing::debug!(%kind, "No handler for signaling message");
        }
    }

    async fn send_text(&mut self, text: String) {
        let Some(socket) = self.socket.as_mut() else {
            tracing::warn!("Signaling not connected, message not sent");
            return;
        };
        if let Err(e) = socket.send(Message::text(text)).await {
            tracing::warn!(error = %e, "Failed to send signaling message");
        }
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        let mut queue = VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Open => {
                    self.publish_state();
                    match tokio_tungstenite::connect_async(self.url.as_str()).await {
                        Ok((socket, _)) => {
                            tracing::info!(url = %self.url, "Signaling connected");
                            self.socket = Some(socket);
                            queue.extend(self.machine.on_open());
                        },
                        Err(e) => {
                            tracing::warn!(url = %self.url, error = %e, "Signaling connect failed");
                            queue.extend(self.machine.on_error());
                        },
                    }
                },
                Action::StartPing => {
                    let period = self.config.ping_interval;
                    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.ping = Some(interval);
                },
                Action::StopPing => self.ping = None,
                Action::ScheduleReconnect(delay) => {
                    tracing::info!(
                        url = %self.url,
                        ?delay,
                        attempt = self.machine.attempts(),
                        "Scheduling signaling reconnect"
                    );
                    self.reconnect_at = Some(Instant::now() + delay);
                },
                Action::CancelReconnect => self.reconnect_at = None,
                Action::NotifyReconnected => {
                    if let Some(handlers) = self.handlers.as_mut() {
                        handlers.notify_reconnected();
                    }
                },
                Action::Close(code) => {
                    if let Some(mut socket) = self.socket.take() {
                        let frame = CloseFrame {
                            code: code.as_u16().into(),
                            reason: Utf8Bytes::from_static(code.reason()),
                        };
                        if let Err(e) = socket.close(Some(frame)).await {
                            tracing::debug!(error = %e, "Close handshake failed");
                        }
                    }
                },
            }
        }
        self.publish_state();
    }

    fn publish_state(&self) {
        self.state_tx.send_if_modified(|current| {
            let next = self.machine.state();
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

fn ping_text() -> String {
    encode_message(&SignalingMessage::Ping).unwrap_or_else(|_| r#"{"type":"ping"}"#.to_string())
}

async fn next_frame(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        },
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
