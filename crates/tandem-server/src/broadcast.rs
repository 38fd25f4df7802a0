//! Cross-instance fanout of signaling messages.
//!
//! Every instance publishes the messages its own peers send, and relays
//! envelopes published by other instances to its local peers. Delivery is
//! best-effort: nothing is persisted or retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use tandem_core::net::messages::RelayEnvelope;
use tandem_core::net::protocol::{
    MAX_RECONNECT_DELAY, RECONNECT_STEP, decode_envelope, encode_envelope, reconnect_delay,
};

use crate::router::SignalRouter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus has been shut down.
    Closed,
    Encode(String),
    /// The broker connection is down; the envelope was not published.
    Disconnected,
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "bus closed"),
            Self::Encode(e) => write!(f, "failed to encode envelope: {e}"),
            Self::Disconnected => write!(f, "bus broker disconnected"),
        }
    }
}

impl std::error::Error for BusError {}

/// A publish/subscribe channel shared by every server instance.
pub trait SignalBus: Send + Sync {
    fn publish(&self, envelope: &RelayEnvelope) -> Result<(), BusError>;

    /// A new receiver for envelopes published from now on, including this
    /// instance's own publications.
    fn subscribe(&self) -> broadcast::Receiver<RelayEnvelope>;
}

/// In-process bus. Clones share one channel, so several server states in
/// one process behave as separate instances.
#[derive(Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<RelayEnvelope>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl SignalBus for MemoryBus {
    fn publish(&self, envelope: &RelayEnvelope) -> Result<(), BusError> {
        // No receivers means no other instance is listening
        let _ = self.sender.send(envelope.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RelayEnvelope> {
        self.sender.subscribe()
    }
}

/// Bus backed by a `tandem-relay` hub reached over WebSocket.
pub struct RelayBus {
    outbound: mpsc::Sender<String>,
    inbound: broadcast::Sender<RelayEnvelope>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl RelayBus {
    /// Start the hub link for `<relay_url>/bus/<topic>`. Returns immediately;
    /// the connection is established (and re-established) in the background.
    pub fn connect(relay_url: &str, topic: &str, capacity: usize) -> Self {
        let url = format!("{}/bus/{topic}", relay_url.trim_end_matches('/'));
        let (outbound, outbound_rx) = mpsc::channel(capacity);
        let (inbound, _) = broadcast::channel(capacity);
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        tokio::spawn(run_hub_link(
            url,
            outbound_rx,
            inbound.clone(),
            Arc::clone(&connected),
            shutdown.clone(),
        ));

        Self {
            outbound,
            inbound,
            connected,
            shutdown,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl SignalBus for RelayBus {
    fn publish(&self, envelope: &RelayEnvelope) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::Disconnected);
        }
        let text = encode_envelope(envelope).map_err(|e| BusError::Encode(e.to_string()))?;
        self.outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BusError::Disconnected,
            mpsc::error::TrySendError::Closed(_) => BusError::Closed,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<RelayEnvelope> {
        self.inbound.subscribe()
    }
}

impl Drop for RelayBus {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_hub_link(
    url: String,
    mut outbound: mpsc::Receiver<String>,
    inbound: broadcast::Sender<RelayEnvelope>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    let mut failed_attempts: u32 = 0;
    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                tracing::info!(url = %url, "Connected to relay hub");
                failed_attempts = 0;
                connected.store(true, Ordering::Release);
                let (mut sink, mut frames) = stream.split();
                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => {
                            let _ = sink.send(Message::Close(None)).await;
                            connected.store(false, Ordering::Release);
                            return;
                        }
                        text = outbound.recv() => {
                            let Some(text) = text else {
                                connected.store(false, Ordering::Release);
                                return;
                            };
                            if let Err(e) = sink.send(Message::text(text)).await {
                                tracing::warn!(error = %e, "Relay hub send failed");
                                break;
                            }
                        }
                        frame = frames.next() => match frame {
                            Some(Ok(Message::Text(text))) => match decode_envelope(text.as_str()) {
                                Ok(envelope) => {
                                    let _ = inbound.send(envelope);
                                },
                                Err(e) => tracing::warn!(error = %e, "Dropping malformed envelope"),
                            },
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {},
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "Relay hub connection error");
                                break;
                            },
                        },
                    }
                }
                connected.store(false, Ordering::Release);
                tracing::warn!(url = %url, "Lost relay hub connection");
            },
            Err(e) => {
                failed_attempts = failed_attempts.saturating_add(1);
                tracing::warn!(url = %url, error = %e, attempt = failed_attempts, "Relay hub connect failed");
            },
        }

        let delay = reconnect_delay(failed_attempts, RECONNECT_STEP, MAX_RECONNECT_DELAY);
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(delay) => {},
        }
    }
}

/// Relay envelopes from other instances to this instance's peers.
pub fn spawn_bus_listener(router: SignalRouter, bus: &dyn SignalBus) -> JoinHandle<()> {
    let mut envelopes = BroadcastStream::new(bus.subscribe());
    tokio::spawn(async move {
        while let Some(item) = envelopes.next().await {
            match item {
                Ok(envelope) => {
                    router.relay_remote(&envelope).await;
                },
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    tracing::warn!("Bus listener lagged by {n} envelopes");
                },
            }
        }
        tracing::info!("Bus channel closed, stopping listener");
    })
}
