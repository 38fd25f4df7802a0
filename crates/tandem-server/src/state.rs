use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::broadcast::SignalBus;
use crate::config::ServerConfig;
use crate::registry::Registry;
use crate::router::SignalRouter;

pub type SharedRegistry = Arc<RwLock<Registry>>;

#[derive(Clone)]
pub struct AppState {
    pub router: SignalRouter,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: ServerConfig, bus: Arc<dyn SignalBus>) -> Self {
        let instance_id = Uuid::new_v4();
        let registry: SharedRegistry = Arc::new(RwLock::new(Registry::new()));
        Self {
            router: SignalRouter::new(registry, bus, instance_id),
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        self.router.registry()
    }
}

/// Counts one open WebSocket for as long as it lives.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}
