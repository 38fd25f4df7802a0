use std::time::Duration;

use serde::Deserialize;

use tandem_core::net::protocol::{IDLE_TIMEOUT, SWEEP_INTERVAL};

/// Top-level server configuration, loaded from `tandem.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub web_root: String,
    pub signaling: SignalingConfig,
    pub limits: LimitsConfig,
    pub bus: BusConfig,
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            web_root: "web".to_string(),
            signaling: SignalingConfig::default(),
            limits: LimitsConfig::default(),
            bus: BusConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Peer liveness policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: IDLE_TIMEOUT.as_secs(),
            sweep_interval_secs: SWEEP_INTERVAL.as_secs(),
        }
    }
}

impl SignalingConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Outbound queue depth per peer. A full queue drops the message.
    pub peer_message_buffer: usize,
    pub ws_rate_limit_per_sec: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 1000,
            peer_message_buffer: 64,
            ws_rate_limit_per_sec: 50.0,
        }
    }
}

/// Cross-instance fanout. Without `relay_url` the bus is process-local.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub topic: String,
    pub relay_url: Option<String>,
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            topic: "signaling".to_string(),
            relay_url: None,
            capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl ServerConfig {
    /// Check the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "listen_addr {:?} is not a valid socket address",
                self.listen_addr
            ));
        }

        if self.signaling.idle_timeout_secs == 0 {
            return Err("signaling.idle_timeout_secs must be > 0".to_string());
        }
        if self.signaling.sweep_interval_secs == 0 {
            return Err("signaling.sweep_interval_secs must be > 0".to_string());
        }
        // Eviction latency is bounded by timeout + one sweep period.
        if self.signaling.sweep_interval_secs >= self.signaling.idle_timeout_secs {
            return Err(
                "signaling.sweep_interval_secs must be smaller than idle_timeout_secs".to_string(),
            );
        }

        if self.limits.max_ws_connections == 0 {
            return Err("limits.max_ws_connections must be > 0".to_string());
        }
        if self.limits.peer_message_buffer == 0 {
            return Err("limits.peer_message_buffer must be > 0".to_string());
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            return Err("limits.ws_rate_limit_per_sec must be > 0".to_string());
        }

        if self.bus.topic.is_empty() {
            return Err("bus.topic must not be empty".to_string());
        }
        if self.bus.capacity == 0 {
            return Err("bus.capacity must be > 0".to_string());
        }
        if let Some(ref url) = self.bus.relay_url
            && !(url.starts_with("ws://") || url.starts_with("wss://"))
        {
            return Err(format!("bus.relay_url {url:?} must be a ws:// or wss:// URL"));
        }

        Ok(())
    }

    /// Load config from `tandem.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("tandem.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from tandem.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse tandem.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No tandem.toml found, using defaults");
                ServerConfig::default()
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = var("TANDEM_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Some(root) = var("TANDEM_WEB_ROOT")
            && !root.is_empty()
        {
            self.web_root = root;
        }
        if let Some(val) = var("TANDEM_IDLE_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.signaling.idle_timeout_secs = n;
        }
        if let Some(val) = var("TANDEM_SWEEP_INTERVAL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.signaling.sweep_interval_secs = n;
        }
        if let Some(val) = var("TANDEM_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Some(val) = var("TANDEM_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.ws_rate_limit_per_sec = n;
        }
        if let Some(topic) = var("TANDEM_BUS_TOPIC")
            && !topic.is_empty()
        {
            self.bus.topic = topic;
        }
        if let Some(url) = var("TANDEM_RELAY_URL")
            && !url.is_empty()
        {
            self.bus.relay_url = Some(url);
        }
        if let Some(val) = var("TANDEM_LOG_JSON") {
            self.logging.json = matches!(val.as_str(), "1" | "true" | "yes");
        }
    }
}
