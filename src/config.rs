//! Configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Unset or unparsable numeric values
//! fall back to their defaults.

use std::net::SocketAddr;
use std::time::Duration;

use crate::client::ReconnectPolicy;

/// Settings of the client-side sync core.
///
/// Loaded via [`ClientConfig::from_env`]; [`ClientConfig::default`] carries
/// the same defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint of the relay (e.g. `ws://127.0.0.1:3000/ws`).
    pub ws_url: String,

    /// Base URL of the persistence REST API.
    pub api_url: String,

    /// Identity announced to the relay and recorded as save author.
    pub user_id: Option<String>,

    /// Display name announced to the relay.
    pub username: Option<String>,

    /// Bearer token sent with every persistence API request.
    pub api_token: Option<String>,

    /// Delay unit of the linear reconnect backoff.
    pub reconnect_base_delay: Duration,

    /// Reconnect attempts before going offline.
    pub reconnect_max_retries: u32,

    /// Quiet period before local edits are saved.
    pub autosave_debounce: Duration,

    /// Quiet period before a local cursor move is broadcast.
    pub cursor_debounce: Duration,

    /// Capacity of the upstream [`crate::domain::SyncEvent`] bus.
    pub event_bus_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:3000/ws".to_string(),
            api_url: "http://127.0.0.1:3000".to_string(),
            user_id: None,
            username: None,
            api_token: None,
            reconnect_base_delay: Duration::from_millis(3000),
            reconnect_max_retries: 5,
            autosave_debounce: Duration::from_millis(2000),
            cursor_debounce: Duration::from_millis(50),
            event_bus_capacity: 1024,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            ws_url: std::env::var("SYNC_WS_URL").unwrap_or(defaults.ws_url),
            api_url: std::env::var("SYNC_API_URL").unwrap_or(defaults.api_url),
            user_id: std::env::var("SYNC_USER_ID").ok(),
            username: std::env::var("SYNC_USERNAME").ok(),
            api_token: std::env::var("SYNC_API_TOKEN").ok(),
            reconnect_base_delay: Duration::from_millis(parse_env(
                "RECONNECT_BASE_DELAY_MS",
                3000,
            )),
            reconnect_max_retries: parse_env("RECONNECT_MAX_RETRIES", 5),
            autosave_debounce: Duration::from_millis(parse_env("AUTOSAVE_DEBOUNCE_MS", 2000)),
            cursor_debounce: Duration::from_millis(parse_env("CURSOR_DEBOUNCE_MS", 50)),
            event_bus_capacity: parse_env("EVENT_BUS_CAPACITY", 1024),
        }
    }

    /// The reconnect policy described by this configuration.
    #[must_use]
    pub const fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: self.reconnect_base_delay,
            max_retries: self.reconnect_max_retries,
        }
    }
}

/// Settings of the reference relay binary.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// Capacity of the room broadcast channel.
    pub event_bus_capacity: usize,

    /// Per-request timeout of the REST API.
    pub request_timeout: Duration,
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
            .parse()?;

        let event_bus_capacity = parse_env("EVENT_BUS_CAPACITY", 10_000);
        let request_timeout = Duration::from_secs(parse_env("REQUEST_TIMEOUT_SECS", 30));

        Ok(Self {
            listen_addr,
            event_bus_capacity,
            request_timeout,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
