//! Synchronization layer configuration.

use std::time::Duration;

use crate::{auth::AuthPlacement, reconnect::BackoffConfig};

/// Environment variable holding the realtime endpoint base URL.
pub const ENV_SOCKET_URL: &str = "SYNC_SOCKET_URL";
/// Environment variable holding the REST base URL used by the HTTP fallback.
pub const ENV_API_URL: &str = "SYNC_API_URL";
/// Environment variable overriding the ack timeout, in milliseconds.
pub const ENV_ACK_TIMEOUT_MS: &str = "SYNC_ACK_TIMEOUT_MS";
/// Environment variable overriding the handshake timeout, in milliseconds.
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "SYNC_HANDSHAKE_TIMEOUT_MS";
/// Environment variable overriding the reconnect attempt cap.
pub const ENV_RECONNECT_MAX_ATTEMPTS: &str = "SYNC_RECONNECT_MAX_ATTEMPTS";

/// Configuration for the realtime connection and its delivery guarantees.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    // Endpoints
    /// Realtime endpoint base URL (`http`, `https`, `ws` or `wss`).
    pub socket_url: String,
    /// Socket.IO mount path on the realtime endpoint.
    pub socket_path: String,
    /// REST base URL used by the HTTP fallback.
    pub api_url: String,
    /// Where the auth token is attached during the handshake.
    pub auth_placement: AuthPlacement,

    // Reconnection settings
    /// Delay before the first reconnection attempt.
    pub reconnect_initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub reconnect_max_delay: Duration,
    /// Backoff multiplier for reconnection delays.
    pub reconnect_backoff_factor: f64,
    /// Reconnection attempts before the policy suspends.
    pub reconnect_max_attempts: u32,
    /// Random jitter factor (0.0-1.0) for reconnection delays.
    pub reconnect_jitter: f64,

    // Delivery
    /// How long a send waits for a transport ack before falling back.
    pub ack_timeout: Duration,
    /// Request timeout for the HTTP fallback.
    pub fallback_timeout: Duration,
    /// Maximum number of in-flight sends.
    pub max_pending_sends: usize,

    // Channels
    /// Capacity of the transport command channel.
    pub command_channel_capacity: usize,
    /// Capacity of the lifecycle event channel.
    pub event_channel_capacity: usize,

    // Connection
    /// Timeout for the full connect handshake.
    pub handshake_timeout: Duration,
    /// Maximum inbound message size in bytes. Enforced by the WebSocket
    /// layer; a larger message fails the connection.
    pub max_message_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            socket_url: String::new(),
            socket_path: "/socket.io/".to_string(),
            api_url: String::new(),
            auth_placement: AuthPlacement::Payload,
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_backoff_factor: 2.0,
            reconnect_max_attempts: 5,
            reconnect_jitter: 0.0,
            ack_timeout: Duration::from_secs(5),
            fallback_timeout: Duration::from_secs(10),
            max_pending_sends: 1000,
            command_channel_capacity: 256,
            event_channel_capacity: 64,
            handshake_timeout: Duration::from_secs(10),
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl SyncConfig {
    /// Create a new configuration for the given realtime and REST endpoints.
    pub fn new(socket_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            socket_url: socket_url.into(),
            api_url: api_url.into(),
            ..Default::default()
        }
    }

    /// Build a configuration from `SYNC_*` environment variables.
    ///
    /// `SYNC_SOCKET_URL` is required; `SYNC_API_URL` defaults to the socket
    /// URL. Numeric overrides that fail to parse are reported as errors.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let socket_url =
            lookup(ENV_SOCKET_URL).ok_or_else(|| format!("{ENV_SOCKET_URL} is not set"))?;
        let api_url = lookup(ENV_API_URL).unwrap_or_else(|| socket_url.clone());
        let mut config = Self::new(socket_url, api_url);

        if let Some(raw) = lookup(ENV_ACK_TIMEOUT_MS) {
            config.ack_timeout = Duration::from_millis(parse_number(ENV_ACK_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_HANDSHAKE_TIMEOUT_MS) {
            config.handshake_timeout =
                Duration::from_millis(parse_number(ENV_HANDSHAKE_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_RECONNECT_MAX_ATTEMPTS) {
            config.reconnect_max_attempts = parse_number(ENV_RECONNECT_MAX_ATTEMPTS, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the Socket.IO mount path.
    #[must_use]
    pub fn socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Set where the auth token is attached.
    #[must_use]
    pub fn auth_placement(mut self, placement: AuthPlacement) -> Self {
        self.auth_placement = placement;
        self
    }

    /// Set the reconnection initial delay.
    #[must_use]
    pub fn reconnect_initial_delay(mut self, delay: Duration) -> Self {
        self.reconnect_initial_delay = delay;
        self
    }

    /// Set the maximum reconnection delay.
    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Set the reconnection backoff factor.
    #[must_use]
    pub fn reconnect_backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect_backoff_factor = factor;
        self
    }

    /// Set the maximum reconnection attempts.
    #[must_use]
    pub fn reconnect_max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_max_attempts = attempts;
        self
    }

    /// Set the reconnection jitter factor.
    #[must_use]
    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    /// Set the ack timeout.
    #[must_use]
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the HTTP fallback request timeout.
    #[must_use]
    pub fn fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = timeout;
        self
    }

    /// Set the maximum number of in-flight sends.
    #[must_use]
    pub fn max_pending_sends(mut self, max: usize) -> Self {
        self.max_pending_sends = max;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the maximum inbound message size.
    #[must_use]
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub(crate) fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.reconnect_initial_delay,
            max_delay: self.reconnect_max_delay,
            factor: self.reconnect_backoff_factor,
            jitter: self.reconnect_jitter,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.socket_url.is_empty() {
            return Err("Socket URL cannot be empty".to_string());
        }
        if self.api_url.is_empty() {
            return Err("API URL cannot be empty".to_string());
        }
        if !self.socket_path.starts_with('/') {
            return Err("Socket path must start with '/'".to_string());
        }
        self.backoff().validate()?;
        if self.reconnect_max_attempts == 0 {
            return Err("Max reconnect attempts must be > 0".to_string());
        }
        if self.ack_timeout.is_zero() {
            return Err("Ack timeout must be > 0".to_string());
        }
        if self.fallback_timeout.is_zero() {
            return Err("Fallback timeout must be > 0".to_string());
        }
        if self.handshake_timeout.is_zero() {
            return Err("Handshake timeout must be > 0".to_string());
        }
        if self.max_pending_sends == 0 {
            return Err("Max pending sends must be > 0".to_string());
        }
        if self.max_message_size == 0 {
            return Err("Max message size must be > 0".to_string());
        }
        if self.command_channel_capacity == 0 {
            return Err("Command channel capacity must be > 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("Event channel capacity must be > 0".to_string());
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("{key} must be a non-negative integer, got {raw:?}"))
}
