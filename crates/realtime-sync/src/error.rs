//! Error handling for the synchronization layer.

use std::{any::Any, time::Duration};

use thiserror::Error;

/// The main result type used throughout the synchronization layer.
pub type SyncResult<T> = Result<T, SyncError>;

/// Error type for all synchronization operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transport unreachable or handshake rejected.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// No transport ack within the configured window.
    ///
    /// Internal signal only; it selects the HTTP fallback path and is never
    /// returned from a public API.
    #[error("Ack not received within {after:?}")]
    AckTimeout { after: Duration },

    /// Both the transport ack and the HTTP fallback failed.
    #[error("Send to {channel} failed: {message}")]
    SendFailed { channel: String, message: String },

    /// A subscriber callback panicked during dispatch.
    #[error("Subscriber on {channel} failed: {message}")]
    Subscription { channel: String, message: String },

    /// Pending work was rejected by an explicit teardown.
    #[error("Operation cancelled by disconnect")]
    Cancelled,

    /// The transport is not in the `Connected` state.
    #[error("Transport is not connected")]
    NotConnected,

    /// Malformed or unexpected wire frame.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebSocket errors
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    /// HTTP errors from the fallback path.
    #[error("HTTP error: {message}")]
    Http { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The connect handshake did not finish in time.
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Too many in-flight sends.
    #[error("Capacity exceeded: {message}")]
    CapacityExceeded { message: String },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket {
            message: e.to_string(),
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(e: url::ParseError) -> Self {
        Self::Config {
            message: format!("Invalid URL: {e}"),
        }
    }
}

impl SyncError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a send failure for `channel`.
    pub fn send_failed(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SendFailed {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a subscriber failure for `channel`.
    pub fn subscription(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscription {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an HTTP error.
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a capacity error.
    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a failed connect is worth retrying with backoff.
    ///
    /// Anything else (bad configuration, protocol violations) suspends the
    /// supervisor until a manual retry or a network change.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::WebSocket { .. }
                | Self::Http { .. }
                | Self::Timeout { .. }
                | Self::NotConnected
        )
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}
