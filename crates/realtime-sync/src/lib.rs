//! # realtime-sync
//!
//! Client-side real-time synchronization layer for a property-rental app.
//!
//! One Socket.IO connection carries chat messages and domain updates for
//! many logical channels. The crate keeps that connection alive and
//! multiplexes subscriptions over it. It also makes sure every chat send
//! reaches the server, over the socket or over HTTP.
//!
//! ## Features
//!
//! - **Single connection**: one [`TransportConnection`] per service, with heartbeat supervision
//! - **Reconnection**: exponential backoff, network-aware pause/resume, suspension after a cap
//! - **Channel multiplexing**: reference-counted rooms; join/leave only on first/last subscriber
//! - **Category fan-out**: in-process [`EventBus`] for chat, property, booking and notification events
//! - **Delivery guarantees**: acked sends with exactly one HTTP fallback on timeout
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use realtime_sync::{EventCategory, StaticTokenStore, SyncConfig, SyncService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::from_env()?;
//!     let service = SyncService::with_http_fallback(config, Arc::new(StaticTokenStore::new("jwt")))?;
//!
//!     if !service.initialize("rental-app").await {
//!         eprintln!("offline for now; retrying in the background");
//!     }
//!
//!     let _bookings = service.subscribe_to_category(EventCategory::BookingUpdate, |event| {
//!         println!("booking changed on {}", event.channel_id);
//!     });
//!
//!     service.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod fallback;
pub mod network;
pub mod pending;
pub mod protocol;
pub mod reconnect;
pub mod registry;
pub mod sender;
pub mod service;
pub mod transport;

// Re-export commonly used types
pub use auth::{AuthPlacement, StaticTokenStore, TokenStore};
pub use bus::{BusSubscription, EventBus};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use event::{
    BookingUpdate, ChannelEvent, ChannelId, ChatMessage, CorrelationId, EventCategory,
    EventPayload, Notification, PropertyUpdate,
};
#[cfg(feature = "http-fallback")]
pub use fallback::ReqwestFallback;
pub use fallback::{HttpFallback, OutgoingMessage};
pub use network::NetworkMonitor;
pub use reconnect::{Decision, ReconnectState, ReconnectionPolicy};
pub use registry::{ChannelRegistry, Subscription};
pub use sender::{Delivery, MessageSender, SendReceipt};
pub use service::{ConnectionStatus, SyncService};
pub use transport::{ConnectionState, Emitter, FrameSink, TransportConnection, TransportEvent};
