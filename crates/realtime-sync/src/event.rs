//! Typed domain events and the wire names they travel under.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{SyncError, SyncResult};

/// Outbound: join a remote room.
pub const JOIN_CHAT: &str = "join_chat";
/// Outbound: leave a remote room.
pub const LEAVE_CHAT: &str = "leave_chat";
/// Outbound: send a chat message (acked).
pub const SEND_MESSAGE: &str = "send_message";
/// Inbound: chat message.
pub const NEW_MESSAGE: &str = "new_message";
/// Inbound: property changed.
pub const PROPERTY_UPDATE: &str = "property-update";
/// Inbound: booking changed.
pub const BOOKING_UPDATE: &str = "booking-update";
/// Inbound: user notification.
pub const NEW_NOTIFICATION: &str = "new-notification";

/// Logical subscription scope multiplexed over the connection
/// (e.g. `chat:42`, `property:7`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Create a new channel id.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Correlates one logical send across the ack and fallback paths.
/// Uses ULID for lexicographically sortable, unique IDs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new unique correlation ID.
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event categories carried by the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// `new_message`
    ChatMessage,
    /// `property-update`
    PropertyUpdate,
    /// `booking-update`
    BookingUpdate,
    /// `new-notification`
    Notification,
}

impl EventCategory {
    /// All categories, in wire-table order.
    pub const ALL: [EventCategory; 4] = [
        Self::ChatMessage,
        Self::PropertyUpdate,
        Self::BookingUpdate,
        Self::Notification,
    ];

    /// Inbound frame name for this category.
    pub fn frame_name(self) -> &'static str {
        match self {
            Self::ChatMessage => NEW_MESSAGE,
            Self::PropertyUpdate => PROPERTY_UPDATE,
            Self::BookingUpdate => BOOKING_UPDATE,
            Self::Notification => NEW_NOTIFICATION,
        }
    }

    /// Look up the category for an inbound frame name.
    pub fn from_frame_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.frame_name() == name)
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.frame_name())
    }
}

/// A chat message pushed by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "_id")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A property record changed server-side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A booking record changed server-side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A user-facing notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload schema per category.
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    Chat(ChatMessage),
    Property(PropertyUpdate),
    Booking(BookingUpdate),
    Notification(Notification),
}

impl EventPayload {
    /// Category of this payload.
    pub fn category(&self) -> EventCategory {
        match self {
            Self::Chat(_) => EventCategory::ChatMessage,
            Self::Property(_) => EventCategory::PropertyUpdate,
            Self::Booking(_) => EventCategory::BookingUpdate,
            Self::Notification(_) => EventCategory::Notification,
        }
    }
}

/// An inbound event routed to channel and category subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelEvent {
    pub channel_id: ChannelId,
    pub payload: EventPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    channel_id: ChannelId,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl ChannelEvent {
    /// Category of this event.
    pub fn category(&self) -> EventCategory {
        self.payload.category()
    }

    /// Chat payload, if this is a chat message.
    pub fn as_chat(&self) -> Option<&ChatMessage> {
        match &self.payload {
            EventPayload::Chat(msg) => Some(msg),
            _ => None,
        }
    }

    /// Validate an inbound frame against the schema of its category.
    ///
    /// Returns `Ok(None)` for frame names this layer does not route.
    pub fn from_frame(name: &str, payload: Value) -> SyncResult<Option<Self>> {
        let Some(category) = EventCategory::from_frame_name(name) else {
            return Ok(None);
        };

        let Envelope { channel_id, fields } = serde_json::from_value(payload)
            .map_err(|e| SyncError::protocol(format!("{name}: {e}")))?;
        let fields = Value::Object(fields);

        let payload = match category {
            EventCategory::ChatMessage => EventPayload::Chat(serde_json::from_value(fields)?),
            EventCategory::PropertyUpdate => {
                EventPayload::Property(serde_json::from_value(fields)?)
            }
            EventCategory::BookingUpdate => EventPayload::Booking(serde_json::from_value(fields)?),
            EventCategory::Notification => {
                EventPayload::Notification(serde_json::from_value(fields)?)
            }
        };

        Ok(Some(Self {
            channel_id,
            payload,
        }))
    }
}
