//! Engine.IO v4 / Socket.IO v4 text packet codec.
//!
//! Only the text packet forms that travel over a WebSocket are supported.
//! Binary attachments (`45`/`46`) are rejected as protocol errors.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

/// Engine.IO protocol revision requested in the upgrade URL.
pub const ENGINE_IO_VERSION: &str = "4";

/// Engine.IO `open` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Server ping period, in milliseconds.
    pub ping_interval: u64,
    /// Grace period after a ping, in milliseconds.
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// Longest silence tolerated before the connection is considered dead.
    pub fn ping_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// A decoded wire packet.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    /// `0{...}`: Engine.IO open.
    Open(Handshake),
    /// `1`: Engine.IO close.
    Close,
    /// `2`: heartbeat probe from the server.
    Ping,
    /// `3`: heartbeat reply.
    Pong,
    /// `6`
    Noop,
    /// `40[{...}]`: namespace connect, with the auth payload (client) or
    /// the socket id (server).
    Connect(Option<Value>),
    /// `41`
    Disconnect,
    /// `42[id]["name", payload]`
    Event {
        name: String,
        payload: Value,
        ack_id: Option<u64>,
    },
    /// `43<id>[args...]`
    Ack { ack_id: u64, args: Vec<Value> },
    /// `44{"message": ...}`: namespace connect refused.
    ConnectError(String),
}

impl Packet {
    /// Build an event packet.
    pub fn event(name: impl Into<String>, payload: Value, ack_id: Option<u64>) -> Self {
        Self::Event {
            name: name.into(),
            payload,
            ack_id,
        }
    }

    /// Encode into the text frame sent on the WebSocket.
    pub fn encode(&self) -> SyncResult<String> {
        let text = match self {
            Self::Open(_) => {
                return Err(SyncError::protocol("open packets are server-only"));
            }
            Self::Close => "1".to_string(),
            Self::Ping => "2".to_string(),
            Self::Pong => "3".to_string(),
            Self::Noop => "6".to_string(),
            Self::Connect(None) => "40".to_string(),
            Self::Connect(Some(payload)) => format!("40{}", serde_json::to_string(payload)?),
            Self::Disconnect => "41".to_string(),
            Self::Event {
                name,
                payload,
                ack_id,
            } => {
                let args = Value::Array(vec![Value::String(name.clone()), payload.clone()]);
                let id = ack_id.map(|id| id.to_string()).unwrap_or_default();
                format!("42{id}{}", serde_json::to_string(&args)?)
            }
            Self::Ack { ack_id, args } => format!("43{ack_id}{}", serde_json::to_string(args)?),
            Self::ConnectError(message) => format!(
                "44{}",
                serde_json::to_string(&serde_json::json!({ "message": message }))?
            ),
        };
        Ok(text)
    }

    /// Decode a text frame.
    pub fn decode(text: &str) -> SyncResult<Self> {
        let mut chars = text.chars();
        let engine_type = chars
            .next()
            .ok_or_else(|| SyncError::protocol("empty frame"))?;
        let rest = chars.as_str();

        match engine_type {
            '0' => Ok(Self::Open(serde_json::from_str(rest).map_err(|e| {
                SyncError::protocol(format!("invalid open payload: {e}"))
            })?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => decode_socket_packet(rest),
            '6' => Ok(Self::Noop),
            other => Err(SyncError::protocol(format!(
                "unsupported engine packet type '{other}'"
            ))),
        }
    }
}

fn decode_socket_packet(text: &str) -> SyncResult<Packet> {
    let mut chars = text.chars();
    let socket_type = chars
        .next()
        .ok_or_else(|| SyncError::protocol("empty socket packet"))?;
    let body = strip_namespace(chars.as_str());

    match socket_type {
        '0' => {
            if body.is_empty() {
                Ok(Packet::Connect(None))
            } else {
                Ok(Packet::Connect(Some(serde_json::from_str(body)?)))
            }
        }
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let (ack_id, body) = split_ack_id(body)?;
            let mut args = parse_args(body)?.into_iter();
            let name = match args.next() {
                Some(Value::String(name)) => name,
                _ => return Err(SyncError::protocol("event without a name")),
            };
            Ok(Packet::Event {
                name,
                payload: args.next().unwrap_or(Value::Null),
                ack_id,
            })
        }
        '3' => {
            let (ack_id, body) = split_ack_id(body)?;
            let ack_id = ack_id.ok_or_else(|| SyncError::protocol("ack without an id"))?;
            Ok(Packet::Ack {
                ack_id,
                args: parse_args(body)?,
            })
        }
        '4' => {
            let message = match serde_json::from_str::<Value>(body) {
                Ok(Value::Object(map)) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| body.to_string()),
                Ok(Value::String(s)) => s,
                _ => body.to_string(),
            };
            Ok(Packet::ConnectError(message))
        }
        other => Err(SyncError::protocol(format!(
            "unsupported socket packet type '{other}'"
        ))),
    }
}

/// Drop a `/namespace,` prefix; everything runs on the main namespace.
fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn split_ack_id(body: &str) -> SyncResult<(Option<u64>, &str)> {
    let digits = body.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Ok((None, body));
    }
    let id = body[..digits]
        .parse()
        .map_err(|_| SyncError::protocol("ack id out of range"))?;
    Ok((Some(id), &body[digits..]))
}

fn parse_args(body: &str) -> SyncResult<Vec<Value>> {
    match serde_json::from_str(body)? {
        Value::Array(args) => Ok(args),
        _ => Err(SyncError::protocol("packet arguments must be an array")),
    }
}
