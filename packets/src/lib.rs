//! Engine.IO / Socket.IO packet model and text codec.
//!
//! This crate owns the wire representation spoken between the relay client
//! and a Socket.IO processing service: Engine.IO v4 packets carrying
//! Socket.IO v5 packets, one packet per websocket text message. Payloads stay
//! flexible (`serde_json::Value`); binary attachments are not supported.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::time::Duration;

/// Engine.IO protocol revision announced in the connect URL.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Namespace used when none is given; omitted on the wire.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Error returned by [`decode_packet`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text message carried no packet type.
    #[error("empty packet")]
    Empty,
    /// The leading character is not a known Engine.IO packet type.
    #[error("unknown engine packet type: {0:?}")]
    UnknownEngineType(char),
    /// The Socket.IO type digit inside a message packet is unknown.
    #[error("unknown socket packet type: {0:?}")]
    UnknownSocketType(char),
    /// Binary events and acks need attachment frames, which are not handled.
    #[error("binary socket packets are not supported")]
    BinaryUnsupported,
    /// The packet body is not valid JSON.
    #[error("invalid packet payload: {0}")]
    Json(#[from] serde_json::Error),
    /// An event or ack payload is not a JSON array of the expected shape.
    #[error("malformed event payload")]
    MalformedEvent,
}

/// Session parameters sent by the server in the Engine.IO open packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Engine.IO session id.
    pub sid: String,
    /// Transports the session may upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Server ping cadence in milliseconds.
    pub ping_interval: u64,
    /// Grace period after a missed ping, in milliseconds.
    pub ping_timeout: u64,
    /// Largest payload the server accepts, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// Longest silence tolerated before the session is considered dead.
    #[must_use]
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// Transport-level packet.
#[derive(Clone, Debug, PartialEq)]
pub enum EnginePacket {
    /// Session open, carrying the handshake.
    Open(Handshake),
    /// Transport close.
    Close,
    /// Heartbeat probe with optional echo data.
    Ping(String),
    /// Heartbeat reply with optional echo data.
    Pong(String),
    /// Application message carrying a Socket.IO packet.
    Message(SocketPacket),
    /// Transport upgrade marker.
    Upgrade,
    /// No-op filler.
    Noop,
}

/// Application-level packet scoped to a namespace.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketPacket {
    /// Namespace connect request (client) or acknowledgement (server).
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    /// Namespace disconnect.
    Disconnect { namespace: String },
    /// Named event with positional arguments.
    Event {
        namespace: String,
        ack_id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    /// Acknowledgement of an event that carried an ack id.
    Ack {
        namespace: String,
        ack_id: u64,
        args: Vec<Value>,
    },
    /// Namespace connect refused by the server.
    ConnectError { namespace: String, data: Value },
}

impl SocketPacket {
    /// Build a fire-and-forget event with a single argument.
    #[must_use]
    pub fn event(namespace: &str, name: &str, arg: Value) -> Self {
        Self::Event {
            namespace: namespace.to_owned(),
            ack_id: None,
            name: name.to_owned(),
            args: vec![arg],
        }
    }

    /// Namespace this packet belongs to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace, .. }
            | Self::Disconnect { namespace }
            | Self::Event { namespace, .. }
            | Self::Ack { namespace, .. }
            | Self::ConnectError { namespace, .. } => namespace,
        }
    }

    fn type_char(&self) -> char {
        match self {
            Self::Connect { .. } => '0',
            Self::Disconnect { .. } => '1',
            Self::Event { .. } => '2',
            Self::Ack { .. } => '3',
            Self::ConnectError { .. } => '4',
        }
    }
}

/// Encode a packet into the text form sent over the websocket.
#[must_use]
pub fn encode_packet(packet: &EnginePacket) -> String {
    match packet {
        EnginePacket::Open(handshake) => {
            // Serializing a struct of strings and integers cannot fail.
            let body = serde_json::to_string(handshake).unwrap_or_default();
            format!("0{body}")
        }
        EnginePacket::Close => "1".to_owned(),
        EnginePacket::Ping(data) => format!("2{data}"),
        EnginePacket::Pong(data) => format!("3{data}"),
        EnginePacket::Message(inner) => format!("4{}", encode_socket_packet(inner)),
        EnginePacket::Upgrade => "5".to_owned(),
        EnginePacket::Noop => "6".to_owned(),
    }
}

/// Decode one websocket text message into a packet.
///
/// # Errors
///
/// Returns [`CodecError`] for empty input, unknown packet types, binary
/// socket packets, invalid JSON bodies, and events without a string name.
pub fn decode_packet(text: &str) -> Result<EnginePacket, CodecError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(CodecError::Empty)?;
    let body = chars.as_str();

    match kind {
        '0' => Ok(EnginePacket::Open(serde_json::from_str(body)?)),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(body.to_owned())),
        '3' => Ok(EnginePacket::Pong(body.to_owned())),
        '4' => Ok(EnginePacket::Message(decode_socket_packet(body)?)),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(CodecError::UnknownEngineType(other)),
    }
}

fn encode_socket_packet(packet: &SocketPacket) -> String {
    let mut out = String::new();
    out.push(packet.type_char());

    let namespace = packet.namespace();
    if namespace != DEFAULT_NAMESPACE {
        out.push_str(namespace);
        out.push(',');
    }

    match packet {
        SocketPacket::Connect { data, .. } => {
            if let Some(data) = data {
                out.push_str(&data.to_string());
            }
        }
        SocketPacket::Disconnect { .. } => {}
        SocketPacket::Event {
            ack_id, name, args, ..
        } => {
            if let Some(id) = ack_id {
                let _ = write!(out, "{id}");
            }
            let mut items = Vec::with_capacity(args.len() + 1);
            items.push(Value::String(name.clone()));
            items.extend(args.iter().cloned());
            out.push_str(&Value::Array(items).to_string());
        }
        SocketPacket::Ack { ack_id, args, .. } => {
            let _ = write!(out, "{ack_id}");
            out.push_str(&Value::Array(args.clone()).to_string());
        }
        SocketPacket::ConnectError { data, .. } => out.push_str(&data.to_string()),
    }

    out
}

fn decode_socket_packet(text: &str) -> Result<SocketPacket, CodecError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(CodecError::Empty)?;
    match kind {
        '0'..='4' => {}
        '5' | '6' => return Err(CodecError::BinaryUnsupported),
        other => return Err(CodecError::UnknownSocketType(other)),
    }
    let mut rest = chars.as_str();

    let namespace = if rest.starts_with('/') {
        if let Some((namespace, tail)) = rest.split_once(',') {
            rest = tail;
            namespace.to_owned()
        } else {
            let namespace = rest.to_owned();
            rest = "";
            namespace
        }
    } else {
        DEFAULT_NAMESPACE.to_owned()
    };

    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let ack_id = rest[..digits].parse::<u64>().ok();
    rest = &rest[digits..];

    let payload = if rest.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Value>(rest)?)
    };

    match kind {
        '0' => Ok(SocketPacket::Connect {
            namespace,
            data: payload,
        }),
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            let Some(Value::Array(mut items)) = payload else {
                return Err(CodecError::MalformedEvent);
            };
            if items.is_empty() {
                return Err(CodecError::MalformedEvent);
            }
            let Value::String(name) = items.remove(0) else {
                return Err(CodecError::MalformedEvent);
            };
            Ok(SocketPacket::Event {
                namespace,
                ack_id,
                name,
                args: items,
            })
        }
        '3' => {
            let (Some(ack_id), Some(Value::Array(args))) = (ack_id, payload) else {
                return Err(CodecError::MalformedEvent);
            };
            Ok(SocketPacket::Ack {
                namespace,
                ack_id,
                args,
            })
        }
        _ => Ok(SocketPacket::ConnectError {
            namespace,
            data: payload.unwrap_or(Value::Null),
        }),
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
