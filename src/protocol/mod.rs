//! # Protocol Module
//!
//! Framing used between the client and a Pully server.
//!
//! ## Protocol Overview
//!
//! Pully servers speak Socket.IO over a plain WebSocket. Each WebSocket
//! text frame carries one Engine.IO packet, and Engine.IO `message`
//! packets carry one Socket.IO packet:
//!
//! ```text
//! 42/app1,7["send_message",{"channelName":"room1","message":"hi"}]
//! ^^ ^^^^^ ^ ^-- json payload
//! ||   |   `---- ack id (optional)
//! ||   `-------- namespace (omitted for "/")
//! |`------------ socket.io packet type (EVENT)
//! `------------- engine.io packet type (MESSAGE)
//! ```
//!
//! ## Core Types
//!
//! - **EnginePacket**: Engine.IO packets (open, ping, pong, message, ...)
//! - **Packet**: Socket.IO packets (connect, event, ack, ...)
//! - **payload**: Control payloads for subscribe, unsubscribe and send_message
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use tokio_pully::protocol::{EnginePacket, Packet};
//!
//! let packet = Packet::event("/app1", "subscribe", json!({"channel": "room1"}));
//! let frame = EnginePacket::Message(packet.encode()).encode();
//! assert_eq!(frame, r#"42/app1,["subscribe",{"channel":"room1"}]"#);
//! ```

mod payload;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use payload::{ChannelRequest, InboundMessage, SendMessageRequest};

/// Control event emitted to join a channel
pub const SUBSCRIBE: &str = "subscribe";
/// Control event emitted to leave a channel
pub const UNSUBSCRIBE: &str = "unsubscribe";
/// Control event carrying an outbound channel message
pub const SEND_MESSAGE: &str = "send_message";
/// Default event name for inbound messages
pub const RECEIVE_MESSAGE: &str = "message";

/// Engine.IO protocol revision sent as `EIO=` on the upgrade request
pub const ENGINE_PROTOCOL: u8 = 4;
/// Socket.IO main namespace
pub const DEFAULT_NAMESPACE: &str = "/";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,
    #[error("unknown packet type {0:?}")]
    UnknownType(char),
    #[error("binary packets are not supported")]
    Binary,
    #[error("invalid payload: {0}")]
    Payload(String),
}

/// Handshake data sent by the server in the Engine.IO `open` packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl OpenInfo {
    /// Longest silence tolerated before the connection is considered dead
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let body = chars.as_str();

        Ok(match kind {
            '0' => EnginePacket::Open(
                serde_json::from_str(body).map_err(|err| ProtocolError::Payload(err.to_string()))?,
            ),
            '1' => EnginePacket::Close,
            // probe pings ("2probe") only happen during upgrades, the body is irrelevant
            '2' => EnginePacket::Ping,
            '3' => EnginePacket::Pong,
            '4' => EnginePacket::Message(body.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(info) => {
                let mut open = serde_json::json!({
                    "sid": info.sid,
                    "upgrades": info.upgrades,
                    "pingInterval": info.ping_interval,
                    "pingTimeout": info.ping_timeout,
                });
                if let Some(max_payload) = info.max_payload {
                    open["maxPayload"] = max_payload.into();
                }
                format!("0{}", open)
            }
            EnginePacket::Close => "1".into(),
            EnginePacket::Ping => "2".into(),
            EnginePacket::Pong => "3".into(),
            EnginePacket::Message(body) => format!("4{}", body),
            EnginePacket::Upgrade => "5".into(),
            EnginePacket::Noop => "6".into(),
        }
    }
}

/// Socket.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    /// `data` holds the event name followed by its arguments
    Event {
        namespace: String,
        id: Option<u64>,
        data: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        data: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Value,
    },
}

impl Packet {
    /// Builds an EVENT packet with a single argument
    pub fn event(namespace: &str, name: &str, arg: Value) -> Self {
        Packet::Event {
            namespace: namespace.to_string(),
            id: None,
            data: vec![Value::String(name.to_string()), arg],
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Packet::Connect { namespace, .. }
            | Packet::Disconnect { namespace }
            | Packet::Event { namespace, .. }
            | Packet::Ack { namespace, .. }
            | Packet::ConnectError { namespace, .. } => namespace,
        }
    }

    /// Requests an acknowledgement, only meaningful for EVENT packets
    pub fn set_ack_id(&mut self, ack_id: u64) {
        if let Packet::Event { id, .. } = self {
            *id = Some(ack_id);
        }
    }

    /// Event name of an EVENT packet
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Packet::Event { data, .. } => data.first().and_then(Value::as_str),
            _ => None,
        }
    }

    /// Encodes the packet without the Engine.IO `4` prefix
    pub fn encode(&self) -> String {
        let (kind, id) = match self {
            Packet::Connect { .. } => ('0', None),
            Packet::Disconnect { .. } => ('1', None),
            Packet::Event { id, .. } => ('2', *id),
            Packet::Ack { id, .. } => ('3', Some(*id)),
            Packet::ConnectError { .. } => ('4', None),
        };

        let mut out = String::new();
        out.push(kind);

        let namespace = self.namespace();
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }

        if let Some(id) = id {
            out.push_str(&id.to_string());
        }

        match self {
            Packet::Connect { data: Some(data), .. } | Packet::ConnectError { data, .. } => {
                out.push_str(&data.to_string());
            }
            Packet::Event { data, .. } | Packet::Ack { data, .. } => {
                out.push('[');
                for (idx, value) in data.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    out.push_str(&value.to_string());
                }
                out.push(']');
            }
            Packet::Connect { data: None, .. } | Packet::Disconnect { .. } => {}
        }

        out
    }

    /// Decodes a packet from the body of an Engine.IO `message`
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let mut rest = chars.as_str();

        match kind {
            '0'..='4' => {}
            '5' | '6' => return Err(ProtocolError::Binary),
            other => return Err(ProtocolError::UnknownType(other)),
        }

        let namespace = if rest.starts_with('/') {
            let (namespace, tail) = match rest.find(',') {
                Some(idx) => (&rest[..idx], &rest[idx + 1..]),
                None => (rest, ""),
            };
            rest = tail;
            namespace.to_string()
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|err| ProtocolError::Payload(err.to_string()))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let payload = if rest.trim().is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(rest)
                    .map_err(|err| ProtocolError::Payload(err.to_string()))?,
            )
        };

        Ok(match kind {
            '0' => Packet::Connect {
                namespace,
                data: payload,
            },
            '1' => Packet::Disconnect { namespace },
            '2' => {
                let data = match payload {
                    Some(Value::Array(data)) if data.first().is_some_and(Value::is_string) => data,
                    _ => {
                        return Err(ProtocolError::Payload(
                            "event payload must be an array starting with the event name".into(),
                        ));
                    }
                };
                Packet::Event {
                    namespace,
                    id,
                    data,
                }
            }
            '3' => {
                let id = id.ok_or_else(|| ProtocolError::Payload("ack without id".into()))?;
                let data = match payload {
                    Some(Value::Array(data)) => data,
                    None => Vec::new(),
                    Some(_) => {
                        return Err(ProtocolError::Payload("ack payload must be an array".into()));
                    }
                };
                Packet::Ack {
                    namespace,
                    id,
                    data,
                }
            }
            _ => Packet::ConnectError {
                namespace,
                data: payload.unwrap_or(Value::Null),
            },
        })
    }
}

/// Folds Socket.IO arguments into the single value handed to callbacks
///
/// No arguments give `null`, one argument is passed through, several
/// arguments become an array.
pub fn collapse_args(mut args: Vec<Value>) -> Value {
    match args.len() {
        0 => Value::Null,
        1 => args.swap_remove(0),
        _ => Value::Array(args),
    }
}
