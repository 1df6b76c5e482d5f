//! # Relay Wire Protocol
//!
//! JSON text messages tagged by `type`.
//!
//! ## Client → Relay
//!
//! | Message | Fields |
//! |---------|--------|
//! | `subscribe` | `deviceId` |
//! | `publish` | `deviceId`, `ts?`, any frame fields |
//! | `command` | `deviceId`, `command`, `args?` |
//!
//! ## Relay → Client
//!
//! | Event | Fields |
//! |-------|--------|
//! | `ack` | `op`, `ok`, `last?`, `error?` (one per inbound message, in order) |
//! | `update` | the stored frame fields |
//! | `command` | `command`, `args`, `ts` |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A frame as stored and broadcast by the relay.
///
/// The relay only interprets `deviceId` and `ts`; every other field is
/// passed through untouched.
pub type RelayFrame = Map<String, Value>;

/// Inbound message from a relay connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "deviceId", default)]
        device_id: Option<Value>,
    },
    Publish(RelayFrame),
    Command {
        #[serde(rename = "deviceId", default)]
        device_id: Option<Value>,
        #[serde(default)]
        command: Option<Value>,
        #[serde(default)]
        args: Option<Value>,
    },
}

/// Operation an acknowledgement answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckOp {
    Subscribe,
    Publish,
    Command,
    /// The message could not be parsed
    Invalid,
}

/// Structured reply to one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub op: AckOp,
    pub ok: bool,
    /// Cold-start snapshot for a successful subscribe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<RelayFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok(op: AckOp) -> Self {
        Self {
            op,
            ok: true,
            last: None,
            error: None,
        }
    }

    pub fn rejected(op: AckOp, error: impl Into<String>) -> Self {
        Self {
            op,
            ok: false,
            last: None,
            error: Some(error.into()),
        }
    }
}

/// Outbound event to a relay connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Ack(Ack),
    Update(RelayFrame),
    Command {
        command: String,
        args: Value,
        ts: i64,
    },
}

/// Read a non-empty string identifier.
pub fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}
