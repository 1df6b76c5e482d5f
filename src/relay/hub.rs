//! # Relay Hub
//!
//! Transport-independent core of the relay: device groups, the last-known
//! frame per device, and fan-out of updates and commands.
//!
//! ```text
//!  publisher ──publish──▶ ┌──────────────────────────┐ ──update──▶ subscriber A
//!                         │ RelayHub                 │ ──update──▶ subscriber B
//!  operator ──command───▶ │  groups[device] = {conn} │ ──command─▶ (same group)
//!                         │  last[device]   = frame  │
//!                         └──────────────────────────┘
//! ```
//!
//! Each connection registers once and receives its events through an
//! unbounded channel drained by the transport. All state lives behind one
//! lock and every operation is a single atomic update, so concurrent
//! publishes resolve last-write-wins.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace, warn};

use super::protocol::{non_empty_str, Ack, AckOp, ClientMessage, RelayFrame, ServerEvent};
use crate::telemetry::types::now_ms;

/// Identifier of a registered connection.
pub type ConnectionId = u64;

#[derive(Debug, Default)]
struct HubState {
    next_id: ConnectionId,
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>,
    groups: HashMap<String, HashSet<ConnectionId>>,
    last_by_device: HashMap<String, RelayFrame>,
}

impl HubState {
    /// Send to every member of a device group, pruning closed receivers.
    fn broadcast(&mut self, device_id: &str, event: &ServerEvent) -> usize {
        let Some(members) = self.groups.get(device_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for id in members {
            match self.connections.get(id) {
                Some(tx) if tx.send(event.clone()).is_ok() => delivered += 1,
                _ => closed.push(*id),
            }
        }
        for id in closed {
            self.remove(id);
        }
        delivered
    }

    fn remove(&mut self, id: ConnectionId) {
        self.connections.remove(&id);
        self.groups.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
    }
}

/// Shared relay state.
#[derive(Debug, Default)]
pub struct RelayHub {
    state: RwLock<HubState>,
}

impl RelayHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and get the receiver for its outbound events.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.write().await;
        state.next_id += 1;
        let id = state.next_id;
        state.connections.insert(id, tx);
        debug!("Relay connection {} registered", id);
        (id, rx)
    }

    /// Remove a connection from the hub and every group it joined.
    pub async fn disconnect(&self, id: ConnectionId) {
        self.state.write().await.remove(id);
        debug!("Relay connection {} removed", id);
    }

    /// Parse and dispatch one text message.
    ///
    /// Never fails: malformed input yields a rejected acknowledgement.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) -> Ack {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(id, message).await,
            Err(e) => {
                debug!("Connection {} sent an unreadable message: {}", id, e);
                Ack::rejected(AckOp::Invalid, format!("unreadable message: {}", e))
            }
        }
    }

    /// Dispatch one parsed message.
    pub async fn handle(&self, id: ConnectionId, message: ClientMessage) -> Ack {
        match message {
            ClientMessage::Subscribe { device_id } => self.subscribe(id, device_id.as_ref()).await,
            ClientMessage::Publish(frame) => self.publish(frame).await,
            ClientMessage::Command {
                device_id,
                command,
                args,
            } => self.command(device_id.as_ref(), command.as_ref(), args).await,
        }
    }

    /// Join the device's group and return the last stored frame, if any.
    pub async fn subscribe(&self, id: ConnectionId, device_id: Option<&Value>) -> Ack {
        let Some(device_id) = non_empty_str(device_id) else {
            return Ack::rejected(AckOp::Subscribe, "deviceId is required");
        };

        let mut state = self.state.write().await;
        if !state.connections.contains_key(&id) {
            return Ack::rejected(AckOp::Subscribe, "connection is not registered");
        }
        state.groups.entry(device_id.to_string()).or_default().insert(id);
        let last = state.last_by_device.get(device_id).cloned();
        debug!(
            "Connection {} subscribed to {} (snapshot: {})",
            id,
            device_id,
            last.is_some()
        );

        Ack {
            last,
            ..Ack::ok(AckOp::Subscribe)
        }
    }

    /// Store the frame as the device's last-known frame and broadcast it.
    ///
    /// A missing or null `ts` is stamped with the relay's current time.
    pub async fn publish(&self, mut frame: RelayFrame) -> Ack {
        let Some(device_id) = non_empty_str(frame.get("deviceId")).map(str::to_string) else {
            return Ack::rejected(AckOp::Publish, "deviceId is required");
        };

        if frame.get("ts").map_or(true, Value::is_null) {
            frame.insert("ts".to_string(), Value::from(now_ms()));
        }

        let mut state = self.state.write().await;
        state.last_by_device.insert(device_id.clone(), frame.clone());
        let delivered = state.broadcast(&device_id, &ServerEvent::Update(frame));
        trace!("Published frame for {} to {} subscribers", device_id, delivered);
        Ack::ok(AckOp::Publish)
    }

    /// Broadcast a fire-and-forget command to the device's group.
    pub async fn command(&self, device_id: Option<&Value>, command: Option<&Value>, args: Option<Value>) -> Ack {
        let (Some(device_id), Some(command)) = (non_empty_str(device_id), non_empty_str(command)) else {
            return Ack::rejected(AckOp::Command, "deviceId and command are required");
        };

        let event = ServerEvent::Command {
            command: command.to_string(),
            args: args.unwrap_or(Value::Null),
            ts: now_ms(),
        };
        let delivered = self.state.write().await.broadcast(device_id, &event);
        if delivered == 0 {
            warn!("Command '{}' for {} reached no subscriber", command, device_id);
        } else {
            debug!("Command '{}' for {} sent to {} subscribers", command, device_id, delivered);
        }
        Ack::ok(AckOp::Command)
    }

    /// Last stored frame for a device.
    pub async fn last_frame(&self, device_id: &str) -> Option<RelayFrame> {
        self.state.read().await.last_by_device.get(device_id).cloned()
    }

    /// Number of connections subscribed to a device.
    pub async fn group_size(&self, device_id: &str) -> usize {
        self.state.read().await.groups.get(device_id).map_or(0, HashSet::len)
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}
