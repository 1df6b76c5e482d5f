//! Connection state machine types.

use serde::Serialize;

/// Message used when the live URL is empty.
pub const MISSING_URL_MESSAGE: &str = "Missing WebSocket URL";

/// Message used when an open live socket closes.
pub const DISCONNECTED_MESSAGE: &str = "Disconnected";

/// Current connection of the manager. Exactly one is current at any time.
///
/// ```text
/// Disconnected ──connect_simulator──▶ SimConnected ──disconnect──▶ Disconnected
/// Disconnected ──connect_live(url)──▶ WsConnecting ──open──▶ WsConnected
///                                          │                     │
///                                          └──fail/close──▶ WsError ◀──fail/close
/// ```
///
/// `WsError` is only left through an explicit `disconnect` or `connect_*`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    SimConnected,
    WsConnecting { url: String },
    WsConnected { url: String },
    WsError { url: String, message: String },
}

impl ConnectionState {
    /// Live URL for the socket states.
    pub fn url(&self) -> Option<&str> {
        match self {
            ConnectionState::WsConnecting { url }
            | ConnectionState::WsConnected { url }
            | ConnectionState::WsError { url, .. } => Some(url),
            ConnectionState::Disconnected | ConnectionState::SimConnected => None,
        }
    }
}

/// Kind of telemetry source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Simulator,
    Live,
}

/// Identity of one activation of a source.
///
/// Every connect bumps the epoch, so a frame tagged with an older epoch is
/// stale even when the kind matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceTag {
    pub kind: SourceKind,
    pub epoch: u64,
}
