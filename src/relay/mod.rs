//! # Telemetry Relay
//!
//! Authenticated pub/sub relay keyed by device id.
//!
//! ## Modules
//!
//! - `auth`: handshake token extraction and JWT verification
//! - `protocol`: JSON message and event shapes
//! - `hub`: groups, last-known frames and fan-out
//! - `server`: axum WebSocket endpoint

pub mod auth;
pub mod hub;
pub mod protocol;
pub mod server;

pub use auth::{AuthError, Identity, JwtVerifier, TokenVerifier};
pub use hub::RelayHub;
pub use protocol::{Ack, AckOp, ClientMessage, RelayFrame, ServerEvent};
pub use server::RelayServer;
