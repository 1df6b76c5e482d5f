//! # Client Module
//!
//! Client-side view of one device's telemetry.
//!
//! This module handles:
//! - Switching between the simulator and a live socket as the active source
//! - Normalizing live payloads and keeping bounded histories
//! - Applying the safety envelope to outgoing controls
//! - Crash detection and the flight event log
//! - High-level flight intents (takeoff, land, hover, emergency stop)

pub mod intents;
pub mod live;
pub mod manager;
pub mod safety;
pub mod state;

pub use intents::FlightIntent;
pub use manager::{ConnectionManager, ManagerSnapshot};
pub use safety::SafetyLimits;
pub use state::{ConnectionState, SourceKind};
