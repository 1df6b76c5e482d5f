//! # Drone Link Library
//!
//! Real-time telemetry for a single remote device.
//!
//! This library provides:
//! - [`simulator`]: a local device simulator producing plausible telemetry
//! - [`relay`]: an authenticated WebSocket relay fanning out frames and
//!   commands per device id
//! - [`client`]: a connection manager unifying simulated and live sources
//!   behind one interface, with normalization, bounded history, a safety
//!   envelope and crash detection

pub mod client;
pub mod config;
pub mod error;
pub mod relay;
pub mod simulator;
pub mod telemetry;

pub use error::{DroneLinkError, Result};
