//! # Telemetry Module
//!
//! Frame data model and the processing applied to a frame stream.
//!
//! This module handles:
//! - The canonical frame, controls and event types
//! - Normalizing untyped wire payloads into frames
//! - Fixed-capacity histories
//! - The crash heuristic

pub mod crash;
pub mod history;
pub mod normalize;
pub mod types;

pub use crash::CrashDetector;
pub use history::BoundedHistory;
pub use normalize::{normalize, normalize_payload, Rejection};
pub use types::{Controls, ControlsDelta, FlightEvent, FlightMode, TelemetryFrame};
