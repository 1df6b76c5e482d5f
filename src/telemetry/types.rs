//! # Telemetry Types
//!
//! Frame and control types shared by the simulator, the relay wire protocol
//! and the connection manager.
//!
//! Frames serialize camelCase and nested, which is the canonical shape the
//! simulator emits and the normalizer accepts:
//!
//! ```json
//! {
//!   "ts": 1718000000000,
//!   "deviceId": "sim-drone-01",
//!   "firmwareVersion": "0.1.0",
//!   "link": { "rssiDbm": -48, "latencyMs": 60 },
//!   "battery": { "percent": 92.0, "voltage": 4.13, "currentA": 0.3 },
//!   "env": { "temperatureC": 31.0 },
//!   "attitude": { "rollDeg": 0.0, "pitchDeg": 0.0, "yawDeg": 0.0 },
//!   "altitudeM": 0.0,
//!   "status": { "armed": false, "mode": "STABILIZE" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Throttle range (percent)
pub const THROTTLE_MIN: f64 = 0.0;
/// Throttle range (percent)
pub const THROTTLE_MAX: f64 = 100.0;

/// Stick range for yaw, pitch and roll
pub const STICK_MIN: f64 = -100.0;
/// Stick range for yaw, pitch and roll
pub const STICK_MAX: f64 = 100.0;

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Flight-control behavior mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightMode {
    /// Manual attitude stabilization
    #[default]
    Stabilize,
    /// Altitude hold
    AltHold,
    /// Autonomous guided flight
    Guided,
}

impl FlightMode {
    /// Wire label of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightMode::Stabilize => "STABILIZE",
            FlightMode::AltHold => "ALT_HOLD",
            FlightMode::Guided => "GUIDED",
        }
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Radio link quality.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkQuality {
    /// Signal strength in dBm
    pub rssi_dbm: f64,
    /// Round-trip latency in milliseconds
    pub latency_ms: f64,
}

/// Battery state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryState {
    /// Remaining charge, 0-100
    pub percent: f64,
    /// Pack voltage (per cell)
    pub voltage: f64,
    /// Current draw in amps
    pub current_a: f64,
}

/// Environment readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub temperature_c: f64,
}

/// Attitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attitude {
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
}

/// Arming and mode status reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub armed: bool,
    pub mode: FlightMode,
}

/// One telemetry snapshot for a device at a point in time.
///
/// Frames are immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryFrame {
    /// Unix epoch milliseconds
    pub ts: i64,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    pub link: LinkQuality,
    pub battery: BatteryState,
    pub env: Environment,
    pub attitude: Attitude,
    /// Altitude above takeoff point in meters
    pub altitude_m: f64,
    pub status: DeviceStatus,
}

/// Pilot control inputs.
///
/// Every constructor and merge path keeps throttle in `[0, 100]` and the
/// sticks in `[-100, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Controls {
    pub armed: bool,
    pub mode: FlightMode,
    pub throttle: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl Default for Controls {
    /// Disarmed, STABILIZE, zero throttle, sticks centered.
    fn default() -> Self {
        Self {
            armed: false,
            mode: FlightMode::Stabilize,
            throttle: 0.0,
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
        }
    }
}

/// A partial control update. Absent fields keep their current value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlsDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub armed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<FlightMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll: Option<f64>,
}

/// Clamp a throttle value, mapping NaN to the bottom of the range.
pub fn clamp_throttle(value: f64) -> f64 {
    clamp_or_min(value, THROTTLE_MIN, THROTTLE_MAX)
}

/// Clamp a stick value, mapping NaN to center.
pub fn clamp_stick(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(STICK_MIN, STICK_MAX)
}

fn clamp_or_min(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return min;
    }
    value.clamp(min, max)
}

impl Controls {
    /// Merge a delta into these controls, clamping every numeric field.
    ///
    /// # Examples
    ///
    /// ```
    /// use drone_link::telemetry::types::{Controls, ControlsDelta};
    ///
    /// let controls = Controls::default().merge(&ControlsDelta {
    ///     throttle: Some(250.0),
    ///     roll: Some(-180.0),
    ///     ..ControlsDelta::default()
    /// });
    /// assert_eq!(controls.throttle, 100.0);
    /// assert_eq!(controls.roll, -100.0);
    /// ```
    #[must_use]
    pub fn merge(&self, delta: &ControlsDelta) -> Self {
        Self {
            armed: delta.armed.unwrap_or(self.armed),
            mode: delta.mode.unwrap_or(self.mode),
            throttle: clamp_throttle(delta.throttle.unwrap_or(self.throttle)),
            yaw: clamp_stick(delta.yaw.unwrap_or(self.yaw)),
            pitch: clamp_stick(delta.pitch.unwrap_or(self.pitch)),
            roll: clamp_stick(delta.roll.unwrap_or(self.roll)),
        }
    }
}

/// One entry in the flight event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightEvent {
    /// Unix epoch milliseconds
    pub ts: i64,
    pub label: String,
}

impl FlightEvent {
    /// Create an event stamped with the current time.
    pub fn now(label: impl Into<String>) -> Self {
        Self {
            ts: now_ms(),
            label: label.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controls_default() {
        let controls = Controls::default();
        assert!(!controls.armed);
        assert_eq!(controls.mode, FlightMode::Stabilize);
        assert_eq!(controls.throttle, 0.0);
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let start = Controls {
            armed: true,
            mode: FlightMode::AltHold,
            throttle: 40.0,
            yaw: 10.0,
            pitch: -5.0,
            roll: 3.0,
        };
        let merged = start.merge(&ControlsDelta {
            pitch: Some(20.0),
            ..ControlsDelta::default()
        });
        assert_eq!(merged, Controls { pitch: 20.0, ..start });
    }

    #[test]
    fn test_merge_clamps_all_magnitudes() {
        let inputs = [
            -1e9, -1000.0, -100.5, -100.0, -1.0, 0.0, 0.5, 99.9, 100.0, 100.01, 1e9,
            f64::INFINITY, f64::NEG_INFINITY,
        ];
        for &value in &inputs {
            let merged = Controls::default().merge(&ControlsDelta {
                throttle: Some(value),
                yaw: Some(value),
                pitch: Some(-value),
                roll: Some(value),
                ..ControlsDelta::default()
            });
            assert!((0.0..=100.0).contains(&merged.throttle), "throttle {} for {}", merged.throttle, value);
            for stick in [merged.yaw, merged.pitch, merged.roll] {
                assert!((-100.0..=100.0).contains(&stick), "stick {} for {}", stick, value);
            }
        }
    }

    #[test]
    fn test_merge_nan_falls_back_to_safe_values() {
        let merged = Controls::default().merge(&ControlsDelta {
            throttle: Some(f64::NAN),
            yaw: Some(f64::NAN),
            ..ControlsDelta::default()
        });
        assert_eq!(merged.throttle, 0.0);
        assert_eq!(merged.yaw, 0.0);
    }

    #[test]
    fn test_delta_serializes_only_present_fields() {
        let delta = ControlsDelta {
            throttle: Some(35.0),
            mode: Some(FlightMode::AltHold),
            ..ControlsDelta::default()
        };
        let json = serde_json::to_value(delta).unwrap();
        assert_eq!(json, serde_json::json!({ "mode": "ALT_HOLD", "throttle": 35.0 }));
    }

    #[test]
    fn test_flight_mode_wire_labels() {
        assert_eq!(serde_json::to_string(&FlightMode::AltHold).unwrap(), "\"ALT_HOLD\"");
        assert_eq!(FlightMode::Guided.to_string(), "GUIDED");
        let parsed: FlightMode = serde_json::from_str("\"STABILIZE\"").unwrap();
        assert_eq!(parsed, FlightMode::Stabilize);
    }
}
