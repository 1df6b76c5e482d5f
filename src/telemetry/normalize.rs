//! # Frame Normalization
//!
//! Turns an untyped live-socket payload into a [`TelemetryFrame`] or an
//! explicit [`Rejection`].
//!
//! The boundary schema accepts the shapes devices and the relay actually send:
//!
//! - battery percent as `batteryPct` or `batteryPercent` (or nested `battery.percent`)
//! - link quality flattened (`rssiDbm`, `latencyMs`) or nested under `link`
//! - `armed`/`mode` at the top level or nested under `status`
//! - temperature flattened or nested under `env`
//! - attitude flattened (`rollDeg`, ...) or nested under `attitude`
//!
//! Flattened fields win over nested ones. A field that is absent or has the
//! wrong JSON type is replaced by its documented default:
//!
//! | Field | Default |
//! |-------|---------|
//! | battery percent | 100 |
//! | latency | 60 ms |
//! | signal strength | -65 dBm |
//! | temperature | 30 °C |
//! | current draw | 0.4 A |
//! | voltage | estimated from battery percent |
//! | altitude, attitude | 0 |
//! | armed / mode | false / STABILIZE |
//! | timestamp | time of normalization |
//!
//! Only a missing device id rejects the frame.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::types::{
    Attitude, BatteryState, DeviceStatus, Environment, FlightMode, LinkQuality, TelemetryFrame,
};

pub const DEFAULT_BATTERY_PERCENT: f64 = 100.0;
pub const DEFAULT_LATENCY_MS: f64 = 60.0;
pub const DEFAULT_RSSI_DBM: f64 = -65.0;
pub const DEFAULT_TEMPERATURE_C: f64 = 30.0;
pub const DEFAULT_CURRENT_A: f64 = 0.4;

/// Why an inbound payload was not turned into a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("payload is not valid JSON")]
    InvalidJson,

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no device id")]
    MissingDeviceId,
}

/// Deserialize a field, turning a type mismatch into `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLink {
    #[serde(default, deserialize_with = "lenient")]
    rssi_dbm: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    latency_ms: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBattery {
    #[serde(default, deserialize_with = "lenient")]
    percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    voltage: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    current_a: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnv {
    #[serde(default, deserialize_with = "lenient")]
    temperature_c: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAttitude {
    #[serde(default, deserialize_with = "lenient")]
    roll_deg: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pitch_deg: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    yaw_deg: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct WireStatus {
    #[serde(default, deserialize_with = "lenient")]
    armed: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    mode: Option<FlightMode>,
}

/// Every field a live payload may carry. Nothing here is required.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFrame {
    #[serde(default, deserialize_with = "lenient")]
    device_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    ts: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    firmware_version: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    altitude_m: Option<f64>,

    #[serde(default, deserialize_with = "lenient")]
    battery_pct: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    battery_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    voltage: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    current_a: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    battery: Option<WireBattery>,

    #[serde(default, deserialize_with = "lenient")]
    rssi_dbm: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    latency_ms: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    link: Option<WireLink>,

    #[serde(default, deserialize_with = "lenient")]
    temperature_c: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    env: Option<WireEnv>,

    #[serde(default, deserialize_with = "lenient")]
    roll_deg: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pitch_deg: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    yaw_deg: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    attitude: Option<WireAttitude>,

    #[serde(default, deserialize_with = "lenient")]
    armed: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    mode: Option<FlightMode>,
    #[serde(default, deserialize_with = "lenient")]
    status: Option<WireStatus>,
}

/// Voltage estimate for frames that report a percentage only.
pub fn estimate_voltage(percent: f64) -> f64 {
    let fraction = percent.clamp(0.0, 100.0) / 100.0;
    ((3.3 + fraction * 0.9) * 100.0).round() / 100.0
}

/// Normalize a text payload received from a live socket.
///
/// # Errors
///
/// Returns a [`Rejection`] when the text is not JSON, not an object, or has
/// no device id.
pub fn normalize_payload(text: &str, now_ms: i64) -> Result<TelemetryFrame, Rejection> {
    let value: Value = serde_json::from_str(text).map_err(|_| Rejection::InvalidJson)?;
    normalize(&value, now_ms)
}

/// Largest timestamp magnitude accepted from a device (the calendar range of
/// an epoch-millisecond date, about 275k years either side of 1970).
const MAX_TIMESTAMP_MS: f64 = 8.64e15;

/// Device timestamps outside the calendar range are treated as absent.
fn timestamp_ms(ts: f64) -> Option<i64> {
    (ts.is_finite() && ts.abs() <= MAX_TIMESTAMP_MS).then(|| ts as i64)
}

/// Normalize an already parsed payload.
///
/// # Examples
///
/// ```
/// use drone_link::telemetry::normalize::normalize;
/// use serde_json::json;
///
/// let frame = normalize(&json!({ "deviceId": "d1", "altitudeM": 2.5 }), 1_000).unwrap();
/// assert_eq!(frame.ts, 1_000);
/// assert_eq!(frame.battery.percent, 100.0);
/// assert_eq!(frame.altitude_m, 2.5);
/// ```
pub fn normalize(value: &Value, now_ms: i64) -> Result<TelemetryFrame, Rejection> {
    if !value.is_object() {
        return Err(Rejection::NotAnObject);
    }
    let wire: WireFrame = WireFrame::deserialize(value).map_err(|_| Rejection::NotAnObject)?;

    let device_id = wire
        .device_id
        .filter(|id| !id.is_empty())
        .ok_or(Rejection::MissingDeviceId)?;

    let battery = wire.battery.unwrap_or_default();
    let link = wire.link.unwrap_or_default();
    let env = wire.env.unwrap_or_default();
    let attitude = wire.attitude.unwrap_or_default();
    let status = wire.status.unwrap_or_default();

    let percent = wire
        .battery_pct
        .or(wire.battery_percent)
        .or(battery.percent)
        .map(|pct| pct.clamp(0.0, 100.0))
        .unwrap_or(DEFAULT_BATTERY_PERCENT);

    Ok(TelemetryFrame {
        ts: wire.ts.and_then(timestamp_ms).unwrap_or(now_ms),
        device_id,
        firmware_version: wire.firmware_version,
        link: LinkQuality {
            rssi_dbm: wire.rssi_dbm.or(link.rssi_dbm).unwrap_or(DEFAULT_RSSI_DBM),
            latency_ms: wire.latency_ms.or(link.latency_ms).unwrap_or(DEFAULT_LATENCY_MS),
        },
        battery: BatteryState {
            percent,
            voltage: wire
                .voltage
                .or(battery.voltage)
                .unwrap_or_else(|| estimate_voltage(percent)),
            current_a: wire.current_a.or(battery.current_a).unwrap_or(DEFAULT_CURRENT_A),
        },
        env: Environment {
            temperature_c: wire
                .temperature_c
                .or(env.temperature_c)
                .unwrap_or(DEFAULT_TEMPERATURE_C),
        },
        attitude: Attitude {
            roll_deg: wire.roll_deg.or(attitude.roll_deg).unwrap_or(0.0),
            pitch_deg: wire.pitch_deg.or(attitude.pitch_deg).unwrap_or(0.0),
            yaw_deg: wire.yaw_deg.or(attitude.yaw_deg).unwrap_or(0.0),
        },
        altitude_m: wire.altitude_m.unwrap_or(0.0),
        status: DeviceStatus {
            armed: wire.armed.or(status.armed).unwrap_or(false),
            mode: wire.mode.or(status.mode).unwrap_or_default(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_missing_device_id_is_rejected() {
        assert_eq!(normalize(&json!({ "altitudeM": 3.0 }), NOW), Err(Rejection::MissingDeviceId));
        assert_eq!(normalize(&json!({ "deviceId": "" }), NOW), Err(Rejection::MissingDeviceId));
        assert_eq!(normalize(&json!({ "deviceId": 42 }), NOW), Err(Rejection::MissingDeviceId));
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert_eq!(normalize(&json!([1, 2, 3]), NOW), Err(Rejection::NotAnObject));
        assert_eq!(normalize(&json!("deviceId"), NOW), Err(Rejection::NotAnObject));
        assert_eq!(normalize(&Value::Null, NOW), Err(Rejection::NotAnObject));
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        assert_eq!(normalize_payload("{not json", NOW), Err(Rejection::InvalidJson));
    }

    #[test]
    fn test_out_of_range_timestamp_falls_back_to_now() {
        let frame = normalize(&json!({ "deviceId": "d", "ts": -1e30 }), NOW).unwrap();
        assert_eq!(frame.ts, NOW);
        let frame = normalize(&json!({ "deviceId": "d", "ts": 1e30 }), NOW).unwrap();
        assert_eq!(frame.ts, NOW);
        let frame = normalize(&json!({ "deviceId": "d", "ts": 1234.9 }), NOW).unwrap();
        assert_eq!(frame.ts, 1234);
    }

    #[test]
    fn test_defaults_for_bare_frame() {
        let frame = normalize(&json!({ "deviceId": "d1" }), NOW).unwrap();
        assert_eq!(frame.ts, NOW);
        assert_eq!(frame.battery.percent, 100.0);
        assert_eq!(frame.battery.voltage, 4.2);
        assert_eq!(frame.battery.current_a, 0.4);
        assert_eq!(frame.link.latency_ms, 60.0);
        assert_eq!(frame.link.rssi_dbm, -65.0);
        assert_eq!(frame.env.temperature_c, 30.0);
        assert_eq!(frame.altitude_m, 0.0);
        assert!(!frame.status.armed);
        assert_eq!(frame.status.mode, FlightMode::Stabilize);
        assert_eq!(frame.firmware_version, None);
    }

    #[test]
    fn test_battery_percent_aliases() {
        let a = normalize(&json!({ "deviceId": "d1", "batteryPct": 42 }), NOW).unwrap();
        let b = normalize(&json!({ "deviceId": "d1", "batteryPercent": 42 }), NOW).unwrap();
        assert_eq!(a.battery.percent, 42.0);
        assert_eq!(b.battery.percent, 42.0);

        let both = normalize(
            &json!({ "deviceId": "d1", "batteryPct": 10, "batteryPercent": 90 }),
            NOW,
        )
        .unwrap();
        assert_eq!(both.battery.percent, 10.0);
    }

    #[test]
    fn test_battery_percent_is_clamped() {
        let frame = normalize(&json!({ "deviceId": "d1", "batteryPct": 140 }), NOW).unwrap();
        assert_eq!(frame.battery.percent, 100.0);
        let frame = normalize(&json!({ "deviceId": "d1", "batteryPct": -3 }), NOW).unwrap();
        assert_eq!(frame.battery.percent, 0.0);
    }

    #[test]
    fn test_mistyped_fields_fall_back_to_defaults() {
        let frame = normalize(
            &json!({
                "deviceId": "d1",
                "batteryPct": "full",
                "latencyMs": null,
                "link": "strong",
                "armed": "yes",
                "mode": "ACRO",
                "ts": "yesterday"
            }),
            NOW,
        )
        .unwrap();
        assert_eq!(frame.battery.percent, 100.0);
        assert_eq!(frame.link.latency_ms, 60.0);
        assert!(!frame.status.armed);
        assert_eq!(frame.status.mode, FlightMode::Stabilize);
        assert_eq!(frame.ts, NOW);
    }

    #[test]
    fn test_flat_and_nested_link() {
        let flat = normalize(&json!({ "deviceId": "d1", "rssiDbm": -70, "latencyMs": 80 }), NOW).unwrap();
        let nested = normalize(
            &json!({ "deviceId": "d1", "link": { "rssiDbm": -70, "latencyMs": 80 } }),
            NOW,
        )
        .unwrap();
        assert_eq!(flat.link, nested.link);
        assert_eq!(flat.link.rssi_dbm, -70.0);

        let mixed = normalize(
            &json!({ "deviceId": "d1", "rssiDbm": -50, "link": { "rssiDbm": -90, "latencyMs": 33 } }),
            NOW,
        )
        .unwrap();
        assert_eq!(mixed.link.rssi_dbm, -50.0);
        assert_eq!(mixed.link.latency_ms, 33.0);
    }

    #[test]
    fn test_status_top_level_or_nested() {
        let top = normalize(&json!({ "deviceId": "d1", "armed": true, "mode": "GUIDED" }), NOW).unwrap();
        assert!(top.status.armed);
        assert_eq!(top.status.mode, FlightMode::Guided);

        let nested = normalize(
            &json!({ "deviceId": "d1", "status": { "armed": true, "mode": "ALT_HOLD" } }),
            NOW,
        )
        .unwrap();
        assert!(nested.status.armed);
        assert_eq!(nested.status.mode, FlightMode::AltHold);
    }

    #[test]
    fn test_relay_update_event_normalizes() {
        let frame = normalize_payload(
            r#"{"type":"update","deviceId":"d9","ts":1234,"altitudeM":1.25,"batteryPct":55,"lat":51.5,"lon":-0.1}"#,
            NOW,
        )
        .unwrap();
        assert_eq!(frame.device_id, "d9");
        assert_eq!(frame.ts, 1234);
        assert_eq!(frame.altitude_m, 1.25);
        assert_eq!(frame.battery.percent, 55.0);
    }

    #[test]
    fn test_canonical_frame_normalizes_to_itself() {
        let frame = TelemetryFrame {
            ts: 99,
            device_id: "d1".to_string(),
            firmware_version: Some("1.2.3".to_string()),
            link: LinkQuality { rssi_dbm: -48.0, latency_ms: 61.0 },
            battery: BatteryState { percent: 77.5, voltage: 3.98, current_a: 2.1 },
            env: Environment { temperature_c: 33.2 },
            attitude: Attitude { roll_deg: 4.0, pitch_deg: -2.5, yaw_deg: 181.0 },
            altitude_m: 2.4,
            status: DeviceStatus { armed: true, mode: FlightMode::AltHold },
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(normalize(&value, NOW).unwrap(), frame);
    }

    #[test]
    fn test_estimate_voltage() {
        assert_eq!(estimate_voltage(0.0), 3.3);
        assert_eq!(estimate_voltage(100.0), 4.2);
        assert_eq!(estimate_voltage(50.0), 3.75);
        assert_eq!(estimate_voltage(250.0), 4.2);
    }
}
