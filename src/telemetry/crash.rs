//! # Crash Heuristic
//!
//! Flags a probable crash from the two most recent frames: the earlier frame
//! is armed and airborne, the later one is near the ground, the drop is large,
//! and the frames are close enough in time to be consecutive samples.
//!
//! | Threshold | Default |
//! |-----------|---------|
//! | earlier altitude above | 1.0 m |
//! | later altitude below | 0.18 m |
//! | drop greater than | 0.9 m |
//! | frame interval within | 10..=2000 ms |
//! | cooldown between detections | 8000 ms |
//!
//! All thresholds come from [`CrashConfig`] and can be overridden.

use tracing::{debug, info};

use super::types::TelemetryFrame;
use crate::config::CrashConfig;

/// Event log label for a detection.
pub const CRASH_EVENT_LABEL: &str = "Crash detected";

/// Stateful crash detector with a debounce window.
#[derive(Debug, Clone)]
pub struct CrashDetector {
    config: CrashConfig,
    last_detection_ts: Option<i64>,
}

impl Default for CrashDetector {
    fn default() -> Self {
        Self::new(CrashConfig::default())
    }
}

impl CrashDetector {
    #[must_use]
    pub fn new(config: CrashConfig) -> Self {
        Self {
            config,
            last_detection_ts: None,
        }
    }

    pub fn config(&self) -> &CrashConfig {
        &self.config
    }

    /// Timestamp of the last accepted detection.
    pub fn last_detection(&self) -> Option<i64> {
        self.last_detection_ts
    }

    /// Forget the previous detection, reopening the cooldown window.
    pub fn reset(&mut self) {
        self.last_detection_ts = None;
    }

    /// Returns true when the pair looks like a crash, ignoring the cooldown.
    pub fn is_probable_crash(&self, earlier: &TelemetryFrame, later: &TelemetryFrame) -> bool {
        let Some(dt) = later.ts.checked_sub(earlier.ts) else {
            return false;
        };
        if dt < self.config.min_interval_ms || dt > self.config.max_interval_ms {
            return false;
        }

        earlier.status.armed
            && earlier.altitude_m > self.config.min_prior_altitude_m
            && later.altitude_m < self.config.max_impact_altitude_m
            && (earlier.altitude_m - later.altitude_m).abs() > self.config.min_drop_m
    }

    /// Evaluate the newest pair of frames.
    ///
    /// Returns true when a new crash is recorded. A qualifying pair inside the
    /// cooldown window of the previous detection is suppressed and does not
    /// extend the window.
    pub fn evaluate(&mut self, earlier: &TelemetryFrame, later: &TelemetryFrame) -> bool {
        if !self.is_probable_crash(earlier, later) {
            return false;
        }

        if let Some(last) = self.last_detection_ts {
            if later.ts.saturating_sub(last) < self.config.cooldown_ms {
                debug!(
                    "Suppressed crash candidate for {} at {} (cooldown since {})",
                    later.device_id, later.ts, last
                );
                return false;
            }
        }

        self.last_detection_ts = Some(later.ts);
        info!(
            "Probable crash on {}: {:.2} m -> {:.2} m in {} ms",
            later.device_id,
            earlier.altitude_m,
            later.altitude_m,
            later.ts.saturating_sub(earlier.ts)
        );
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::telemetry::types::{
        Attitude, BatteryState, DeviceStatus, Environment, FlightMode, LinkQuality,
    };

    /// Builds a minimal frame for heuristic tests.
    pub(crate) fn frame_at(ts: i64, altitude_m: f64, armed: bool) -> TelemetryFrame {
        TelemetryFrame {
            ts,
            device_id: "test-drone".to_string(),
            firmware_version: None,
            link: LinkQuality { rssi_dbm: -50.0, latency_ms: 40.0 },
            battery: BatteryState { percent: 80.0, voltage: 4.0, current_a: 1.0 },
            env: Environment { temperature_c: 30.0 },
            attitude: Attitude::default(),
            altitude_m,
            status: DeviceStatus { armed, mode: FlightMode::AltHold },
        }
    }

    #[test]
    fn test_detects_sharp_drop() {
        let mut detector = CrashDetector::default();
        assert!(detector.evaluate(&frame_at(0, 1.5, true), &frame_at(500, 0.1, true)));
        assert_eq!(detector.last_detection(), Some(500));
    }

    #[test]
    fn test_cooldown_suppresses_then_reopens() {
        let mut detector = CrashDetector::default();
        assert!(detector.evaluate(&frame_at(0, 1.5, true), &frame_at(500, 0.1, true)));
        // Second qualifying pair inside 8 s of the first detection
        assert!(!detector.evaluate(&frame_at(700, 1.5, true), &frame_at(900, 0.1, true)));
        assert_eq!(detector.last_detection(), Some(500));
        // After the window closes
        assert!(detector.evaluate(&frame_at(9200, 1.5, true), &frame_at(9600, 0.1, true)));
        assert_eq!(detector.last_detection(), Some(9600));
    }

    #[test]
    fn test_disarmed_descent_is_not_a_crash() {
        let detector = CrashDetector::default();
        assert!(!detector.is_probable_crash(&frame_at(0, 1.5, false), &frame_at(500, 0.1, false)));
    }

    #[test]
    fn test_requires_prior_altitude_above_threshold() {
        let detector = CrashDetector::default();
        assert!(!detector.is_probable_crash(&frame_at(0, 1.0, true), &frame_at(500, 0.05, true)));
    }

    #[test]
    fn test_requires_landing_below_threshold() {
        let detector = CrashDetector::default();
        assert!(!detector.is_probable_crash(&frame_at(0, 2.0, true), &frame_at(500, 0.18, true)));
    }

    #[test]
    fn test_requires_large_drop() {
        let config = CrashConfig {
            min_prior_altitude_m: 0.5,
            ..CrashConfig::default()
        };
        let detector = CrashDetector::new(config);
        // 0.95 -> 0.1 drops only 0.85 m
        assert!(!detector.is_probable_crash(&frame_at(0, 0.95, true), &frame_at(500, 0.1, true)));
    }

    #[test]
    fn test_interval_bounds() {
        let detector = CrashDetector::default();
        assert!(!detector.is_probable_crash(&frame_at(0, 1.5, true), &frame_at(5, 0.1, true)));
        assert!(!detector.is_probable_crash(&frame_at(0, 1.5, true), &frame_at(2500, 0.1, true)));
        assert!(detector.is_probable_crash(&frame_at(0, 1.5, true), &frame_at(10, 0.1, true)));
        assert!(detector.is_probable_crash(&frame_at(0, 1.5, true), &frame_at(2000, 0.1, true)));
        // Out-of-order timestamps give a negative interval
        assert!(!detector.is_probable_crash(&frame_at(500, 1.5, true), &frame_at(0, 0.1, true)));
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let mut detector = CrashDetector::default();
        assert!(!detector.evaluate(&frame_at(i64::MIN, 1.5, true), &frame_at(i64::MAX, 0.1, true)));
        assert!(!detector.evaluate(&frame_at(i64::MAX, 1.5, true), &frame_at(i64::MIN, 0.1, true)));

        assert!(detector.evaluate(&frame_at(i64::MAX - 500, 1.5, true), &frame_at(i64::MAX, 0.1, true)));
        // Going back in time from the last detection stays inside the cooldown
        assert!(!detector.evaluate(&frame_at(i64::MIN, 1.5, true), &frame_at(i64::MIN + 500, 0.1, true)));
    }

    #[test]
    fn test_overridden_cooldown() {
        let mut detector = CrashDetector::new(CrashConfig {
            cooldown_ms: 100,
            ..CrashConfig::default()
        });
        assert!(detector.evaluate(&frame_at(0, 1.5, true), &frame_at(500, 0.1, true)));
        assert!(detector.evaluate(&frame_at(600, 1.5, true), &frame_at(700, 0.1, true)));
    }

    #[test]
    fn test_reset_clears_cooldown() {
        let mut detector = CrashDetector::default();
        assert!(detector.evaluate(&frame_at(0, 1.5, true), &frame_at(500, 0.1, true)));
        detector.reset();
        assert!(detector.evaluate(&frame_at(700, 1.5, true), &frame_at(900, 0.1, true)));
    }
}
