//! # Safety Envelope
//!
//! Operator-adjustable limits applied to outgoing controls on top of the
//! per-field range clamping.
//!
//! | Cap | Formula |
//! |-----|---------|
//! | throttle | `clamp(min(speed_limit, max_altitude / 6 × 100), 0, 100)` |
//! | stick | `clamp(min(training ? 55 : 100, speed_limit), 10, 100)` |

use crate::config::SafetyConfig;
use crate::simulator::ALTITUDE_CEILING_M;
use crate::telemetry::types::{clamp_stick, clamp_throttle, ControlsDelta};

/// Stick authority while in training mode, in percent
pub const TRAINING_STICK_LIMIT: f64 = 55.0;

/// Lowest stick cap ever applied, in percent
pub const MIN_STICK_CAP: f64 = 10.0;

/// Derived caps for the current safety configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyLimits {
    config: SafetyConfig,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self::new(SafetyConfig::default())
    }
}

impl SafetyLimits {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    /// Highest throttle the envelope allows.
    pub fn throttle_cap(&self) -> f64 {
        let altitude_cap = self.config.max_altitude_m / ALTITUDE_CEILING_M * 100.0;
        finite_or(self.config.speed_limit_pct.min(altitude_cap), 100.0).clamp(0.0, 100.0)
    }

    /// Largest stick deflection the envelope allows, either direction.
    pub fn stick_cap(&self) -> f64 {
        let authority = if self.config.training { TRAINING_STICK_LIMIT } else { 100.0 };
        finite_or(authority.min(self.config.speed_limit_pct), 100.0).clamp(MIN_STICK_CAP, 100.0)
    }

    /// Range-clamp a delta, then cap throttle and sticks.
    ///
    /// # Examples
    ///
    /// ```
    /// use drone_link::client::safety::SafetyLimits;
    /// use drone_link::config::SafetyConfig;
    /// use drone_link::telemetry::types::ControlsDelta;
    ///
    /// let limits = SafetyLimits::new(SafetyConfig { max_altitude_m: 3.0, speed_limit_pct: 100.0, training: true });
    /// let delta = limits.apply(&ControlsDelta { throttle: Some(90.0), roll: Some(-90.0), ..Default::default() });
    /// assert_eq!(delta.throttle, Some(50.0));
    /// assert_eq!(delta.roll, Some(-55.0));
    /// ```
    #[must_use]
    pub fn apply(&self, delta: &ControlsDelta) -> ControlsDelta {
        let throttle_cap = self.throttle_cap();
        let stick_cap = self.stick_cap();
        let stick = |value: f64| clamp_stick(value).clamp(-stick_cap, stick_cap);

        ControlsDelta {
            armed: delta.armed,
            mode: delta.mode,
            throttle: delta.throttle.map(|value| clamp_throttle(value).min(throttle_cap)),
            yaw: delta.yaw.map(stick),
            pitch: delta.pitch.map(stick),
            roll: delta.roll.map(stick),
        }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_altitude_m: f64, speed_limit_pct: f64, training: bool) -> SafetyLimits {
        SafetyLimits::new(SafetyConfig {
            max_altitude_m,
            speed_limit_pct,
            training,
        })
    }

    #[test]
    fn test_default_caps_are_full_range() {
        let limits = SafetyLimits::default();
        assert_eq!(limits.throttle_cap(), 100.0);
        assert_eq!(limits.stick_cap(), 100.0);
    }

    #[test]
    fn test_throttle_cap_follows_altitude() {
        assert_eq!(limits(3.0, 100.0, false).throttle_cap(), 50.0);
        assert_eq!(limits(6.0, 40.0, false).throttle_cap(), 40.0);
    }

    #[test]
    fn test_stick_cap() {
        assert_eq!(limits(6.0, 100.0, true).stick_cap(), 55.0);
        assert_eq!(limits(6.0, 30.0, true).stick_cap(), 30.0);
        // Floor at 10 even when the speed limit goes below it
        assert_eq!(limits(6.0, 5.0, false).stick_cap(), 10.0);
    }

    #[test]
    fn test_apply_leaves_absent_fields_absent() {
        let delta = ControlsDelta {
            armed: Some(true),
            ..Default::default()
        };
        assert_eq!(limits(1.0, 20.0, true).apply(&delta), delta);
    }

    #[test]
    fn test_apply_clamps_out_of_range_values() {
        let applied = SafetyLimits::default().apply(&ControlsDelta {
            throttle: Some(-20.0),
            yaw: Some(400.0),
            pitch: Some(f64::NAN),
            roll: Some(-400.0),
            ..Default::default()
        });
        assert_eq!(applied.throttle, Some(0.0));
        assert_eq!(applied.yaw, Some(100.0));
        assert_eq!(applied.pitch, Some(0.0));
        assert_eq!(applied.roll, Some(-100.0));
    }

    #[test]
    fn test_apply_caps_throttle_and_sticks() {
        let applied = limits(6.0, 60.0, false).apply(&ControlsDelta {
            throttle: Some(80.0),
            yaw: Some(-75.0),
            pitch: Some(30.0),
            ..Default::default()
        });
        assert_eq!(applied.throttle, Some(60.0));
        assert_eq!(applied.yaw, Some(-60.0));
        assert_eq!(applied.pitch, Some(30.0));
    }
}
