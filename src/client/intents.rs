//! # Flight Intents
//!
//! High-level pilot actions expressed as control updates through the
//! manager's safety envelope. Each intent records its label in the event log.
//!
//! | Intent | Controls |
//! |--------|----------|
//! | Takeoff | armed, GUIDED/28% in training, ALT_HOLD/35% otherwise |
//! | Land | throttle 0, disarm 900 ms later |
//! | Hover | armed, ALT_HOLD, 25%, sticks centered |
//! | Emergency stop | disarmed, throttle 0, sticks centered |

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::manager::ConnectionManager;
use crate::telemetry::types::{ControlsDelta, FlightMode};

/// Delay between cutting throttle and disarming on landing
pub const LAND_DISARM_DELAY: Duration = Duration::from_millis(900);

const TAKEOFF_THROTTLE: f64 = 35.0;
const TAKEOFF_THROTTLE_TRAINING: f64 = 28.0;
const HOVER_THROTTLE: f64 = 25.0;

/// A pilot action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightIntent {
    Takeoff,
    Land,
    Hover,
    EmergencyStop,
    Arm,
    Disarm,
    SetMode(FlightMode),
}

impl FlightIntent {
    /// Event log label.
    pub fn label(&self) -> String {
        match self {
            FlightIntent::Takeoff => "Takeoff".to_string(),
            FlightIntent::Land => "Land".to_string(),
            FlightIntent::Hover => "Hover".to_string(),
            FlightIntent::EmergencyStop => "Emergency Stop".to_string(),
            FlightIntent::Arm => "Arm".to_string(),
            FlightIntent::Disarm => "Disarm".to_string(),
            FlightIntent::SetMode(mode) => format!("Mode: {}", mode_label(*mode)),
        }
    }

    /// Control update issued immediately.
    pub fn controls(&self, training: bool) -> ControlsDelta {
        let centered = ControlsDelta {
            yaw: Some(0.0),
            pitch: Some(0.0),
            roll: Some(0.0),
            ..ControlsDelta::default()
        };

        match self {
            FlightIntent::Takeoff => ControlsDelta {
                armed: Some(true),
                mode: Some(if training { FlightMode::Guided } else { FlightMode::AltHold }),
                throttle: Some(if training { TAKEOFF_THROTTLE_TRAINING } else { TAKEOFF_THROTTLE }),
                ..ControlsDelta::default()
            },
            FlightIntent::Land => ControlsDelta {
                throttle: Some(0.0),
                ..ControlsDelta::default()
            },
            FlightIntent::Hover => ControlsDelta {
                armed: Some(true),
                mode: Some(FlightMode::AltHold),
                throttle: Some(HOVER_THROTTLE),
                ..centered
            },
            FlightIntent::EmergencyStop => ControlsDelta {
                armed: Some(false),
                throttle: Some(0.0),
                ..centered
            },
            FlightIntent::Arm => ControlsDelta {
                armed: Some(true),
                ..ControlsDelta::default()
            },
            FlightIntent::Disarm => ControlsDelta {
                armed: Some(false),
                ..ControlsDelta::default()
            },
            FlightIntent::SetMode(mode) => ControlsDelta {
                mode: Some(*mode),
                ..ControlsDelta::default()
            },
        }
    }
}

fn mode_label(mode: FlightMode) -> &'static str {
    match mode {
        FlightMode::Stabilize => "Stabilize",
        FlightMode::AltHold => "Altitude Hold",
        FlightMode::Guided => "Guided",
    }
}

impl ConnectionManager {
    /// Carry out a pilot action.
    ///
    /// `Land` schedules its disarm on the Tokio runtime; the disarm is skipped
    /// when the source changed in the meantime.
    pub fn perform(&self, intent: FlightIntent) {
        let training = self.safety_limits().config().training;
        info!("Flight intent: {}", intent.label());
        self.set_controls(&intent.controls(training));
        self.log_event(&intent.label());

        if intent == FlightIntent::Land {
            let Some(tag) = self.shared.active_tag() else {
                return;
            };
            let weak = Arc::downgrade(&self.shared);
            tokio::spawn(async move {
                tokio::time::sleep(LAND_DISARM_DELAY).await;
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                if shared.active_tag() != Some(tag) {
                    debug!("Source changed before landing completed, disarm skipped");
                    return;
                }
                shared.set_controls(&FlightIntent::Disarm.controls(false));
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::state::ConnectionState;
    use crate::config::SafetyConfig;
    use crate::simulator::Simulator;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(Arc::new(Simulator::with_seed("sim-test", 3)))
    }

    #[test]
    fn test_labels() {
        assert_eq!(FlightIntent::EmergencyStop.label(), "Emergency Stop");
        assert_eq!(FlightIntent::SetMode(FlightMode::AltHold).label(), "Mode: Altitude Hold");
    }

    #[test]
    fn test_takeoff_depends_on_training() {
        let normal = FlightIntent::Takeoff.controls(false);
        assert_eq!(normal.mode, Some(FlightMode::AltHold));
        assert_eq!(normal.throttle, Some(35.0));

        let training = FlightIntent::Takeoff.controls(true);
        assert_eq!(training.mode, Some(FlightMode::Guided));
        assert_eq!(training.throttle, Some(28.0));
        assert_eq!(training.roll, None);
    }

    #[test]
    fn test_emergency_stop_centers_everything() {
        let delta = FlightIntent::EmergencyStop.controls(false);
        assert_eq!(delta.armed, Some(false));
        assert_eq!(delta.throttle, Some(0.0));
        assert_eq!((delta.yaw, delta.pitch, delta.roll), (Some(0.0), Some(0.0), Some(0.0)));
    }

    #[test]
    fn test_perform_logs_and_applies() {
        let manager = manager();
        manager.perform(FlightIntent::Hover);
        let controls = manager.controls();
        assert!(controls.armed);
        assert_eq!(controls.mode, FlightMode::AltHold);
        assert_eq!(controls.throttle, 25.0);
        assert_eq!(manager.events().last().map(|e| e.label.clone()), Some("Hover".to_string()));
    }

    #[test]
    fn test_takeoff_respects_training_flag() {
        let manager = manager();
        manager.set_safety_limits(SafetyConfig {
            training: true,
            ..SafetyConfig::default()
        });
        manager.perform(FlightIntent::Takeoff);
        assert_eq!(manager.controls().mode, FlightMode::Guided);
        assert_eq!(manager.controls().throttle, 28.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_land_disarms_after_delay() {
        let manager = manager();
        manager.connect_simulator();
        manager.perform(FlightIntent::Takeoff);
        assert!(manager.controls().armed);

        manager.perform(FlightIntent::Land);
        assert_eq!(manager.controls().throttle, 0.0);
        assert!(manager.controls().armed);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(!manager.controls().armed);
        assert_eq!(manager.state(), ConnectionState::SimConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_land_disarm_skipped_after_source_switch() {
        let manager = manager();
        manager.connect_simulator();
        manager.perform(FlightIntent::Takeoff);
        manager.perform(FlightIntent::Land);

        manager.connect_simulator();
        manager.set_controls(&FlightIntent::Arm.controls(false));
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(manager.controls().armed);
    }
}
