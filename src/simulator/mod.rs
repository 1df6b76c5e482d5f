//! # Simulator Module
//!
//! Manufactures plausible telemetry for one device when no hardware is present.
//!
//! This module handles:
//! - Owning the simulated device state (battery, attitude, altitude, link)
//! - Advancing it on a timer (1 Hz by default) and on every control change
//! - Notifying subscribers synchronously with each new frame
//!
//! Every quantity relaxes toward a target with exponential smoothing
//! (`next = lerp(current, target, rate)`) plus a little random jitter:
//!
//! | Quantity | Target | Rate |
//! |----------|--------|------|
//! | current draw | armed: 0.8 + 3.2 × throttle, else idle | 0.35 |
//! | temperature | 29 + 2.2 × current | 0.25 |
//! | altitude | throttle × 6 m while armed, else 0 | 0.28 armed / 0.4 disarmed |
//! | roll / pitch | stick × 20° / 18° | 0.35 |
//! | signal strength | -45 dBm | 0.25 |
//! | latency | 55 ms + jitter, kept in 20..=250 | 0.2 |
//!
//! Battery drains in proportion to load and voltage follows a concave curve
//! of the remaining charge. Yaw integrates the yaw stick modulo 360°.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use drone_link::simulator::Simulator;
//! use drone_link::telemetry::types::ControlsDelta;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sim = Arc::new(Simulator::new("sim-drone-01"));
//! let _subscription = sim.subscribe(|frame| println!("altitude {:.2} m", frame.altitude_m));
//! sim.start();
//! sim.set_controls(&ControlsDelta { armed: Some(true), throttle: Some(40.0), ..Default::default() });
//! # }
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SimulatorConfig;
use crate::telemetry::types::{
    now_ms, Attitude, BatteryState, Controls, ControlsDelta, DeviceStatus, Environment,
    LinkQuality, TelemetryFrame,
};

/// Default timer period
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Altitude reached at full throttle, in meters
pub const ALTITUDE_CEILING_M: f64 = 6.0;

/// Below this altitude a disarmed device is snapped to the ground
pub const GROUND_SNAP_M: f64 = 0.06;

const CURRENT_RATE: f64 = 0.35;
const TEMPERATURE_RATE: f64 = 0.25;
const ALTITUDE_RATE_ARMED: f64 = 0.28;
const ALTITUDE_RATE_DISARMED: f64 = 0.4;
const ATTITUDE_RATE: f64 = 0.35;
const RSSI_RATE: f64 = 0.25;
const LATENCY_RATE: f64 = 0.2;

/// Frame listener. Invoked synchronously from the tick that produced the frame.
pub type Listener = Arc<dyn Fn(&TelemetryFrame) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn round_to(value: f64, digits: i32) -> f64 {
    let p = 10f64.powi(digits);
    (value * p).round() / p
}

/// Cell voltage for a charge percentage: 3.3 V empty, 4.2 V full, concave.
pub fn voltage_from_percent(percent: f64) -> f64 {
    let t = (percent / 100.0).clamp(0.0, 1.0);
    3.3 + 0.9 * t.powf(0.6)
}

#[derive(Default)]
struct ListenerSet {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Handle returned by [`Simulator::subscribe`].
///
/// Dropping the handle unsubscribes the listener.
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<ListenerSet>>,
}

impl Subscription {
    /// Remove the listener. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Synthetic physical state of the simulated device.
struct SimState {
    device_id: String,
    firmware_version: String,
    battery_percent: f64,
    voltage: f64,
    current_a: f64,
    temperature_c: f64,
    altitude_m: f64,
    roll_deg: f64,
    pitch_deg: f64,
    yaw_deg: f64,
    rssi_dbm: f64,
    latency_ms: f64,
    controls: Controls,
    rng: StdRng,
}

impl SimState {
    fn new(device_id: String, firmware_version: String, rng: StdRng) -> Self {
        Self {
            device_id,
            firmware_version,
            battery_percent: 92.0,
            voltage: voltage_from_percent(92.0),
            current_a: 0.3,
            temperature_c: 31.0,
            altitude_m: 0.0,
            roll_deg: 0.0,
            pitch_deg: 0.0,
            yaw_deg: 0.0,
            rssi_dbm: -48.0,
            latency_ms: 60.0,
            controls: Controls::default(),
            rng,
        }
    }

    fn jitter(&mut self, min: f64, max: f64) -> f64 {
        self.rng.gen_range(min..max)
    }

    /// Advance one step and produce the resulting frame.
    fn step(&mut self) -> TelemetryFrame {
        let c = self.controls;
        let armed = c.armed;
        let throttle = c.throttle / 100.0;

        let load = if armed {
            0.8 + throttle * 3.2
        } else {
            0.2 + self.jitter(0.0, 0.15)
        };
        self.current_a = round_to(lerp(self.current_a, load, CURRENT_RATE), 2);

        let drain = if armed { 0.15 + throttle * 0.25 } else { 0.03 };
        self.battery_percent = (self.battery_percent - drain).clamp(0.0, 100.0);
        let sag = self.jitter(0.0, 0.03);
        self.voltage = round_to(voltage_from_percent(self.battery_percent) - sag, 2);

        let temperature_target = 29.0 + self.current_a * 2.2 + self.jitter(-0.5, 0.5);
        self.temperature_c = round_to(lerp(self.temperature_c, temperature_target, TEMPERATURE_RATE), 1);

        let altitude_target = if armed { throttle * ALTITUDE_CEILING_M } else { 0.0 };
        let altitude_rate = if armed { ALTITUDE_RATE_ARMED } else { ALTITUDE_RATE_DISARMED };
        let altitude_noise = self.jitter(-0.05, 0.05);
        let altitude = round_to(lerp(self.altitude_m, altitude_target, altitude_rate) + altitude_noise, 2);
        self.altitude_m = if !armed && altitude < GROUND_SNAP_M {
            0.0
        } else {
            altitude.max(0.0)
        };

        let roll_target = (c.roll / 100.0) * 20.0 + self.jitter(-2.0, 2.0);
        let pitch_target = (c.pitch / 100.0) * 18.0 + self.jitter(-2.0, 2.0);
        self.roll_deg = round_to(lerp(self.roll_deg, roll_target, ATTITUDE_RATE), 1);
        self.pitch_deg = round_to(lerp(self.pitch_deg, pitch_target, ATTITUDE_RATE), 1);

        let yaw_rate = (c.yaw / 100.0) * 30.0 + self.jitter(-1.5, 1.5);
        let yaw = round_to((self.yaw_deg + yaw_rate).rem_euclid(360.0), 1);
        // Rounding can land exactly on 360
        self.yaw_deg = if yaw >= 360.0 { yaw - 360.0 } else { yaw };

        let rssi_target = -45.0 + self.jitter(-6.0, 6.0);
        self.rssi_dbm = lerp(self.rssi_dbm, rssi_target, RSSI_RATE).round();
        let latency_target = 55.0 + self.jitter(-25.0, 60.0);
        self.latency_ms = lerp(self.latency_ms, latency_target, LATENCY_RATE).clamp(20.0, 250.0).round();

        TelemetryFrame {
            ts: now_ms(),
            device_id: self.device_id.clone(),
            firmware_version: Some(self.firmware_version.clone()),
            link: LinkQuality {
                rssi_dbm: self.rssi_dbm,
                latency_ms: self.latency_ms,
            },
            battery: BatteryState {
                percent: round_to(self.battery_percent, 1),
                voltage: self.voltage,
                current_a: self.current_a,
            },
            env: Environment {
                temperature_c: self.temperature_c,
            },
            attitude: Attitude {
                roll_deg: self.roll_deg,
                pitch_deg: self.pitch_deg,
                yaw_deg: self.yaw_deg,
            },
            altitude_m: self.altitude_m,
            status: DeviceStatus {
                armed,
                mode: c.mode,
            },
        }
    }
}

/// One simulated device.
///
/// Constructed explicitly by the composing application and shared as
/// `Arc<Simulator>`. The timer is owned by the instance and only runs between
/// [`start`](Simulator::start) and [`stop`](Simulator::stop).
pub struct Simulator {
    state: Mutex<SimState>,
    listeners: Arc<Mutex<ListenerSet>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    tick_interval: Duration,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("device_id", &self.device_id())
            .field("running", &self.is_running())
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

impl Simulator {
    /// Creates a simulator for `device_id` with the default 1 Hz timer.
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self::build(device_id.into(), "0.1.0".to_string(), DEFAULT_TICK_INTERVAL, StdRng::from_entropy())
    }

    /// Creates a simulator from configuration.
    #[must_use]
    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self::build(
            config.device_id.clone(),
            config.firmware_version.clone(),
            Duration::from_millis(config.tick_interval_ms),
            StdRng::from_entropy(),
        )
    }

    /// Creates a simulator whose jitter is reproducible.
    #[must_use]
    pub fn with_seed(device_id: impl Into<String>, seed: u64) -> Self {
        Self::build(device_id.into(), "0.1.0".to_string(), DEFAULT_TICK_INTERVAL, StdRng::seed_from_u64(seed))
    }

    fn build(device_id: String, firmware_version: String, tick_interval: Duration, rng: StdRng) -> Self {
        Self {
            state: Mutex::new(SimState::new(device_id, firmware_version, rng)),
            listeners: Arc::new(Mutex::new(ListenerSet::default())),
            timer: Mutex::new(None),
            tick_interval,
        }
    }

    pub fn device_id(&self) -> String {
        lock(&self.state).device_id.clone()
    }

    /// Current controls of the simulated device.
    pub fn controls(&self) -> Controls {
        lock(&self.state).controls
    }

    /// Returns true while the timer is running.
    pub fn is_running(&self) -> bool {
        lock(&self.timer).as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Start the periodic timer. Calling it while running does nothing.
    ///
    /// The first tick fires immediately. Must be called from within a Tokio
    /// runtime.
    pub fn start(self: &Arc<Self>) {
        let mut timer = lock(&self.timer);
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(self);
        let period = self.tick_interval;
        *timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(sim) => {
                        sim.tick();
                    }
                    None => break,
                }
            }
        }));
        info!("Simulator started ({} ms period)", period.as_millis());
    }

    /// Stop the periodic timer. Calling it while stopped does nothing.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
            info!("Simulator stopped");
        }
    }

    /// Merge and clamp a control update, then tick once immediately.
    ///
    /// Returns the controls now in effect.
    pub fn set_controls(&self, delta: &ControlsDelta) -> Controls {
        let controls = {
            let mut state = lock(&self.state);
            state.controls = state.controls.merge(delta);
            state.controls
        };
        debug!("Simulator controls set: {:?}", controls);
        self.tick();
        controls
    }

    /// Register a frame listener.
    ///
    /// The listener stays registered until the returned handle is dropped.
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&TelemetryFrame) + Send + Sync + 'static,
    {
        let mut set = lock(&self.listeners);
        set.next_id += 1;
        let id = set.next_id;
        set.entries.push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).entries.len()
    }

    /// Advance the state once and deliver the frame to every listener.
    ///
    /// Listeners run on the caller's thread after the state lock is released,
    /// so they may call back into the simulator.
    pub fn tick(&self) -> TelemetryFrame {
        let frame = lock(&self.state).step();
        let listeners: Vec<Listener> = lock(&self.listeners)
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&frame);
        }
        frame
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
        }
    }
}
