//! # Connection Manager
//!
//! One interface over two mutually exclusive telemetry sources: the local
//! [`Simulator`] and a live WebSocket.
//!
//! ## Source switching
//!
//! Every `connect_*` and `disconnect` first tears the previous source down
//! (stops the simulator timer, drops its listener, aborts the socket task),
//! then clears the four histories and the crash cooldown. Each activation gets
//! a fresh [`SourceTag`]; frames carrying any other tag are discarded, which
//! covers a simulator tick or socket message already in flight during a
//! switch.
//!
//! ## Locking
//!
//! All mutable state sits behind one mutex. The simulator is never called
//! while that mutex is held by a path the simulator can call back into:
//! control writes compute under the lock, release it, then hand the
//! safety-clamped delta to the simulator, whose listeners re-enter through
//! [`Shared::accept_frame`]. Only the delta crosses over, so concurrent
//! writers touching different fields do not overwrite each other.
//!
//! ## Relay snapshots
//!
//! A live source opened with a device id subscribes to that device's relay
//! group. The subscribe ack may carry the last stored frame under `last`,
//! which is applied like any other frame.

use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use super::live::{self, LiveEvents, LiveHandle, LiveMessage};
use super::safety::SafetyLimits;
use super::state::{ConnectionState, SourceKind, SourceTag, MISSING_URL_MESSAGE};
use crate::config::{Config, CrashConfig, HistoryConfig, SafetyConfig};
use crate::simulator::{Simulator, Subscription};
use crate::telemetry::crash::{CrashDetector, CRASH_EVENT_LABEL};
use crate::telemetry::history::BoundedHistory;
use crate::telemetry::normalize::{normalize, Rejection};
use crate::telemetry::types::{now_ms, Controls, ControlsDelta, FlightEvent, TelemetryFrame};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Point-in-time copy of everything the manager exposes for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerSnapshot {
    pub connection: ConnectionState,
    pub active_source: Option<SourceKind>,
    pub frame: Option<TelemetryFrame>,
    pub controls: Controls,
    pub altitude_history: Vec<f64>,
    pub battery_history: Vec<f64>,
    pub frames: Vec<TelemetryFrame>,
    pub events: Vec<FlightEvent>,
}

struct Inner {
    state: ConnectionState,
    epoch: u64,
    active: Option<SourceTag>,
    frame: Option<TelemetryFrame>,
    controls: Controls,
    altitude: BoundedHistory<f64>,
    battery: BoundedHistory<f64>,
    frames: BoundedHistory<TelemetryFrame>,
    events: BoundedHistory<FlightEvent>,
    crash: CrashDetector,
    safety: SafetyLimits,
    sim_subscription: Option<Subscription>,
    live: Option<LiveHandle>,
}

impl Inner {
    fn next_tag(&mut self, kind: SourceKind) -> SourceTag {
        self.epoch += 1;
        SourceTag {
            kind,
            epoch: self.epoch,
        }
    }

    fn reset_session(&mut self) {
        self.altitude.clear();
        self.battery.clear();
        self.frames.clear();
        self.events.clear();
        self.crash.reset();
        self.frame = None;
    }
}

/// State shared between the manager handle, simulator listeners and the live
/// socket task.
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    simulator: Arc<Simulator>,
}

impl Shared {
    /// Stop whatever source is active. Leaves the session buffers alone.
    fn teardown(&self, inner: &mut Inner) {
        let previous = inner.active.take();
        inner.sim_subscription = None;
        if previous.is_some_and(|tag| tag.kind == SourceKind::Simulator) {
            self.simulator.stop();
        }
        if let Some(live) = inner.live.take() {
            live.close();
        }
        if let Some(tag) = previous {
            debug!("Tore down {:?} source (epoch {})", tag.kind, tag.epoch);
        }
    }

    pub(crate) fn active_tag(&self) -> Option<SourceTag> {
        lock(&self.inner).active
    }

    /// Apply a frame from the source identified by `tag`.
    ///
    /// Returns false when the tag is stale and the frame was dropped.
    pub(crate) fn accept_frame(&self, tag: SourceTag, frame: TelemetryFrame) -> bool {
        let sim_controls = match tag.kind {
            SourceKind::Simulator => Some(self.simulator.controls()),
            SourceKind::Live => None,
        };

        let mut guard = lock(&self.inner);
        let inner = &mut *guard;
        if inner.active != Some(tag) {
            trace!("Dropped frame from stale source (epoch {})", tag.epoch);
            return false;
        }

        match sim_controls {
            Some(controls) => inner.controls = controls,
            None => {
                inner.controls.armed = frame.status.armed;
                inner.controls.mode = frame.status.mode;
            }
        }

        inner.altitude.push(frame.altitude_m);
        inner.battery.push(frame.battery.percent);
        inner.frames.push(frame.clone());
        inner.frame = Some(frame);

        if let Some((earlier, later)) = inner.frames.last_pair() {
            if inner.crash.evaluate(earlier, later) {
                warn!("Crash detected on {}", later.device_id);
                inner.events.push(FlightEvent::now(CRASH_EVENT_LABEL));
            }
        }
        true
    }

    /// Normalize and apply a raw live payload.
    ///
    /// Relay acks are unwrapped: a subscribe ack's `last` snapshot becomes the
    /// frame, and an ack without one is skipped.
    pub(crate) fn accept_payload(&self, tag: SourceTag, text: &str) -> bool {
        if self.active_tag() != Some(tag) {
            return false;
        }
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            debug!("Ignored live payload: {}", Rejection::InvalidJson);
            return false;
        };
        let value = match value.get("type").and_then(Value::as_str) {
            Some("ack") => match value.get("last") {
                Some(last) if last.is_object() => last,
                _ => {
                    trace!("Relay ack without snapshot: {}", value);
                    return false;
                }
            },
            _ => &value,
        };
        match normalize(value, now_ms()) {
            Ok(frame) => self.accept_frame(tag, frame),
            Err(rejection) => {
                debug!("Ignored live payload: {}", rejection);
                false
            }
        }
    }

    pub(crate) fn set_controls(&self, delta: &ControlsDelta) -> Controls {
        let (merged, to_simulator) = {
            let mut inner = lock(&self.inner);
            let delta = inner.safety.apply(delta);
            let merged = inner.controls.merge(&delta);
            inner.controls = merged;

            let to_simulator = match &inner.state {
                ConnectionState::SimConnected => Some(delta),
                ConnectionState::WsConnected { .. } => {
                    let message = LiveMessage::Control {
                        ts: now_ms(),
                        device_id: inner.frame.as_ref().map(|f| f.device_id.clone()).unwrap_or_default(),
                        controls: delta,
                    };
                    if let Some(live) = &inner.live {
                        if !live.send(&message) {
                            debug!("Live socket gone, control message dropped");
                        }
                    }
                    None
                }
                _ => None,
            };
            (merged, to_simulator)
        };

        match to_simulator {
            Some(delta) => self.simulator.set_controls(&delta),
            None => merged,
        }
    }

    pub(crate) fn log_event(&self, label: &str) {
        lock(&self.inner).events.push(FlightEvent::now(label));
    }
}

impl LiveEvents for Shared {
    fn opened(&self, tag: SourceTag) {
        let mut inner = lock(&self.inner);
        if inner.active != Some(tag) {
            return;
        }
        if let ConnectionState::WsConnecting { url } = &inner.state {
            let url = url.clone();
            info!("Live source connected: {}", url);
            inner.state = ConnectionState::WsConnected { url };
        }
    }

    fn payload(&self, tag: SourceTag, text: &str) {
        self.accept_payload(tag, text);
    }

    fn failed(&self, tag: SourceTag, message: String) {
        let mut inner = lock(&self.inner);
        if inner.active != Some(tag) {
            return;
        }
        let url = inner.state.url().unwrap_or_default().to_string();
        warn!("Live source {} failed: {}", url, message);
        inner.state = ConnectionState::WsError { url, message };
    }
}

/// Client-side owner of the active telemetry source.
///
/// Connecting requires a Tokio runtime: the simulator timer and the live
/// socket both run as tasks. Dropping the manager tears the source down.
pub struct ConnectionManager {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Manager with default history sizes, crash thresholds and safety limits.
    #[must_use]
    pub fn new(simulator: Arc<Simulator>) -> Self {
        Self::with_settings(
            simulator,
            HistoryConfig::default(),
            CrashConfig::default(),
            SafetyConfig::default(),
        )
    }

    #[must_use]
    pub fn from_config(simulator: Arc<Simulator>, config: &Config) -> Self {
        Self::with_settings(simulator, config.history, config.crash, config.safety)
    }

    #[must_use]
    pub fn with_settings(
        simulator: Arc<Simulator>,
        history: HistoryConfig,
        crash: CrashConfig,
        safety: SafetyConfig,
    ) -> Self {
        let inner = Inner {
            state: ConnectionState::Disconnected,
            epoch: 0,
            active: None,
            frame: None,
            controls: simulator.controls(),
            altitude: BoundedHistory::new(history.altitude_cap),
            battery: BoundedHistory::new(history.battery_cap),
            frames: BoundedHistory::new(history.frame_cap),
            events: BoundedHistory::new(history.event_cap),
            crash: CrashDetector::new(crash),
            safety: SafetyLimits::new(safety),
            sim_subscription: None,
            live: None,
        };
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                simulator,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        lock(&self.shared.inner)
    }

    // ---- actions ----

    /// Make the simulator the active source and start its timer.
    pub fn connect_simulator(&self) {
        {
            let mut inner = self.inner();
            self.shared.teardown(&mut inner);
            inner.reset_session();

            let tag = inner.next_tag(SourceKind::Simulator);
            inner.active = Some(tag);
            inner.state = ConnectionState::SimConnected;
            inner.controls = self.shared.simulator.controls();

            let weak = Arc::downgrade(&self.shared);
            inner.sim_subscription = Some(self.shared.simulator.subscribe(move |frame| {
                if let Some(shared) = weak.upgrade() {
                    shared.accept_frame(tag, frame.clone());
                }
            }));
        }

        self.shared.simulator.start();
        info!("Simulator source active ({})", self.shared.simulator.device_id());
    }

    /// Make a live socket at `url` the active source.
    ///
    /// With a `device_id` the socket subscribes to that device's relay group
    /// as soon as it opens. A plain device socket needs none.
    ///
    /// An empty URL leaves the manager in `WsError("Missing WebSocket URL")`.
    pub fn connect_live(&self, url: &str, device_id: Option<&str>) {
        let mut inner = self.inner();
        self.shared.teardown(&mut inner);
        inner.reset_session();

        let tag = inner.next_tag(SourceKind::Live);
        inner.active = Some(tag);

        if url.trim().is_empty() {
            warn!("Live connect requested without a URL");
            inner.state = ConnectionState::WsError {
                url: url.to_string(),
                message: MISSING_URL_MESSAGE.to_string(),
            };
            return;
        }

        info!("Connecting to live source {}", url);
        inner.state = ConnectionState::WsConnecting { url: url.to_string() };
        inner.live = Some(live::spawn(
            url.to_string(),
            device_id.map(str::to_string),
            tag,
            Arc::downgrade(&self.shared),
        ));
    }

    /// Stop the active source and return to `Disconnected`.
    pub fn disconnect(&self) {
        let mut inner = self.inner();
        self.shared.teardown(&mut inner);
        inner.reset_session();
        inner.state = ConnectionState::Disconnected;
        info!("Disconnected");
    }

    /// Merge a control update through the safety envelope and dispatch it.
    ///
    /// With the simulator active the clamped delta is applied to it and it
    /// ticks once before this returns; the simulator's resulting controls are
    /// returned. With a connected live socket the clamped delta is sent as a
    /// control message, without waiting for any reply. Otherwise only the
    /// local controls change.
    pub fn set_controls(&self, delta: &ControlsDelta) -> Controls {
        self.shared.set_controls(delta)
    }

    /// Append an entry to the event log.
    pub fn log_event(&self, label: &str) {
        self.shared.log_event(label);
    }

    pub fn set_safety_limits(&self, config: SafetyConfig) {
        self.inner().safety = SafetyLimits::new(config);
    }

    // ---- read surface ----

    pub fn state(&self) -> ConnectionState {
        self.inner().state.clone()
    }

    pub fn active_source(&self) -> Option<SourceKind> {
        self.inner().active.map(|tag| tag.kind)
    }

    pub fn frame(&self) -> Option<TelemetryFrame> {
        self.inner().frame.clone()
    }

    pub fn controls(&self) -> Controls {
        self.inner().controls
    }

    pub fn safety_limits(&self) -> SafetyLimits {
        self.inner().safety
    }

    pub fn altitude_history(&self) -> Vec<f64> {
        self.inner().altitude.to_vec()
    }

    pub fn battery_history(&self) -> Vec<f64> {
        self.inner().battery.to_vec()
    }

    pub fn frames(&self) -> Vec<TelemetryFrame> {
        self.inner().frames.to_vec()
    }

    /// Event log, oldest first.
    pub fn events(&self) -> Vec<FlightEvent> {
        self.inner().events.to_vec()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        let inner = self.inner();
        ManagerSnapshot {
            connection: inner.state.clone(),
            active_source: inner.active.map(|tag| tag.kind),
            frame: inner.frame.clone(),
            controls: inner.controls,
            altitude_history: inner.altitude.to_vec(),
            battery_history: inner.battery.to_vec(),
            frames: inner.frames.to_vec(),
            events: inner.events.to_vec(),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let mut inner = lock(&self.shared.inner);
        self.shared.teardown(&mut inner);
    }
}
