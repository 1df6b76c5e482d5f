//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{DroneLinkError, Result};

/// Environment variable consulted when `relay.jwt_secret` is not set
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub crash: CrashConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default)]
    pub jwt_secret: Option<String>,
}

/// Simulator configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SimulatorConfig {
    #[serde(default = "default_device_id")]
    pub device_id: String,

    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

/// Capacities of the connection manager's bounded histories
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    #[serde(default = "default_altitude_cap")]
    pub altitude_cap: usize,

    #[serde(default = "default_battery_cap")]
    pub battery_cap: usize,

    #[serde(default = "default_frame_cap")]
    pub frame_cap: usize,

    #[serde(default = "default_event_cap")]
    pub event_cap: usize,
}

/// Crash heuristic thresholds
///
/// Altitudes are in meters, times in milliseconds of frame timestamp.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CrashConfig {
    #[serde(default = "default_min_prior_altitude_m")]
    pub min_prior_altitude_m: f64,

    #[serde(default = "default_max_impact_altitude_m")]
    pub max_impact_altitude_m: f64,

    #[serde(default = "default_min_drop_m")]
    pub min_drop_m: f64,

    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: i64,

    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: i64,

    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: i64,
}

/// Safety envelope applied to outgoing controls
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct SafetyConfig {
    #[serde(default = "default_max_altitude_m")]
    pub max_altitude_m: f64,

    #[serde(default = "default_speed_limit_pct")]
    pub speed_limit_pct: f64,

    #[serde(default)]
    pub training: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub file_dir: Option<String>,
}

// Default value functions
fn default_bind() -> String { "127.0.0.1:8787".to_string() }
fn default_path() -> String { "/telemetry".to_string() }

fn default_device_id() -> String { "sim-drone-01".to_string() }
fn default_firmware_version() -> String { "0.1.0".to_string() }
fn default_tick_interval_ms() -> u64 { 1000 }

fn default_altitude_cap() -> usize { 24 }
fn default_battery_cap() -> usize { 24 }
fn default_frame_cap() -> usize { 120 }
fn default_event_cap() -> usize { 30 }

fn default_min_prior_altitude_m() -> f64 { 1.0 }
fn default_max_impact_altitude_m() -> f64 { 0.18 }
fn default_min_drop_m() -> f64 { 0.9 }
fn default_cooldown_ms() -> i64 { 8000 }
fn default_min_interval_ms() -> i64 { 10 }
fn default_max_interval_ms() -> i64 { 2000 }

fn default_max_altitude_m() -> f64 { 6.0 }
fn default_speed_limit_pct() -> f64 { 100.0 }

fn default_log_level() -> String { "info".to_string() }

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            path: default_path(),
            jwt_secret: None,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            firmware_version: default_firmware_version(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            altitude_cap: default_altitude_cap(),
            battery_cap: default_battery_cap(),
            frame_cap: default_frame_cap(),
            event_cap: default_event_cap(),
        }
    }
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            min_prior_altitude_m: default_min_prior_altitude_m(),
            max_impact_altitude_m: default_max_impact_altitude_m(),
            min_drop_m: default_min_drop_m(),
            cooldown_ms: default_cooldown_ms(),
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_altitude_m: default_max_altitude_m(),
            speed_limit_pct: default_speed_limit_pct(),
            training: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_dir: None,
        }
    }
}

impl RelayConfig {
    /// Shared secret used to verify bearer tokens
    ///
    /// Falls back to the `JWT_SECRET` environment variable. An empty secret
    /// counts as absent, which makes the relay refuse every connection.
    pub fn resolve_secret(&self) -> Option<String> {
        self.jwt_secret
            .clone()
            .or_else(|| std::env::var(JWT_SECRET_ENV).ok())
            .filter(|secret| !secret.is_empty())
    }
}

fn invalid(message: impl std::fmt::Display) -> DroneLinkError {
    DroneLinkError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use drone_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.relay.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(invalid(format!("relay bind '{}' is not a socket address", self.relay.bind)));
        }

        if !self.relay.path.starts_with('/') {
            return Err(invalid("relay path must start with '/'"));
        }

        if self.simulator.device_id.trim().is_empty() {
            return Err(invalid("simulator device_id cannot be empty"));
        }

        if self.simulator.tick_interval_ms == 0 || self.simulator.tick_interval_ms > 60000 {
            return Err(invalid("tick_interval_ms must be between 1 and 60000"));
        }

        for (name, cap) in [
            ("altitude_cap", self.history.altitude_cap),
            ("battery_cap", self.history.battery_cap),
            ("frame_cap", self.history.frame_cap),
            ("event_cap", self.history.event_cap),
        ] {
            if cap == 0 {
                return Err(invalid(format!("{} must be greater than 0", name)));
            }
        }

        // The heuristic compares the two newest frames
        if self.history.frame_cap < 2 {
            return Err(invalid("frame_cap must be at least 2"));
        }

        let crash = &self.crash;
        if crash.max_impact_altitude_m >= crash.min_prior_altitude_m {
            return Err(invalid("max_impact_altitude_m must be below min_prior_altitude_m"));
        }

        if crash.min_drop_m <= 0.0 {
            return Err(invalid("min_drop_m must be greater than 0"));
        }

        if crash.cooldown_ms < 0 {
            return Err(invalid("cooldown_ms cannot be negative"));
        }

        if crash.min_interval_ms < 0 || crash.min_interval_ms > crash.max_interval_ms {
            return Err(invalid("crash interval must satisfy 0 <= min_interval_ms <= max_interval_ms"));
        }

        if !(0.5..=6.0).contains(&self.safety.max_altitude_m) {
            return Err(invalid("max_altitude_m must be between 0.5 and 6.0"));
        }

        if !(20.0..=100.0).contains(&self.safety.speed_limit_pct) {
            return Err(invalid("speed_limit_pct must be between 20 and 100"));
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(invalid(format!("invalid log level '{}'", self.logging.level)));
        }

        Ok(())
    }
}
