//! # Drone Link
//!
//! Telemetry relay and device simulator.
//!
//! ```text
//! drone-link relay    [config.toml]   serve the authenticated relay
//! drone-link simulate [config.toml]   run a simulator behind a connection manager
//! ```
//!
//! Without a config argument, `config/default.toml` is used when present and
//! built-in defaults otherwise.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use drone_link::client::{ConnectionManager, FlightIntent};
use drone_link::config::{Config, LoggingConfig};
use drone_link::relay::RelayServer;
use drone_link::simulator::Simulator;

/// Configuration file read when none is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Log file name prefix inside `logging.file_dir`
const LOG_FILE_PREFIX: &str = "drone-link.log";

/// Seconds between status lines in simulate mode
const STATUS_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Relay,
    Simulate,
}

impl Mode {
    fn parse(arg: &str) -> Option<Self> {
        match arg {
            "relay" => Some(Mode::Relay),
            "simulate" | "sim" => Some(Mode::Simulate),
            _ => None,
        }
    }
}

/// Main entry point for Drone Link
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Parse the mode and optional config path
///    - Load and validate configuration
///    - Set up logging (stdout, plus a daily file when configured)
///
/// 2. **Run**
///    - `relay`: bind the WebSocket relay and serve until Ctrl+C
///    - `simulate`: start a simulator as the manager's source, take off,
///      and log frames and flight events until Ctrl+C
///
/// # Errors
///
/// Returns error if:
/// - The mode is unknown
/// - Configuration cannot be read or is invalid
/// - The relay address cannot be bound
///
/// # Examples
///
/// ```bash
/// JWT_SECRET=change-me cargo run --release -- relay
/// ```
///
/// Expected output:
/// ```text
/// INFO drone_link: Drone Link v0.1.0 starting (relay)
/// INFO drone_link::relay::server: Relay listening on 127.0.0.1:8787/telemetry
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mode_arg = args.next().unwrap_or_else(|| "relay".to_string());
    let Some(mode) = Mode::parse(&mode_arg) else {
        bail!("unknown mode '{}', expected 'relay' or 'simulate'", mode_arg);
    };
    let config = load_config(args.next().as_deref())?;

    let _guard = init_logging(&config.logging)?;
    info!("Drone Link v{} starting ({:?})", env!("CARGO_PKG_VERSION"), mode);

    match mode {
        Mode::Relay => run_relay(&config).await,
        Mode::Simulate => run_simulator(&config).await,
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path)),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::load(DEFAULT_CONFIG_PATH).with_context(|| format!("loading {}", DEFAULT_CONFIG_PATH))
        }
        None => Ok(Config::default()),
    }
}

/// Install the global subscriber. The returned guard flushes the file writer
/// on drop and must live until exit.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(env.as_deref(), &logging.level)?;
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    match &logging.file_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));
            registry.with(fmt::layer().with_writer(writer).with_ansi(false)).init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}

/// `RUST_LOG` directives win when they parse; otherwise the configured level.
fn log_filter(env: Option<&str>, level: &str) -> Result<EnvFilter> {
    if let Some(filter) = env.and_then(|directives| EnvFilter::try_new(directives).ok()) {
        return Ok(filter);
    }
    EnvFilter::try_new(level).with_context(|| format!("invalid log level '{}'", level))
}

async fn run_relay(config: &Config) -> Result<()> {
    let server = RelayServer::bind(&config.relay).await?;
    info!("Press Ctrl+C to exit");

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received Ctrl+C, shutting down...");
        })
        .await?;
    Ok(())
}

async fn run_simulator(config: &Config) -> Result<()> {
    let simulator = Arc::new(Simulator::from_config(&config.simulator));
    let manager = ConnectionManager::from_config(Arc::clone(&simulator), config);

    manager.connect_simulator();
    manager.perform(FlightIntent::Takeoff);
    info!("Press Ctrl+C to exit");

    let mut status = interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    let mut events_seen = 0usize;

    loop {
        tokio::select! {
            _ = status.tick() => {
                if let Some(frame) = manager.frame() {
                    info!(
                        "{}: alt {:.2} m, battery {:.1}% ({:.2} V), rssi {:.0} dBm, {} {}",
                        frame.device_id,
                        frame.altitude_m,
                        frame.battery.percent,
                        frame.battery.voltage,
                        frame.link.rssi_dbm,
                        if frame.status.armed { "armed" } else { "disarmed" },
                        frame.status.mode,
                    );
                }

                let events = manager.events();
                for event in events.iter().skip(events_seen) {
                    info!("Event at {}: {}", event.ts, event.label);
                }
                events_seen = events.len();
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                manager.perform(FlightIntent::EmergencyStop);
                manager.disconnect();
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(Mode::parse("relay"), Some(Mode::Relay));
        assert_eq!(Mode::parse("simulate"), Some(Mode::Simulate));
        assert_eq!(Mode::parse("sim"), Some(Mode::Simulate));
        assert_eq!(Mode::parse("fly"), None);
    }

    #[test]
    fn test_log_filter_prefers_env() {
        let filter = log_filter(Some("warn"), "debug").unwrap();
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn test_log_filter_falls_back_to_config_level() {
        assert_eq!(log_filter(None, "debug").unwrap().to_string(), "debug");
        // Unparseable RUST_LOG is ignored
        assert_eq!(log_filter(Some("drone_link=verbose"), "info").unwrap().to_string(), "info");
    }

    #[test]
    fn test_log_filter_rejects_bad_config_level() {
        let err = log_filter(None, "drone_link=verbose").unwrap_err();
        assert!(err.to_string().contains("invalid log level"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drone.toml");
        std::fs::write(&path, "[simulator]\ndevice_id = \"bench-drone\"\n").unwrap();

        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.simulator.device_id, "bench-drone");
        assert_eq!(config.relay.path, "/telemetry");
    }

    #[test]
    fn test_load_config_missing_file_fails() {
        assert!(load_config(Some("/nonexistent/drone-link.toml")).is_err());
    }
}
