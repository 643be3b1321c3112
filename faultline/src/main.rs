//! # faultline
//!
//! Crash-scenario host. Initializes the fault coordinator, queues the
//! requested scenarios on a cooperative UI dispatcher running on the main
//! thread, and tears the native relay down on exit.
//!
//! # Usage
//!
//! ```bash
//! # UI panic, handled, then a raised native fault, handled
//! faultline managed native-divide
//!
//! # Invalid memory read, handled at the native call boundary
//! faultline native-crash managed
//!
//! # Same native fault without the relay: the process dies with SIGFPE
//! faultline --no-relay native-divide
//!
//! # Custom policy and JSON logs
//! faultline --config config/faultline.toml --json managed-via-invoke
//! ```
//!
//! Exit code 70 means a UI fault was dispositioned `Fatal`.

mod native;
mod scenario;

use clap::Parser;
use faultline_common::config::ConfigError;
use faultline_common::prelude::{DEFAULT_CONFIG_PATH, LOG_ENV_VAR, LogLevel};
use faultline_core::prelude::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use scenario::Scenario;

/// Exit status after a `Fatal` UI fault (`EX_SOFTWARE`).
const EXIT_FATAL: u8 = 70;

/// faultline - unified fault-dispatch coordinator demo host
#[derive(Parser, Debug)]
#[command(name = "faultline")]
#[command(version)]
#[command(about = "Runs crash scenarios through the unified fault-dispatch coordinator")]
#[command(long_about = None)]
struct Args {
    /// Coordinator configuration file (TOML). Falls back to the system
    /// config, then to built-in defaults.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Disable the native relay right after initialization
    #[arg(long)]
    no_relay: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    /// Scenarios to run, in order
    #[arg(value_enum, required = true)]
    scenarios: Vec<Scenario>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("faultline failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Tracing goes up before a config error can be returned, so that error
    // is logged too.
    let loaded = load_config(args.config.as_deref());
    let log_level = loaded
        .as_ref()
        .map_or(LogLevel::default(), |config| config.shared.log_level);
    setup_tracing(&args, log_level);
    let config = loaded?;

    info!(
        "{} v{} starting...",
        config.shared.service_name,
        env!("CARGO_PKG_VERSION")
    );

    let relay = SignalRelay::new();
    relay.set_capture_stack(config.relay.capture_native_stack);
    let coordinator = Coordinator::from_config(&config, Arc::new(relay));
    coordinator.initialize()?;
    if args.no_relay {
        coordinator.set_relay_enabled(false)?;
    }

    let table = Arc::new(native::invocation_table());
    let (ui, handle) = UiDispatcher::new(Arc::clone(&coordinator));
    for scenario in &args.scenarios {
        scenario::post(*scenario, &handle, &coordinator, &table);
    }
    handle.shutdown();

    let result = ui.run();
    coordinator.teardown();

    match result {
        Ok(executed) => {
            info!(executed, "faultline shutdown complete");
            Ok(ExitCode::SUCCESS)
        }
        Err(fatal) => {
            error!("{}", fatal);
            Ok(ExitCode::from(EXIT_FATAL))
        }
    }
}

/// Configuration from `path`, else the system config if present, else defaults.
fn load_config(path: Option<&Path>) -> Result<CoordinatorConfig, ConfigError> {
    match path {
        Some(path) => CoordinatorConfig::from_file(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            CoordinatorConfig::from_file(Path::new(DEFAULT_CONFIG_PATH))
        }
        None => Ok(CoordinatorConfig::default()),
    }
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, log_level: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        log_level.as_directive().parse().unwrap_or(Level::INFO)
    };

    let filter = EnvFilter::from_env(LOG_ENV_VAR).add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
