//! # Marker CLI
//!
//! Drives a Borries marker from G-code files and single commands.
//!
//! # Usage
//!
//! ```bash
//! # Run a file on the marker at /dev/ttyUSB0
//! marker gcodes/part.gcode
//!
//! # Simulated device, verbose logging
//! marker --simulate -v -e "G01 X10 Y20" -e "G28"
//!
//! # Wait until every move is acknowledged, JSON logs
//! marker --config /etc/marker/marker.toml --wait --json part.gcode
//! ```
//!
//! A JSON status report is printed to stdout when all commands are done.
//! Ctrl-C triggers an emergency off.

use clap::Parser;
use marker_common::config::{ConfigError, ConfigLoader, LogLevel, MarkerConfig};
use marker_common::consts::DEFAULT_CONFIG_PATH;
use marker_gcode::Interpreter;
use marker_hal::{ExecMode, Machine, TransportRegistry};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Marker - G-code interpreter for the Borries marker
#[derive(Parser, Debug)]
#[command(name = "marker")]
#[command(version)]
#[command(about = "G-code interpreter for the Borries marker")]
#[command(long_about = None)]
struct Args {
    /// Path to configuration file (marker.toml).
    /// Defaults are used if the default path does not exist.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serial device, overrides the configuration
    #[arg(short, long)]
    port: Option<String>,

    /// Use the simulated device instead of the serial port
    #[arg(short = 's', long)]
    simulate: bool,

    /// Execute a single command (can be specified multiple times)
    #[arg(short = 'e', long = "exec", value_name = "GCODE", action = clap::ArgAction::Append)]
    commands: Vec<String>,

    /// G-code files, executed in order after the commands
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Wait until every motion is acknowledged before exiting
    #[arg(short, long)]
    wait: bool,

    /// Maximum time to wait, in seconds
    #[arg(long, default_value_t = 300)]
    wait_timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("Marker failed: {}", e);
        eprintln!("marker: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args)?;

    setup_tracing(&args, config.shared.log_level);
    info!("Marker v{} starting...", env!("CARGO_PKG_VERSION"));

    let registry = TransportRegistry::with_builtin();
    let transport = registry.open(&config.device)?;
    let machine = Machine::start(transport, &config)?;

    let emergency = machine.emergency_handle();
    ctrlc::set_handler(move || {
        warn!("Received interrupt signal");
        if let Err(e) = emergency.trigger("interrupt") {
            error!("Emergency off failed: {}", e);
        }
    })?;

    let mut interp = Interpreter::new(machine, config.gcode.clone());

    for command in &args.commands {
        if let Err(e) = interp.execute_line(command, ExecMode::Interactive) {
            error!("{}: {}", command, e);
        }
    }

    for file in &args.files {
        if let Err(e) = interp.execute_file(file) {
            error!("{}: {}", file.display(), e);
            if e.is_emergency() {
                break;
            }
        }
    }

    if args.wait && interp.machine().is_running() {
        info!("Waiting for the marker to finish");
        if !interp.machine().wait_idle(Duration::from_secs(args.wait_timeout)) {
            warn!("Marker did not finish within {}s", args.wait_timeout);
        }
    }

    println!("{}", serde_json::to_string_pretty(&interp.report())?);

    interp.into_machine().shutdown()?;
    info!("Marker shutdown complete");
    Ok(())
}

/// Load the configuration and apply command line overrides.
fn load_config(args: &Args) -> Result<MarkerConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => MarkerConfig::load(path)?,
        None => match MarkerConfig::load(std::path::Path::new(DEFAULT_CONFIG_PATH)) {
            Ok(config) => config,
            Err(ConfigError::FileNotFound) => MarkerConfig::default(),
            Err(e) => return Err(e),
        },
    };

    if let Some(port) = &args.port {
        config.device.port = port.clone();
    }
    if args.simulate {
        config.device.transport = "simulation".to_string();
    }
    config.validate()?;
    Ok(config)
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        level.as_directive()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
