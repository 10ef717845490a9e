//! Configuration loading traits and types.
//!
//! Every marker process reads one TOML file into [`MarkerConfig`]. All
//! sections are optional and fall back to the defaults of the Borries
//! 320-DP, so an empty file is a valid configuration.
//!
//! # Usage
//!
//! ```rust,no_run
//! use marker_common::config::{ConfigError, ConfigLoader, MarkerConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = MarkerConfig::load(Path::new("marker.toml"))?;
//!     config.validate()?;
//!     println!("Device: {}", config.device.port);
//!     Ok(())
//! }
//! ```
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! log_level = "debug"
//! service_name = "marker-01"
//!
//! [device]
//! transport = "serial"
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! slow_motion = false
//! write_timeout_ms = 10000
//!
//! [machine]
//! max_x = 122.5
//! max_y = 102.5
//!
//! [engine]
//! poll_interval_ms = 100
//!
//! [gcode]
//! root_dir = "/var/lib/marker"
//! gcode_dir = "gcodes"
//! ```

use crate::consts::{
    DEFAULT_BAUD_RATE, DEFAULT_GCODE_DIR, DEFAULT_MAX_MACRO_DEPTH, DEFAULT_MAX_X, DEFAULT_MAX_Y,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_RESTART_POLL_MS, DEFAULT_SERIAL_PORT, DEFAULT_TRANSPORT,
    DEFAULT_WRITE_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, includes every byte written to the device.
    Trace,
    /// Wire traffic and answer parsing.
    Debug,
    /// Progress and command processing.
    #[default]
    Info,
    /// Ignored commands and recoverable problems.
    Warn,
    /// Emergency stops and transport failures.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Common configuration fields shared across all marker processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_service_name() -> String {
    "marker".to_string()
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Device connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Registered transport name (`serial` or `simulation`).
    pub transport: String,
    /// Serial device path.
    pub port: String,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Initialise the marker with the slow motion speed profile.
    pub slow_motion: bool,
    /// Serial write timeout [ms]; reads never wait.
    pub write_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            transport: DEFAULT_TRANSPORT.to_string(),
            port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            slow_motion: false,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl DeviceConfig {
    /// Serial write timeout as `Duration`.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Travel limits of the machine [mm].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineLimits {
    /// Maximum X coordinate.
    pub max_x: f64,
    /// Maximum Y coordinate.
    pub max_y: f64,
}

impl Default for MachineLimits {
    fn default() -> Self {
        Self {
            max_x: DEFAULT_MAX_X,
            max_y: DEFAULT_MAX_Y,
        }
    }
}

/// Transmit/receive engine timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sleep between two loop iterations [ms].
    pub poll_interval_ms: u64,
    /// Polling interval while a restart waits for the emergency-off [ms].
    pub restart_poll_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            restart_poll_ms: DEFAULT_RESTART_POLL_MS,
        }
    }
}

impl EngineConfig {
    /// Loop poll interval as `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Restart poll interval as `Duration`.
    pub fn restart_poll(&self) -> Duration {
        Duration::from_millis(self.restart_poll_ms)
    }
}

/// G-code file locations and interpreter limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcodeConfig {
    /// Base directory for macro paths (`M98`).
    pub root_dir: PathBuf,
    /// Directory of selectable files (`M23`), relative to `root_dir` unless absolute.
    pub gcode_dir: PathBuf,
    /// Maximum nesting of macro files.
    pub max_macro_depth: usize,
}

impl Default for GcodeConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            gcode_dir: PathBuf::from(DEFAULT_GCODE_DIR),
            max_macro_depth: DEFAULT_MAX_MACRO_DEPTH,
        }
    }
}

impl GcodeConfig {
    /// Directory that selected file names are resolved against.
    pub fn gcode_path(&self) -> PathBuf {
        resolve_path(&self.root_dir, &self.gcode_dir)
    }

    /// Resolve a macro path against `root_dir`.
    pub fn macro_path(&self, path: &Path) -> PathBuf {
        resolve_path(&self.root_dir, path)
    }
}

/// Complete configuration of a marker process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// Logging and identity.
    pub shared: SharedConfig,
    /// Device connection.
    pub device: DeviceConfig,
    /// Travel limits.
    pub machine: MachineLimits,
    /// Engine timing.
    pub engine: EngineConfig,
    /// G-code interpreter.
    pub gcode: GcodeConfig,
}

impl MarkerConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for empty names, non-positive
    /// limits, a zero baud rate or zero intervals.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.device.transport.is_empty() {
            return Err(ConfigError::ValidationError(
                "device.transport cannot be empty".to_string(),
            ));
        }
        if self.device.port.is_empty() {
            return Err(ConfigError::ValidationError(
                "device.port cannot be empty".to_string(),
            ));
        }
        if self.device.baud_rate == 0 {
            return Err(ConfigError::ValidationError(
                "device.baud_rate must be > 0".to_string(),
            ));
        }
        if self.device.write_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "device.write_timeout_ms must be > 0".to_string(),
            ));
        }
        if !(self.machine.max_x > 0.0 && self.machine.max_y > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "machine limits must be positive (max_x={}, max_y={})",
                self.machine.max_x, self.machine.max_y
            )));
        }
        if self.engine.poll_interval_ms == 0 || self.engine.restart_poll_ms == 0 {
            return Err(ConfigError::ValidationError(
                "engine intervals must be > 0".to_string(),
            ));
        }
        if self.gcode.max_macro_depth == 0 {
            return Err(ConfigError::ValidationError(
                "gcode.max_macro_depth must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// Blanket-implemented for every `DeserializeOwned` type.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

/// Resolve a possibly relative path against a base directory.
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
