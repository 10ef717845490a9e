//! Machine and protocol constants for the marker workspace.
//!
//! Single source of truth for limits and default paths. Every value here
//! can be overridden through `MarkerConfig`.

/// Travel limit of the X axis in millimetres (Borries 320-DP).
pub const DEFAULT_MAX_X: f64 = 122.5;

/// Travel limit of the Y axis in millimetres (Borries 320-DP).
pub const DEFAULT_MAX_Y: f64 = 102.5;

/// Default serial device of the marker.
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// How long one serial write may wait for room in the output buffer.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;

/// Default transport name.
pub const DEFAULT_TRANSPORT: &str = "serial";

/// Interval between two iterations of the transmit/receive loop.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Interval used while waiting for an emergency-off to be written.
pub const DEFAULT_RESTART_POLL_MS: u64 = 10;

/// Maximum nesting of macro files (`M98` inside `M98`).
pub const DEFAULT_MAX_MACRO_DEPTH: usize = 16;

/// Directory (below the root directory) holding selectable G-code files.
pub const DEFAULT_GCODE_DIR: &str = "gcodes";

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/marker/marker.toml";

/// Number of decimals the device protocol accepts for coordinates.
pub const COORDINATE_DECIMALS: i32 = 2;
