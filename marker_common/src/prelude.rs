//! Prelude module for common re-exports.
//!
//! ```rust
//! use marker_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ConfigError, ConfigLoader, DeviceConfig, EngineConfig, GcodeConfig, LogLevel, MachineLimits,
    MarkerConfig, SharedConfig,
};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{DEFAULT_MAX_X, DEFAULT_MAX_Y};

// ─── Types ──────────────────────────────────────────────────────────
pub use crate::types::{HomedAxes, MachineSnapshot, Position, SafetyPhase, Status};

// ─── Transport ──────────────────────────────────────────────────────
pub use crate::transport::{Transport, TransportError, TransportFactory};
