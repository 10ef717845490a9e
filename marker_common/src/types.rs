//! Machine data types shared by the engine, the interpreter and status
//! consumers.
//!
//! - `Position` - tool position in millimetres, kept at device precision
//! - `HomedAxes` - per-axis homed flags (X, Y and a synthetic third slot)
//! - `SafetyPhase` - safety state machine of the marker
//! - `Status` - single-letter status code reported to status pollers
//! - `MachineSnapshot` - serialisable read-only view of the machine

use crate::config::MachineLimits;
use crate::consts::COORDINATE_DECIMALS;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Round a coordinate to the precision accepted by the device.
#[inline]
pub fn round_coordinate(value: f64) -> f64 {
    let scale = 10f64.powi(COORDINATE_DECIMALS);
    (value * scale).round() / scale
}

/// Tool position [mm].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

impl Position {
    /// The home position.
    pub const ORIGIN: Self = Self { x: 0.0, y: 0.0 };

    /// Create a position.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Both coordinates rounded to device precision.
    pub fn rounded(&self) -> Self {
        Self::new(round_coordinate(self.x), round_coordinate(self.y))
    }

    /// Position shifted by `(dx, dy)`, rounded to device precision.
    pub fn offset(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy).rounded()
    }

    /// Whether the position lies inside `[0, max_x] × [0, max_y]`.
    pub fn within(&self, limits: &MachineLimits) -> bool {
        (0.0..=limits.max_x).contains(&self.x) && (0.0..=limits.max_y).contains(&self.y)
    }

    /// Whether this is the home position.
    pub fn is_origin(&self) -> bool {
        *self == Self::ORIGIN
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2},{:.2})", self.x, self.y)
    }
}

bitflags! {
    /// Homed flags per axis.
    ///
    /// The third slot does not exist on the marker; it is always reported
    /// as homed so that status consumers expecting three axes are satisfied.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HomedAxes: u8 {
        /// X axis referenced.
        const X = 0x01;
        /// Y axis referenced.
        const Y = 0x02;
        /// Synthetic third axis, always set.
        const SYNTHETIC = 0x04;
    }
}

impl HomedAxes {
    /// Flags required for motion.
    pub const MOTION: Self = Self::from_bits_truncate(Self::X.bits() | Self::Y.bits());

    /// State before any homing run.
    pub const fn unhomed() -> Self {
        Self::SYNTHETIC
    }

    /// Whether both physical axes are homed.
    #[inline]
    pub const fn motion_allowed(&self) -> bool {
        self.contains(Self::MOTION)
    }

    /// Flags as `[x, y, synthetic]` with `1` for homed.
    pub fn as_triple(&self) -> [u8; 3] {
        [
            u8::from(self.contains(Self::X)),
            u8::from(self.contains(Self::Y)),
            u8::from(self.contains(Self::SYNTHETIC)),
        ]
    }
}

impl Default for HomedAxes {
    fn default() -> Self {
        Self::unhomed()
    }
}

/// Safety state of the marker.
///
/// ```text
/// Uninitialized → HomingRequired → Ready ⇄ Moving
///        └───────────────┴───────────┴───────┴──→ EmergencyStopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyPhase {
    /// Engine not started, init sequence not sent.
    Uninitialized,
    /// Initialised, axes not homed.
    HomingRequired,
    /// Homed, every issued motion acknowledged.
    Ready,
    /// Homed, motion acknowledgments outstanding.
    Moving,
    /// Emergency off issued; terminal until restart.
    EmergencyStopped,
}

impl SafetyPhase {
    /// Whether the phase accepts motion commands (bounds/homing still apply).
    pub const fn accepts_motion(&self) -> bool {
        !matches!(self, SafetyPhase::EmergencyStopped)
    }
}

/// Status code surfaced to status pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Executing a file, or starting up.
    #[serde(rename = "B")]
    Busy,
    /// Waiting for commands.
    #[serde(rename = "I")]
    Idle,
    /// Emergency stop in progress.
    #[serde(rename = "D")]
    EmergencyStopping,
    /// Emergency stopped, restart required.
    #[serde(rename = "S")]
    Stopped,
    /// Restart in progress.
    #[serde(rename = "R")]
    Restarting,
}

impl Status {
    /// Single-letter status code.
    pub const fn code(&self) -> char {
        match self {
            Status::Busy => 'B',
            Status::Idle => 'I',
            Status::EmergencyStopping => 'D',
            Status::Stopped => 'S',
            Status::Restarting => 'R',
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Read-only view of the machine for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSnapshot {
    /// Current safety phase.
    pub phase: SafetyPhase,
    /// Authoritative tool position.
    pub position: Position,
    /// Homed flags as `[x, y, synthetic]`.
    pub axes_homed: [u8; 3],
    /// Last error message, if any.
    pub message: Option<String>,
    /// Percentage of acknowledged motion operations.
    pub percent_done: f64,
    /// Estimated seconds until every issued motion is acknowledged.
    pub eta_secs: Option<f64>,
}
