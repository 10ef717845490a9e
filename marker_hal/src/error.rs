//! Error types of machine operations.

use marker_common::transport::TransportError;
use thiserror::Error;

/// Errors returned by `Machine` operations.
#[derive(Debug, Error)]
pub enum MarkerError {
    /// Target outside the travel range, or axes not homed.
    ///
    /// Recoverable; the message is also stored as the machine error.
    #[error("Safety violation: {0}")]
    SafetyViolation(String),

    /// The machine is emergency stopped; a restart is required.
    #[error("Emergency stop: {0}")]
    EmergencyStop(String),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl MarkerError {
    /// Whether the error ends the current session.
    pub fn is_emergency(&self) -> bool {
        matches!(self, MarkerError::EmergencyStop(_))
    }
}
