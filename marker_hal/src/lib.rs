//! # Marker HAL Library
//!
//! Device side of the Borries marker: wire protocol, transmit/receive
//! engine, acknowledgment counting, machine state with safety gating, and
//! the transports the engine talks through.
//!
//! # Module Structure
//!
//! - [`protocol`] - Byte-exact command fragments and framing
//! - [`counter`] - Expected/completed counters per answer class
//! - [`engine`] - Background transmit/receive loop, emergency off
//! - [`machine`] - Position, homed flags, safety phase
//! - [`transport_registry`] - Transport factory registration
//! - [`transports`] - Serial and simulated transports
//! - [`error`] - `MarkerError`
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       marker_hal                              │
//! │  ┌────────────┐    ┌──────────────┐    ┌──────────────────┐   │
//! │  │  Machine   │───►│   Engine     │◄──►│ Transport        │   │
//! │  │ (safety)   │    │ (txrx loop)  │    │ (serial / sim)   │   │
//! │  └─────┬──────┘    └──────┬───────┘    └──────────────────┘   │
//! │        │                  │                                   │
//! │        ▼                  ▼                                   │
//! │  EmergencyHandle    CounterSet (ST answers)                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod counter;
pub mod engine;
pub mod error;
pub mod machine;
pub mod protocol;
pub mod transport_registry;
pub mod transports;

pub use crate::counter::{AckClass, CommandCounter};
pub use crate::engine::{EmergencySwitch, Engine, EngineStats};
pub use crate::error::MarkerError;
pub use crate::machine::{EmergencyHandle, ExecMode, Machine, MachineMonitor};
pub use crate::transport_registry::TransportRegistry;
pub use crate::transports::simulation::{SimulationHandle, SimulationTransport};
