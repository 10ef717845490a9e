//! Transport implementations.
//!
//! - [`serial`] - the marker on a serial port
//! - [`simulation`] - in-memory device for development and testing

pub mod serial;
pub mod simulation;

use crate::transport_registry::TransportRegistry;

/// Register every built-in transport.
pub fn register_all_transports(registry: &mut TransportRegistry) {
    registry.register("serial", serial::open);
    registry.register("simulation", simulation::open);
}
