//! Transport registry.
//!
//! Maps transport names (as used in `[device] transport = ...`) to factory
//! functions. Built at startup and queried once when the machine is opened.

use marker_common::config::DeviceConfig;
use marker_common::transport::{Transport, TransportError, TransportFactory};
use std::collections::HashMap;
use tracing::info;

/// Registry of available transports.
pub struct TransportRegistry {
    factories: HashMap<&'static str, TransportFactory>,
}

impl TransportRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding every built-in transport.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::transports::register_all_transports(&mut registry);
        registry
    }

    /// Register a transport factory.
    ///
    /// # Panics
    /// Panics if a transport with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: TransportFactory) {
        if self.factories.contains_key(name) {
            panic!("Transport '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Get a transport factory by name.
    pub fn get_factory(&self, name: &str) -> Option<TransportFactory> {
        self.factories.get(name).copied()
    }

    /// Open the transport named in `config`.
    ///
    /// # Errors
    /// Returns `TransportError::NotFound` for unknown names, or the
    /// factory's error when the device cannot be opened.
    pub fn open(&self, config: &DeviceConfig) -> Result<Box<dyn Transport>, TransportError> {
        let factory = self
            .get_factory(&config.transport)
            .ok_or_else(|| TransportError::NotFound(config.transport.clone()))?;
        let transport = factory(config)?;
        info!("Opened '{}' transport", transport.name());
        Ok(transport)
    }

    /// List all registered transport names.
    pub fn list(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::simulation;

    #[test]
    fn registry_opens_by_name() {
        let mut reg = TransportRegistry::new();
        reg.register("sim", simulation::open);

        let config = DeviceConfig {
            transport: "sim".to_string(),
            ..DeviceConfig::default()
        };
        let transport = reg.open(&config).expect("should open");
        assert_eq!(transport.name(), "simulation");
    }

    #[test]
    fn registry_transport_not_found() {
        let reg = TransportRegistry::with_builtin();
        let config = DeviceConfig {
            transport: "canbus".to_string(),
            ..DeviceConfig::default()
        };
        assert!(matches!(reg.open(&config), Err(TransportError::NotFound(_))));
    }

    #[test]
    fn builtin_transports() {
        let mut names = TransportRegistry::with_builtin().list();
        names.sort();
        assert_eq!(names, vec!["serial", "simulation"]);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn registry_duplicate_panics() {
        let mut reg = TransportRegistry::new();
        reg.register("dup", simulation::open);
        reg.register("dup", simulation::open);
    }
}
