//! Device transport trait and error types.
//!
//! This module defines:
//! - `Transport` trait - byte channel between the engine and the marker
//! - `TransportError` enum - error types for transport operations
//! - `TransportFactory` type alias - factory function type used by the registry
//!
//! The engine is the only user of a transport. It writes one framed
//! datagram at a time, flushes after every write and polls for answers
//! without blocking.

use crate::config::DeviceConfig;
use thiserror::Error;

/// Error types for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Device could not be opened.
    #[error("Device unavailable: {0}")]
    OpenFailed(String),

    /// No transport registered under this name.
    #[error("Transport not found: {0}")]
    NotFound(String),

    /// The transport was already handed back by a stopped engine.
    #[error("Transport closed")]
    Closed,

    /// I/O error while talking to the device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Factory function type for creating transports from device settings.
pub type TransportFactory = fn(&DeviceConfig) -> Result<Box<dyn Transport>, TransportError>;

/// Byte channel to the marker.
///
/// # Contract
///
/// | Operation        | Blocking | Notes                                   |
/// |------------------|----------|-----------------------------------------|
/// | `write()`        | may      | whole buffer or error                   |
/// | `flush()`        | may      | called after every write                |
/// | `read_pending()` | never    | appends what is available, may be zero  |
pub trait Transport: Send {
    /// Returns the transport's identifier (e.g. "serial", "simulation").
    fn name(&self) -> &'static str;

    /// Write the complete buffer.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Flush buffered output to the device.
    fn flush(&mut self) -> Result<(), TransportError>;

    /// Append every byte currently available to `buf` without blocking.
    ///
    /// Returns the number of bytes appended.
    fn read_pending(&mut self, buf: &mut Vec<u8>) -> Result<usize, TransportError>;
}
