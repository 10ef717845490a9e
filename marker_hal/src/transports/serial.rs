//! Serial port transport.
//!
//! The port timeout of the `serialport` crate applies to reads and writes
//! alike. Reads never wait because only `bytes_to_read()` bytes are
//! requested, so the timeout only bounds how long a write may block on a
//! full output buffer. A write must never be cut short: the device parser
//! cannot resynchronise on a partial datagram.

use marker_common::config::DeviceConfig;
use marker_common::transport::{Transport, TransportError};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

/// The marker on a serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `path` at `baud_rate`; a write blocks for at most `write_timeout`.
    ///
    /// # Errors
    /// Returns `TransportError::OpenFailed` if the port cannot be opened.
    pub fn open(path: &str, baud_rate: u32, write_timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .timeout(write_timeout)
            .open()
            .map_err(|e| TransportError::OpenFailed(format!("{path}: {e}")))?;
        debug!(
            "Serial port {} opened at {} baud (write timeout {:?})",
            path, baud_rate, write_timeout
        );
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.port.flush()?;
        Ok(())
    }

    fn read_pending(&mut self, buf: &mut Vec<u8>) -> Result<usize, TransportError> {
        let available = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
        if available == 0 {
            return Ok(0);
        }

        let start = buf.len();
        buf.resize(start + available, 0);
        match self.port.read(&mut buf[start..]) {
            Ok(n) => {
                buf.truncate(start + n);
                Ok(n)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                buf.truncate(start);
                Ok(0)
            }
            Err(e) => {
                buf.truncate(start);
                Err(e.into())
            }
        }
    }
}

/// Factory for the `serial` transport.
pub fn open(config: &DeviceConfig) -> Result<Box<dyn Transport>, TransportError> {
    Ok(Box::new(SerialTransport::open(
        &config.port,
        config.baud_rate,
        config.write_timeout(),
    )?))
}
