//! In-memory marker.
//!
//! Parses the `;`-separated command stream written to it and answers the way
//! the Borries firmware does:
//!
//! | Command         | Answers                             |
//! |-----------------|-------------------------------------|
//! | `*INITstn`      | 24 × `ST` (init sequence complete)  |
//! | `*RTHOME`       | 4 × `ST`                            |
//! | `*PR<dx>,<dy>`  | 2 × `ST`                            |
//! | `*WT250`        | 2 × `ST` (needle actuation)         |
//! | `*SH`           | `RSIX800O00` (unknown to the engine)|
//! | `*HE`           | none; silent until the next init    |
//!
//! A [`SimulationHandle`] shares the device state with tests, which can
//! inspect the wire stream, inject raw answers or switch answering off.

use marker_common::config::DeviceConfig;
use marker_common::transport::{Transport, TransportError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Motion acknowledgment as sent by the device.
pub const ACK: &str = "ST 00 XX 00 60 00 00 00 00 00 00 00 00 00\r";

/// Heartbeat reply; its prefix is not a known answer class.
pub const HEARTBEAT_REPLY: &str = "RSIX800O00\r";

const INIT_ANSWERS: usize = 24;
const HOME_ANSWERS: usize = 4;
const MOVE_ANSWERS: usize = 2;
const NEEDLE_ANSWERS: usize = 2;

#[derive(Debug)]
struct Device {
    written: Vec<u8>,
    token: String,
    replies: Vec<u8>,
    initialized: bool,
    halted: bool,
    auto_answer: bool,
    acks_sent: usize,
    moves: usize,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            written: Vec::new(),
            token: String::new(),
            replies: Vec::new(),
            initialized: false,
            halted: false,
            auto_answer: true,
            acks_sent: 0,
            moves: 0,
        }
    }
}

impl Device {
    fn receive(&mut self, bytes: &[u8]) {
        self.written.extend_from_slice(bytes);
        for ch in String::from_utf8_lossy(bytes).chars() {
            if ch == ';' {
                let token = std::mem::take(&mut self.token);
                self.command(&token);
            } else {
                self.token.push(ch);
            }
        }
    }

    fn command(&mut self, token: &str) {
        if token == "*INITstn" {
            self.initialized = true;
            self.halted = false;
            self.ack(INIT_ANSWERS);
            return;
        }
        if self.halted {
            return;
        }

        if token == "*HE" {
            self.halted = true;
        } else if token.starts_with("*RTHOME") {
            self.ack(HOME_ANSWERS);
        } else if token.starts_with("*PR") {
            self.moves += 1;
            self.ack(MOVE_ANSWERS);
        } else if token == "*WT250" {
            self.ack(NEEDLE_ANSWERS);
        } else if token == "*SH" && self.auto_answer {
            self.replies.extend_from_slice(HEARTBEAT_REPLY.as_bytes());
        }
    }

    fn ack(&mut self, count: usize) {
        if !self.auto_answer {
            return;
        }
        for _ in 0..count {
            self.replies.extend_from_slice(ACK.as_bytes());
        }
        self.acks_sent += count;
    }
}

/// Test and inspection side of a [`SimulationTransport`].
#[derive(Clone)]
pub struct SimulationHandle {
    device: Arc<Mutex<Device>>,
}

impl SimulationHandle {
    /// Everything written so far.
    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.device.lock().written).into_owned()
    }

    /// Forget the recorded wire stream.
    pub fn clear_written(&self) {
        self.device.lock().written.clear();
    }

    /// Whether an init sequence has been received.
    pub fn initialized(&self) -> bool {
        self.device.lock().initialized
    }

    /// Whether the device received emergency off and has not been re-initialised.
    pub fn halted(&self) -> bool {
        self.device.lock().halted
    }

    /// Number of `ST` answers queued so far.
    pub fn acks_sent(&self) -> usize {
        self.device.lock().acks_sent
    }

    /// Relative moves received.
    pub fn moves(&self) -> usize {
        self.device.lock().moves
    }

    /// Enable or disable automatic answers.
    pub fn set_auto_answer(&self, enabled: bool) {
        self.device.lock().auto_answer = enabled;
    }

    /// Queue raw bytes as if the device had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        self.device.lock().replies.extend_from_slice(bytes);
    }
}

/// Transport backed by the in-memory device.
pub struct SimulationTransport {
    device: Arc<Mutex<Device>>,
}

impl SimulationTransport {
    pub fn new() -> Self {
        Self {
            device: Arc::new(Mutex::new(Device::default())),
        }
    }

    /// Transport plus a handle onto the same device.
    pub fn with_handle() -> (Self, SimulationHandle) {
        let transport = Self::new();
        let handle = transport.handle();
        (transport, handle)
    }

    /// Handle onto this transport's device.
    pub fn handle(&self) -> SimulationHandle {
        SimulationHandle {
            device: Arc::clone(&self.device),
        }
    }
}

impl Default for SimulationTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulationTransport {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        trace!("simulation rx {} bytes", bytes.len());
        self.device.lock().receive(bytes);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn read_pending(&mut self, buf: &mut Vec<u8>) -> Result<usize, TransportError> {
        let mut device = self.device.lock();
        let n = device.replies.len();
        buf.append(&mut device.replies);
        Ok(n)
    }
}

/// Factory for the `simulation` transport.
pub fn open(_config: &DeviceConfig) -> Result<Box<dyn Transport>, TransportError> {
    Ok(Box::new(SimulationTransport::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EMERGENCY_OFF, HOME, InitProfile, NEEDLE_DOWN, init, move_relative};

    fn read_all(transport: &mut SimulationTransport) -> String {
        let mut buf = Vec::new();
        transport.read_pending(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn answers_like_the_marker() {
        let (mut transport, handle) = SimulationTransport::with_handle();

        transport
            .write(init(&InitProfile::NORMAL).as_bytes())
            .unwrap();
        assert!(handle.initialized());
        assert_eq!(read_all(&mut transport).matches(ACK).count(), 24);

        transport.write(HOME.as_bytes()).unwrap();
        let answers = read_all(&mut transport);
        assert_eq!(answers.matches(ACK).count(), 4);
        assert!(answers.contains(HEARTBEAT_REPLY));

        transport.write(move_relative(1.0, 1.0).as_bytes()).unwrap();
        assert_eq!(read_all(&mut transport).matches(ACK).count(), 2);

        transport.write(NEEDLE_DOWN.as_bytes()).unwrap();
        assert_eq!(read_all(&mut transport).matches(ACK).count(), 2);
        assert_eq!(handle.moves(), 1);
    }

    #[test]
    fn tokens_may_span_writes() {
        let (mut transport, handle) = SimulationTransport::with_handle();
        transport.write(b";*PR1.0").unwrap();
        assert_eq!(handle.acks_sent(), 0);
        transport.write(b"0,2.00;").unwrap();
        assert_eq!(handle.acks_sent(), 2);
    }

    #[test]
    fn silent_after_emergency_off() {
        let (mut transport, handle) = SimulationTransport::with_handle();
        transport.write(EMERGENCY_OFF.as_bytes()).unwrap();
        assert!(handle.halted());

        transport.write(move_relative(1.0, 1.0).as_bytes()).unwrap();
        assert!(read_all(&mut transport).is_empty());
        assert_eq!(handle.moves(), 0);
        assert!(handle.written().starts_with('\x18'));
    }

    #[test]
    fn injected_answers_are_read() {
        let (mut transport, handle) = SimulationTransport::with_handle();
        handle.set_auto_answer(false);
        transport.write(move_relative(1.0, 1.0).as_bytes()).unwrap();
        assert!(read_all(&mut transport).is_empty());

        handle.inject(b"ST 00\r");
        assert_eq!(read_all(&mut transport), "ST 00\r");
    }
}
