//! Transmit/receive engine.
//!
//! The `Engine` owns the transport and two text buffers shared with a
//! background thread:
//!
//! ```text
//!  callers ──enqueue──► outbound ──take_frame──► ;datagram; ──► transport
//!                                                                  │
//!  counters ◄──AckClass── answer ◄──take_answer── inbound ◄── read_pending
//! ```
//!
//! Callers never wait for the device; they append a fragment and raise the
//! expected count of its answer class. The loop appends a heartbeat whenever
//! no complete frame is buffered, transmits every complete frame, and counts
//! answers as they arrive. Emergency off bypasses the outbound buffer and
//! stops the loop for good.

use crate::counter::{AckClass, CommandCounter, CounterSet};
use crate::protocol::{self, EMERGENCY_OFF, FRAME_SENTINEL, HEARTBEAT};
use marker_common::config::EngineConfig;
use marker_common::transport::{Transport, TransportError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// State shared between callers and the loop thread.
struct Shared {
    outbound: Mutex<String>,
    inbound: Mutex<String>,
    counters: Mutex<CounterSet>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    /// Cleared by emergency off only.
    running: AtomicBool,
    /// Clean shutdown of the loop thread.
    stop_requested: AtomicBool,
    /// Set once the emergency fragment has been written.
    emergency_done: AtomicBool,
    frames_sent: AtomicU64,
    answers_counted: AtomicU64,
    answers_ignored: AtomicU64,
}

impl Shared {
    fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            outbound: Mutex::new(String::new()),
            inbound: Mutex::new(String::new()),
            counters: Mutex::new(CounterSet::new()),
            transport: Mutex::new(Some(transport)),
            running: AtomicBool::new(true),
            stop_requested: AtomicBool::new(false),
            emergency_done: AtomicBool::new(false),
            frames_sent: AtomicU64::new(0),
            answers_counted: AtomicU64::new(0),
            answers_ignored: AtomicU64::new(0),
        }
    }

    #[inline]
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// One loop iteration: heartbeat, transmit every complete frame, count answers.
    fn pump(&self) -> Result<usize, TransportError> {
        if !self.is_running() {
            return Ok(0);
        }

        {
            let mut outbound = self.outbound.lock();
            if !outbound.contains(FRAME_SENTINEL) {
                outbound.push_str(HEARTBEAT);
            }
        }

        let mut sent = 0;
        while self.is_running() {
            let next = protocol::take_frame(&mut self.outbound.lock());
            let Some(datagram) = next else {
                break;
            };
            let wire = protocol::wrap_frame(&datagram);

            let mut guard = self.transport.lock();
            // Emergency off may have been written while we waited for the lock.
            if !self.is_running() {
                break;
            }
            let transport = guard.as_mut().ok_or(TransportError::Closed)?;
            transport.write(wire.as_bytes())?;
            transport.flush()?;
            debug!("write: {}", wire.escape_debug());

            let mut received = Vec::new();
            transport.read_pending(&mut received)?;
            drop(guard);

            self.frames_sent.fetch_add(1, Ordering::Relaxed);
            sent += 1;
            if !received.is_empty() {
                self.process_answers(&received);
            }
        }
        Ok(sent)
    }

    /// Transmit everything buffered.
    ///
    /// The last fragment only becomes a complete frame once a heartbeat
    /// follows it, hence the second pass.
    fn drain(&self) -> Result<usize, TransportError> {
        Ok(self.pump()? + self.pump()?)
    }

    /// Append received bytes and count every complete answer.
    fn process_answers(&self, bytes: &[u8]) {
        let mut inbound = self.inbound.lock();
        inbound.push_str(&String::from_utf8_lossy(bytes));
        let now = Instant::now();

        while let Some(answer) = protocol::take_answer(&mut inbound) {
            debug!("read: {}", answer.escape_debug());
            let class = protocol::answer_prefix(&answer).and_then(AckClass::from_prefix);
            let Some(class) = class else {
                self.answers_ignored.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            let mut counters = self.counters.lock();
            let counter = counters.get_mut(class);
            counter.complete(now);
            self.answers_counted.fetch_add(1, Ordering::Relaxed);
            info!(
                "{}/{} {} executed ({:.0}%{}).",
                counter.done(),
                counter.expected(),
                class.prefix(),
                counter.percent_done(),
                counter
                    .eta()
                    .map(|eta| format!(", eta {:.1}s", eta.as_secs_f64()))
                    .unwrap_or_default()
            );
        }
    }

    /// Write the emergency fragment directly. Returns `false` if already stopped.
    fn emergency_off(&self) -> Result<bool, TransportError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }

        let result = {
            let mut guard = self.transport.lock();
            match guard.as_mut() {
                Some(transport) => transport
                    .write(EMERGENCY_OFF.as_bytes())
                    .and_then(|()| transport.flush()),
                None => Err(TransportError::Closed),
            }
        };
        // Waiters must be released even if the write failed.
        self.emergency_done.store(true, Ordering::SeqCst);
        result.map(|()| true)
    }
}

/// Loop statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Datagrams written to the transport.
    pub frames_sent: u64,
    /// Answers matched to a known class.
    pub answers_counted: u64,
    /// Answers with an unknown or empty prefix.
    pub answers_ignored: u64,
}

/// Cloneable trigger for the emergency off of one engine session.
///
/// Usable from any thread, e.g. a signal handler.
#[derive(Clone)]
pub struct EmergencySwitch {
    shared: Arc<Shared>,
}

impl EmergencySwitch {
    /// Stop the loop and write the emergency fragment.
    ///
    /// Returns `Ok(false)` when the session was already stopped; nothing is
    /// written in that case.
    pub fn trip(&self) -> Result<bool, TransportError> {
        self.shared.emergency_off()
    }

    /// Whether the session is still running.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Snapshot of the counter of `class` in this session.
    pub fn counter(&self, class: AckClass) -> CommandCounter {
        self.shared.counters.lock().get(class).clone()
    }
}

/// Protocol session over one transport.
pub struct Engine {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    poll_interval: Duration,
}

impl Engine {
    /// Create an engine; the loop thread is not started yet.
    pub fn new(transport: Box<dyn Transport>, config: &EngineConfig) -> Self {
        info!(
            "Engine created on '{}' transport (poll={}ms)",
            transport.name(),
            config.poll_interval_ms
        );
        Self {
            shared: Arc::new(Shared::new(transport)),
            worker: None,
            poll_interval: config.poll_interval(),
        }
    }

    /// Spawn the transmit/receive loop thread.
    ///
    /// # Errors
    /// Returns `TransportError::Io` if the thread cannot be spawned.
    pub fn start(&mut self) -> Result<(), TransportError> {
        if self.worker.is_some() {
            return Ok(());
        }
        self.shared.stop_requested.store(false, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let poll = self.poll_interval;
        let handle = thread::Builder::new()
            .name("marker-txrx".to_string())
            .spawn(move || run_loop(&shared, poll))?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Whether the loop thread has been spawned.
    pub fn is_started(&self) -> bool {
        self.worker.is_some()
    }

    /// Run one loop iteration on the calling thread.
    ///
    /// Returns the number of datagrams written.
    pub fn pump(&self) -> Result<usize, TransportError> {
        self.shared.pump()
    }

    /// Append `fragment` to the outbound buffer, expecting `count`
    /// operations of `class` to be acknowledged.
    pub fn enqueue(&self, fragment: &str, class: AckClass, count: u64) {
        // Raise expected first so an early answer never overshoots.
        self.shared.counters.lock().get_mut(class).expect(count);
        self.shared.outbound.lock().push_str(fragment);
        debug!("enqueue: {} (+{} {})", fragment.escape_debug(), count, class.prefix());
    }

    /// Stop the loop and write the emergency fragment directly.
    ///
    /// Returns `Ok(false)` when the session was already stopped.
    pub fn emergency_off(&self) -> Result<bool, TransportError> {
        self.shared.emergency_off()
    }

    /// Trigger usable from other threads.
    pub fn emergency_switch(&self) -> EmergencySwitch {
        EmergencySwitch {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether emergency off has not been issued yet.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Whether the emergency fragment has been written.
    pub fn emergency_done(&self) -> bool {
        self.shared.emergency_done.load(Ordering::SeqCst)
    }

    /// Block until the emergency fragment has been written.
    pub fn wait_emergency_done(&self, poll: Duration) {
        while !self.emergency_done() {
            thread::sleep(poll);
        }
    }

    /// Block until every issued operation of `class` is acknowledged.
    ///
    /// Returns `false` on timeout or when the session stops first.
    pub fn wait_ready(&self, class: AckClass, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.counter(class).is_ready() {
                return true;
            }
            if !self.is_running() || Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Snapshot of the counter of `class`.
    pub fn counter(&self, class: AckClass) -> CommandCounter {
        self.shared.counters.lock().get(class).clone()
    }

    /// Buffered, not yet transmitted text.
    pub fn pending_outbound(&self) -> String {
        self.shared.outbound.lock().clone()
    }

    /// Loop statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            frames_sent: self.shared.frames_sent.load(Ordering::Relaxed),
            answers_counted: self.shared.answers_counted.load(Ordering::Relaxed),
            answers_ignored: self.shared.answers_ignored.load(Ordering::Relaxed),
        }
    }

    /// Discard the session and start a fresh one on the same transport.
    ///
    /// Buffers, counters and flags are new; the loop thread is not restarted.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` if the transport was already taken.
    pub fn renew(&mut self) -> Result<(), TransportError> {
        self.stop_worker();
        let transport = self
            .shared
            .transport
            .lock()
            .take()
            .ok_or(TransportError::Closed)?;
        self.shared = Arc::new(Shared::new(transport));
        info!("Engine session renewed");
        Ok(())
    }

    /// Stop the loop thread, transmit what is still buffered and hand the
    /// transport back.
    ///
    /// Nothing is transmitted after an emergency off.
    pub fn shutdown(mut self) -> Result<Box<dyn Transport>, TransportError> {
        self.stop_worker();
        if self.shared.is_running() {
            match self.shared.drain() {
                Ok(sent) => debug!("Drained {} frames before shutdown", sent),
                Err(e) => warn!("Outbound buffer not drained: {}", e),
            }
        }
        let stats = self.stats();
        info!(
            "Engine shut down ({} frames, {} answers counted, {} ignored)",
            stats.frames_sent, stats.answers_counted, stats.answers_ignored
        );
        self.shared
            .transport
            .lock()
            .take()
            .ok_or(TransportError::Closed)
    }

    fn stop_worker(&mut self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Transmit/receive thread panicked");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// Background loop; ends on emergency off or shutdown.
fn run_loop(shared: &Shared, poll: Duration) {
    info!("Transmit/receive loop started");
    let mut failures: u64 = 0;

    while shared.is_running() && !shared.stop_requested.load(Ordering::SeqCst) {
        if let Err(e) = shared.pump() {
            failures += 1;
            if failures <= 10 || failures % 100 == 0 {
                warn!("Transmit/receive failure #{}: {}", failures, e);
            }
        }
        thread::sleep(poll);
    }

    info!(
        "Transmit/receive loop stopped after {} frames (running={}, failures={})",
        shared.frames_sent.load(Ordering::Relaxed),
        shared.is_running(),
        failures
    );
}
