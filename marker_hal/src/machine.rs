//! Machine state and safety gating.
//!
//! `Machine` is the single owner of the authoritative tool position. Every
//! motion is checked against the travel limits and the homed flags before a
//! fragment reaches the engine; a rejected motion never changes the position.
//!
//! Rejections behave according to [`ExecMode`]:
//!
//! | Mode          | Effect                                                   |
//! |---------------|----------------------------------------------------------|
//! | `Interactive` | error message stored, `SafetyViolation` returned         |
//! | `Batch`       | emergency off, `EmergencyStop` returned, file aborted    |

use crate::counter::{AckClass, CommandCounter};
use crate::engine::{EmergencySwitch, Engine};
use crate::error::MarkerError;
use crate::protocol::{
    self, HOME, HOME_ACKS, INIT_ACKS, InitProfile, MOVE_ACKS, NEEDLE_ACKS, NEEDLE_DOWN,
};
use marker_common::config::{EngineConfig, MachineLimits, MarkerConfig};
use marker_common::transport::Transport;
use marker_common::types::{HomedAxes, MachineSnapshot, Position, SafetyPhase, round_coordinate};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pre-home travel target; homing from here is short.
const PRE_HOME: Position = Position::new(1.0, 1.0);

/// How a safety violation is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Single command from an operator: report and continue.
    Interactive,
    /// Line of a file: stop the machine.
    Batch,
}

#[derive(Debug, Clone)]
struct MachineState {
    position: Position,
    homed: HomedAxes,
    error: Option<String>,
    phase: SafetyPhase,
}

impl Default for MachineState {
    fn default() -> Self {
        Self {
            position: Position::ORIGIN,
            homed: HomedAxes::unhomed(),
            error: None,
            phase: SafetyPhase::Uninitialized,
        }
    }
}

/// Issue emergency off on `switch` and record it in `state`.
///
/// Repeated calls leave the first cause in place.
fn engage(
    switch: &EmergencySwitch,
    state: &mut MachineState,
    cause: &str,
) -> Result<(), MarkerError> {
    state.phase = SafetyPhase::EmergencyStopped;
    match switch.trip() {
        Ok(true) => {
            let message = format!("Emergency off triggered by {cause}");
            error!("{}", message);
            state.error = Some(message);
            Ok(())
        }
        Ok(false) => {
            debug!("Emergency off already issued (cause: {})", cause);
            Ok(())
        }
        Err(e) => {
            let message = format!("Emergency off triggered by {cause}");
            error!("{} (device write failed: {})", message, e);
            state.error = Some(message);
            Err(e.into())
        }
    }
}

fn effective_phase(phase: SafetyPhase, motion: &CommandCounter) -> SafetyPhase {
    if phase == SafetyPhase::Ready && !motion.is_ready() {
        SafetyPhase::Moving
    } else {
        phase
    }
}

fn snapshot_of(state: &MachineState, motion: &CommandCounter) -> MachineSnapshot {
    MachineSnapshot {
        phase: effective_phase(state.phase, motion),
        position: state.position,
        axes_homed: state.homed.as_triple(),
        message: state.error.clone(),
        percent_done: motion.percent_done(),
        eta_secs: motion.eta().map(|eta| eta.as_secs_f64()),
    }
}

/// Cloneable emergency trigger for other threads (signal handler, API).
///
/// Always targets the current engine session, also after a restart.
#[derive(Clone)]
pub struct EmergencyHandle {
    switch: Arc<Mutex<EmergencySwitch>>,
    state: Arc<Mutex<MachineState>>,
}

impl EmergencyHandle {
    /// Stop the machine; a no-op when already stopped.
    pub fn trigger(&self, cause: &str) -> Result<(), MarkerError> {
        let mut state = self.state.lock();
        let switch = self.switch.lock().clone();
        engage(&switch, &mut state, cause)
    }
}

/// Cloneable read-only view of the machine for status pollers.
///
/// Follows the current engine session, also after a restart.
#[derive(Clone)]
pub struct MachineMonitor {
    switch: Arc<Mutex<EmergencySwitch>>,
    state: Arc<Mutex<MachineState>>,
}

impl MachineMonitor {
    /// Whether the session has not been emergency stopped.
    pub fn is_running(&self) -> bool {
        self.switch.lock().is_running()
    }

    pub fn position(&self) -> Position {
        self.state.lock().position
    }

    /// Same view as [`Machine::snapshot`].
    pub fn snapshot(&self) -> MachineSnapshot {
        let counter = self.switch.lock().counter(AckClass::Motion);
        snapshot_of(&self.state.lock(), &counter)
    }
}

/// The marker: engine session plus position, homed flags and safety phase.
pub struct Machine {
    engine: Engine,
    switch: Arc<Mutex<EmergencySwitch>>,
    state: Arc<Mutex<MachineState>>,
    limits: MachineLimits,
    profile: InitProfile,
    engine_config: EngineConfig,
}

impl Machine {
    /// Wrap `transport` in an idle engine. Nothing is sent yet.
    pub fn new(transport: Box<dyn Transport>, config: &MarkerConfig) -> Self {
        let engine = Engine::new(transport, &config.engine);
        let switch = Arc::new(Mutex::new(engine.emergency_switch()));
        Self {
            engine,
            switch,
            state: Arc::new(Mutex::new(MachineState::default())),
            limits: config.machine,
            profile: InitProfile::select(config.device.slow_motion),
            engine_config: config.engine,
        }
    }

    /// Open a session: start the loop, initialise and home.
    ///
    /// # Errors
    /// Transport errors while spawning the loop thread.
    pub fn start(transport: Box<dyn Transport>, config: &MarkerConfig) -> Result<Self, MarkerError> {
        let mut machine = Self::new(transport, config);
        machine.engine.start()?;
        machine.initialize()?;
        machine.home()?;
        Ok(machine)
    }

    /// Enqueue the init sequence.
    pub fn initialize(&self) -> Result<(), MarkerError> {
        let mut state = self.state.lock();
        self.ensure_running(&state)?;
        self.engine.enqueue(&protocol::init(&self.profile), AckClass::Motion, INIT_ACKS);
        state.homed = HomedAxes::unhomed();
        state.phase = SafetyPhase::HomingRequired;
        info!(
            "Marker initialised (speed {}x{}, power {})",
            self.profile.speed_x, self.profile.speed_y, self.profile.power
        );
        Ok(())
    }

    /// Home both axes; the position becomes the origin.
    pub fn home(&self) -> Result<(), MarkerError> {
        let mut state = self.state.lock();
        self.ensure_running(&state)?;

        if !state.position.is_origin()
            && state.homed.motion_allowed()
            && PRE_HOME.within(&self.limits)
        {
            self.issue_move(&mut state, PRE_HOME, ExecMode::Interactive)?;
        }

        self.engine.enqueue(HOME, AckClass::Motion, HOME_ACKS);
        state.homed = HomedAxes::all();
        state.position = Position::ORIGIN;
        state.phase = SafetyPhase::Ready;
        info!("Homing X and Y");
        Ok(())
    }

    /// Move by `(dx, dy)` millimetres.
    ///
    /// Returns the new position.
    pub fn move_relative(&self, dx: f64, dy: f64, mode: ExecMode) -> Result<Position, MarkerError> {
        let mut state = self.state.lock();
        let target = state
            .position
            .offset(round_coordinate(dx), round_coordinate(dy));
        self.issue_move(&mut state, target, mode)
    }

    /// Move to `(x, y)`.
    ///
    /// Returns the new position, `(x, y)` at device precision.
    pub fn move_absolute(&self, x: f64, y: f64, mode: ExecMode) -> Result<Position, MarkerError> {
        let mut state = self.state.lock();
        let target = Position::new(x, y).rounded();
        self.issue_move(&mut state, target, mode)
    }

    /// Lower and raise the needle once.
    pub fn needle_down(&self) -> Result<(), MarkerError> {
        let state = self.state.lock();
        self.ensure_running(&state)?;
        self.engine.enqueue(NEEDLE_DOWN, AckClass::Motion, NEEDLE_ACKS);
        debug!("Needle down at {}", state.position);
        Ok(())
    }

    /// Halt the device immediately. A second call is a no-op.
    pub fn emergency_off(&self, cause: &str) -> Result<(), MarkerError> {
        let mut state = self.state.lock();
        let switch = self.switch.lock().clone();
        engage(&switch, &mut state, cause)
    }

    /// Emergency off (if still running), then a fresh session on the same
    /// transport: state reset, initialised and homed.
    pub fn restart(&mut self) -> Result<(), MarkerError> {
        info!("Restarting marker");
        if self.engine.is_running() {
            if let Err(e) = self.emergency_off("restart") {
                warn!("Emergency off before restart failed: {}", e);
            }
        }
        self.engine.wait_emergency_done(self.engine_config.restart_poll());

        let was_started = self.engine.is_started();
        {
            // Emergency handles wait here and trip the new session.
            let mut state = self.state.lock();
            let mut switch = self.switch.lock();
            self.engine.renew()?;
            *switch = self.engine.emergency_switch();
            *state = MachineState::default();
        }

        self.initialize()?;
        self.home()?;
        if was_started {
            self.engine.start()?;
        }
        info!("Marker restarted");
        Ok(())
    }

    /// Block until every issued motion is acknowledged.
    ///
    /// Returns `false` on timeout or emergency off.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.engine.wait_ready(AckClass::Motion, timeout)
    }

    /// Trigger for other threads.
    pub fn emergency_handle(&self) -> EmergencyHandle {
        EmergencyHandle {
            switch: Arc::clone(&self.switch),
            state: Arc::clone(&self.state),
        }
    }

    pub fn position(&self) -> Position {
        self.state.lock().position
    }

    pub fn homed(&self) -> HomedAxes {
        self.state.lock().homed
    }

    pub fn error_message(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn limits(&self) -> MachineLimits {
        self.limits
    }

    /// Whether the session has not been emergency stopped.
    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Current safety phase; `Moving` while motions are unacknowledged.
    pub fn phase(&self) -> SafetyPhase {
        let phase = self.state.lock().phase;
        effective_phase(phase, &self.motion_counter())
    }

    /// Snapshot of the motion counter.
    pub fn motion_counter(&self) -> CommandCounter {
        self.engine.counter(AckClass::Motion)
    }

    /// The engine session.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Read-only view for status reporting.
    pub fn snapshot(&self) -> MachineSnapshot {
        let counter = self.motion_counter();
        snapshot_of(&self.state.lock(), &counter)
    }

    /// Read-only view for other threads.
    pub fn monitor(&self) -> MachineMonitor {
        MachineMonitor {
            switch: Arc::clone(&self.switch),
            state: Arc::clone(&self.state),
        }
    }

    /// Stop the session and hand the transport back.
    pub fn shutdown(self) -> Result<Box<dyn Transport>, MarkerError> {
        Ok(self.engine.shutdown()?)
    }

    // ─── Internals ──────────────────────────────────────────────────

    fn ensure_running(&self, state: &MachineState) -> Result<(), MarkerError> {
        if state.phase.accepts_motion() && self.engine.is_running() {
            return Ok(());
        }
        Err(MarkerError::EmergencyStop(
            state
                .error
                .clone()
                .unwrap_or_else(|| "machine is emergency stopped".to_string()),
        ))
    }

    fn issue_move(
        &self,
        state: &mut MachineState,
        target: Position,
        mode: ExecMode,
    ) -> Result<Position, MarkerError> {
        self.ensure_running(state)?;

        if !target.within(&self.limits) {
            return self.reject(state, format!("{target} out of bounds."), mode);
        }
        if !state.homed.motion_allowed() {
            return self.reject(state, "Axes not homed.".to_string(), mode);
        }

        let dx = round_coordinate(target.x - state.position.x);
        let dy = round_coordinate(target.y - state.position.y);
        self.engine
            .enqueue(&protocol::move_relative(dx, dy), AckClass::Motion, MOVE_ACKS);
        state.position = state.position.offset(dx, dy);
        debug!("Move by ({:.2},{:.2}) to {}", dx, dy, state.position);
        Ok(state.position)
    }

    fn reject(
        &self,
        state: &mut MachineState,
        cause: String,
        mode: ExecMode,
    ) -> Result<Position, MarkerError> {
        match mode {
            ExecMode::Interactive => {
                warn!("{}", cause);
                state.error = Some(cause.clone());
                Err(MarkerError::SafetyViolation(cause))
            }
            ExecMode::Batch => {
                let switch = self.switch.lock().clone();
                engage(&switch, state, &cause)?;
                Err(MarkerError::EmergencyStop(cause))
            }
        }
    }
}
