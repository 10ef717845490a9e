//! G-code interpreter.
//!
//! Lines are tokenised, every parameter is resolved (variables, then one
//! bracket expression) and the command is dispatched on the closed
//! [`CommandCode`] set. Files and macros run synchronously, line by line,
//! in [`ExecMode::Batch`]; only an emergency stop aborts them.
//!
//! While a file runs the interpreter is borrowed exclusively. Pollers on
//! other threads use a [`StatusMonitor`], and [`Interpreter::subscribe`]
//! delivers every status transition.

use crate::command::{self, CommandCode, parse_line};
use crate::error::InterpreterError;
use crate::variables::Variables;
use marker_common::config::GcodeConfig;
use marker_common::types::{MachineSnapshot, Position, Status};
use marker_hal::{ExecMode, Machine, MachineMonitor, MarkerError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, error, info, warn};

/// Cause recorded for `M112`.
const M112_CAUSE: &str = "M112";

/// Length unit selected by `G20`/`G21`. Stored and reported only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[default]
    #[serde(rename = "mm")]
    Millimetre,
    #[serde(rename = "inch")]
    Inch,
}

/// Status report for pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Interpreter status code.
    pub status: Status,
    /// Tool position.
    pub position: Position,
    /// Homed flags as `[x, y, synthetic]`.
    pub axes_homed: [u8; 3],
    /// `G90` (true) or `G91` (false).
    pub absolute_positions: bool,
    /// File selected with `M23`.
    pub selected_file: Option<String>,
    /// Selected unit.
    pub unit: Unit,
    /// Last machine error.
    pub message: Option<String>,
    /// Percentage of acknowledged motion operations.
    pub percent_done: f64,
    /// Estimated seconds until every issued motion is acknowledged.
    pub eta_secs: Option<f64>,
}

/// Interpreter state shared with monitors.
#[derive(Debug, Clone)]
struct Session {
    status: Status,
    absolute: bool,
    unit: Unit,
    selected_file: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            status: Status::Idle,
            absolute: true,
            unit: Unit::default(),
            selected_file: None,
        }
    }
}

/// Idle and Busy read as Stopped once the machine is emergency stopped.
fn effective_status(status: Status, running: bool) -> Status {
    match status {
        Status::Idle | Status::Busy if !running => Status::Stopped,
        status => status,
    }
}

fn build_report(session: &Session, running: bool, snapshot: MachineSnapshot) -> StatusReport {
    StatusReport {
        status: effective_status(session.status, running),
        position: snapshot.position,
        axes_homed: snapshot.axes_homed,
        absolute_positions: session.absolute,
        selected_file: session.selected_file.clone(),
        unit: session.unit,
        message: snapshot.message,
        percent_done: snapshot.percent_done,
        eta_secs: snapshot.eta_secs,
    }
}

/// Cloneable read-only status view, usable while a file runs.
#[derive(Clone)]
pub struct StatusMonitor {
    session: Arc<Mutex<Session>>,
    machine: MachineMonitor,
}

impl StatusMonitor {
    /// Same as [`Interpreter::status`].
    pub fn status(&self) -> Status {
        let status = self.session.lock().status;
        effective_status(status, self.machine.is_running())
    }

    /// Same as [`Interpreter::report`].
    pub fn report(&self) -> StatusReport {
        let snapshot = self.machine.snapshot();
        let session = self.session.lock().clone();
        build_report(&session, self.machine.is_running(), snapshot)
    }
}

/// G-code session on one machine.
pub struct Interpreter {
    machine: Machine,
    config: GcodeConfig,
    session: Arc<Mutex<Session>>,
    listeners: Vec<Sender<Status>>,
    variables: Variables,
    depth: usize,
}

impl Interpreter {
    /// Interpreter on a started machine; status Idle.
    pub fn new(machine: Machine, config: GcodeConfig) -> Self {
        Self {
            machine,
            config,
            session: Arc::new(Mutex::new(Session::default())),
            listeners: Vec::new(),
            variables: Variables::new(),
            depth: 0,
        }
    }

    // ─── Collaborator interface ─────────────────────────────────────

    /// Execute one line.
    ///
    /// Blank lines are ignored; unknown codes are logged and ignored.
    pub fn execute_line(&mut self, line: &str, mode: ExecMode) -> Result<(), InterpreterError> {
        let Some(parsed) = parse_line(line) else {
            return Ok(());
        };
        info!("Processing: {}", line.trim_end());

        let params = parsed
            .params
            .iter()
            .map(|param| self.variables.resolve(param))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(name) = parsed.variable() {
            return self.define_variable(name, &params);
        }

        match parsed.token.parse::<CommandCode>() {
            Ok(code) => self.dispatch(code, &params, mode),
            Err(token) => {
                warn!("GCode {} is not implemented", token);
                Ok(())
            }
        }
    }

    /// Execute a file line by line.
    ///
    /// The outermost file sets the status to Busy and back to Idle (or
    /// Stopped after an emergency stop). Emergency stops abort the file
    /// and are returned; other errors are logged and skipped.
    pub fn execute_file(&mut self, path: &Path) -> Result<(), InterpreterError> {
        if self.depth >= self.config.max_macro_depth {
            return Err(InterpreterError::MacroDepth(self.config.max_macro_depth));
        }
        let content = std::fs::read_to_string(path).map_err(|source| InterpreterError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let outermost = self.depth == 0;
        if outermost {
            self.set_status(Status::Busy);
        }
        info!("Executing {}", path.display());

        self.depth += 1;
        let result = self.run_lines(&content);
        self.depth -= 1;

        if outermost {
            self.set_status(if self.machine.is_running() {
                Status::Idle
            } else {
                Status::Stopped
            });
        }
        result
    }

    /// Select a file below the G-code directory (`M23`).
    pub fn select_file(&mut self, name: &str) {
        info!("Selected file {}", name);
        self.session.lock().selected_file = Some(name.to_string());
    }

    /// Execute the selected file (`M24`).
    pub fn execute_selected(&mut self) -> Result<(), InterpreterError> {
        let name = self.selected_file().ok_or(InterpreterError::NoFileSelected)?;
        let path = self.config.gcode_path().join(name);
        self.execute_file(&path)
    }

    /// Execute a macro; relative paths resolve against the root directory.
    pub fn execute_macro(&mut self, path: &str) -> Result<(), InterpreterError> {
        let path = self.config.macro_path(Path::new(path));
        self.execute_file(&path)
    }

    /// Emergency stop (`M112`).
    pub fn emergency_stop(&mut self) -> Result<(), InterpreterError> {
        self.set_status(Status::EmergencyStopping);
        let result = self.machine.emergency_off(M112_CAUSE);
        self.set_status(Status::Stopped);
        Ok(result?)
    }

    /// Restart after an emergency stop (`M999`).
    ///
    /// Positioning mode, unit, selected file and variables are reset.
    /// Inside a file the status returns to Busy and the file goes on.
    pub fn restart(&mut self) -> Result<(), InterpreterError> {
        self.set_status(Status::Restarting);
        let result = self.machine.restart();

        {
            let mut session = self.session.lock();
            session.absolute = true;
            session.unit = Unit::default();
            session.selected_file = None;
        }
        self.variables.clear();

        match result {
            Ok(()) => {
                self.set_status(if self.depth > 0 {
                    Status::Busy
                } else {
                    Status::Idle
                });
                info!("Restart done");
                Ok(())
            }
            Err(e) => {
                self.set_status(Status::Stopped);
                Err(e.into())
            }
        }
    }

    /// Current status code.
    ///
    /// Reports Stopped when the machine was stopped behind the
    /// interpreter's back (e.g. by an emergency handle).
    pub fn status(&self) -> Status {
        let status = self.session.lock().status;
        effective_status(status, self.machine.is_running())
    }

    /// Status, position, homed flags, last error and progress.
    pub fn report(&self) -> StatusReport {
        let snapshot = self.machine.snapshot();
        let session = self.session.lock().clone();
        build_report(&session, self.machine.is_running(), snapshot)
    }

    /// Read-only status view for other threads.
    pub fn monitor(&self) -> StatusMonitor {
        StatusMonitor {
            session: Arc::clone(&self.session),
            machine: self.machine.monitor(),
        }
    }

    /// Receive every status change from now on.
    pub fn subscribe(&mut self) -> Receiver<Status> {
        let (tx, rx) = mpsc::channel();
        self.listeners.push(tx);
        rx
    }

    // ─── Accessors ──────────────────────────────────────────────────

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn is_absolute(&self) -> bool {
        self.session.lock().absolute
    }

    pub fn unit(&self) -> Unit {
        self.session.lock().unit
    }

    pub fn selected_file(&self) -> Option<String> {
        self.session.lock().selected_file.clone()
    }

    /// Give the machine back, e.g. for shutdown.
    pub fn into_machine(self) -> Machine {
        self.machine
    }

    // ─── Internals ──────────────────────────────────────────────────

    fn set_status(&mut self, status: Status) {
        debug!("Status {}", status);
        self.session.lock().status = status;
        // Dropped receivers unsubscribe.
        self.listeners.retain(|tx| tx.send(status).is_ok());
    }

    fn run_lines(&mut self, content: &str) -> Result<(), InterpreterError> {
        for (index, line) in content.lines().enumerate() {
            match self.execute_line(line, ExecMode::Batch) {
                Ok(()) => {}
                Err(e) if e.is_emergency() => {
                    error!("Line {}: {}; aborting", index + 1, e);
                    return Err(e);
                }
                Err(e) => error!("Line {}: {}", index + 1, e),
            }

            if !self.machine.is_running() {
                let cause = self
                    .machine
                    .error_message()
                    .unwrap_or_else(|| "machine stopped".to_string());
                warn!("Machine stopped after line {}; aborting", index + 1);
                return Err(MarkerError::EmergencyStop(cause).into());
            }
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        code: CommandCode,
        params: &[String],
        mode: ExecMode,
    ) -> Result<(), InterpreterError> {
        match code {
            CommandCode::G00 | CommandCode::G01 | CommandCode::G02 | CommandCode::G03 => {
                self.linear_move(code, params, mode)
            }
            CommandCode::G20 => {
                self.session.lock().unit = Unit::Inch;
                Ok(())
            }
            CommandCode::G21 => {
                self.session.lock().unit = Unit::Millimetre;
                Ok(())
            }
            CommandCode::G28 => self.home(params),
            CommandCode::G90 => {
                info!("Switch to absolute positioning");
                self.session.lock().absolute = true;
                Ok(())
            }
            CommandCode::G91 => {
                info!("Switch to relative positioning");
                self.session.lock().absolute = false;
                Ok(())
            }
            CommandCode::M23 => {
                let name = first_param(code, params)?;
                self.select_file(name);
                Ok(())
            }
            CommandCode::M24 => self.execute_selected(),
            CommandCode::M32 => {
                let name = first_param(code, params)?;
                self.select_file(name);
                self.execute_selected()
            }
            CommandCode::M98 => {
                // P<sep><path>
                let param = first_param(code, params)?;
                let path = param
                    .get(2..)
                    .filter(|path| !path.is_empty())
                    .ok_or_else(|| InterpreterError::InvalidParameter(param.to_string()))?;
                self.execute_macro(path)
            }
            CommandCode::M112 => self.emergency_stop(),
            CommandCode::M999 => self.restart(),
        }
    }

    fn linear_move(
        &mut self,
        code: CommandCode,
        params: &[String],
        mode: ExecMode,
    ) -> Result<(), InterpreterError> {
        let x = axis_word(params, 'X')?;
        let y = axis_word(params, 'Y')?;
        if matches!(code, CommandCode::G02 | CommandCode::G03) {
            debug!("{} approximated by a linear move", code);
        }

        if self.is_absolute() {
            self.machine.move_absolute(x, y, mode)?;
        } else {
            self.machine.move_relative(x, y, mode)?;
        }
        Ok(())
    }

    fn home(&mut self, params: &[String]) -> Result<(), InterpreterError> {
        match params.first().and_then(|p| p.chars().next()) {
            Some('X') => info!("Homing X axis"),
            Some('Y') => info!("Homing Y axis"),
            _ => info!("Homing X and Y axes"),
        }
        // The marker only homes both axes together.
        self.machine.home()?;
        Ok(())
    }

    fn define_variable(&mut self, name: &str, params: &[String]) -> Result<(), InterpreterError> {
        let values: Vec<&str> = params
            .iter()
            .map(String::as_str)
            .filter(|p| !p.is_empty())
            .collect();
        let value = values
            .get(1)
            .or_else(|| values.first())
            .ok_or_else(|| InterpreterError::MissingParameter(format!("#{name}")))?;
        let comment = values.get(2..).map(|rest| rest.join(" ")).unwrap_or_default();

        info!("Parsed variable #{} with value \"{}\" {}", name, value, comment);
        self.variables.define(name, value);
        Ok(())
    }
}

fn first_param(code: CommandCode, params: &[String]) -> Result<&str, InterpreterError> {
    params
        .first()
        .map(String::as_str)
        .ok_or_else(|| InterpreterError::MissingParameter(code.to_string()))
}

/// Axis word value; a missing word counts as zero.
fn axis_word(params: &[String], letter: char) -> Result<f64, InterpreterError> {
    command::word(params, letter)
        .map(|value| value.unwrap_or(0.0))
        .map_err(InterpreterError::InvalidParameter)
}
