//! Interpreter integration tests: files, macros and status transitions
//! against the simulated device.

use marker_common::config::MarkerConfig;
use marker_common::transport::{Transport, TransportError};
use marker_common::types::{Position, Status};
use marker_gcode::{Interpreter, InterpreterError, StatusMonitor};
use marker_hal::protocol::EMERGENCY_OFF;
use marker_hal::{ExecMode, Machine, SimulationHandle, SimulationTransport};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tempfile::TempDir;

/// Workspace with a `gcodes/` directory below the root.
struct Fixture {
    root: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().expect("tempdir");
        fs::create_dir(root.path().join("gcodes")).expect("gcodes dir");
        Self { root }
    }

    fn gcode(&self, name: &str, content: &str) -> &Self {
        fs::write(self.root.path().join("gcodes").join(name), content).expect("write gcode");
        self
    }

    fn file(&self, relative: &str, content: &str) -> &Self {
        let path = self.root.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create dirs");
        }
        fs::write(path, content).expect("write file");
        self
    }

    fn path(&self, relative: &str) -> std::path::PathBuf {
        self.root.path().join(relative)
    }

    fn config(&self) -> MarkerConfig {
        let mut config = MarkerConfig::default();
        config.device.transport = "simulation".to_string();
        config.engine.poll_interval_ms = 1;
        config.engine.restart_poll_ms = 1;
        config.gcode.root_dir = self.root.path().to_path_buf();
        config
    }

    /// Interpreter on an initialised, homed machine without loop thread.
    fn interpreter(&self) -> (Interpreter, SimulationHandle) {
        let config = self.config();
        let (transport, handle) = SimulationTransport::with_handle();
        let machine = Machine::new(Box::new(transport), &config);
        machine.initialize().expect("initialize");
        machine.home().expect("home");
        (Interpreter::new(machine, config.gcode), handle)
    }
}

#[test]
fn out_of_bounds_line_stops_the_file() {
    let fx = Fixture::new();
    fx.gcode("bounds.gcode", "G90\nG01 X10 Y20\nG01 X-5 Y0\nG01 X1 Y1\n");
    let (mut interp, handle) = fx.interpreter();

    let err = interp
        .execute_file(&fx.path("gcodes/bounds.gcode"))
        .unwrap_err();
    assert!(err.is_emergency());

    assert_eq!(interp.machine().position(), Position::new(10.0, 20.0));
    assert!(!interp.machine().is_running());
    assert_eq!(interp.status(), Status::Stopped);
    assert_eq!(
        interp.report().message.as_deref(),
        Some("Emergency off triggered by (-5.00,0.00) out of bounds.")
    );
    assert!(handle.halted());
}

#[test]
fn select_and_execute_returns_to_idle() {
    let fx = Fixture::new();
    fx.gcode(
        "part.gcode",
        "G28\n\nG1 X10 Y10\n#A = 5 half of ten\nG91\nG1 X[#A*2] Y#A\r\n",
    );
    let (mut interp, _handle) = fx.interpreter();

    interp.execute_line("M23 part.gcode", ExecMode::Interactive).unwrap();
    assert_eq!(interp.selected_file().as_deref(), Some("part.gcode"));
    interp.execute_line("M24", ExecMode::Interactive).unwrap();

    assert_eq!(interp.status(), Status::Idle);
    assert_eq!(interp.machine().position(), Position::new(20.0, 15.0));
    assert!(!interp.is_absolute());
}

#[test]
fn m32_matches_m23_m24() {
    let fx = Fixture::new();
    fx.gcode("part.gcode", "G90\nG1 X12.345 Y7\nG1 X[12/4] Y[2*(3+1)]\n");

    let (mut first, _) = fx.interpreter();
    first.execute_line("M23 part.gcode", ExecMode::Interactive).unwrap();
    first.execute_line("M24", ExecMode::Interactive).unwrap();

    let (mut second, _) = fx.interpreter();
    second.execute_line("M32 part.gcode", ExecMode::Interactive).unwrap();

    assert_eq!(second.status(), Status::Idle);
    assert_eq!(second.machine().position(), Position::new(3.0, 8.0));
    assert_eq!(first.machine().position(), second.machine().position());
    assert_eq!(
        first.machine().motion_counter().expected(),
        second.machine().motion_counter().expected()
    );
}

#[test]
fn macros_run_relative_to_root() {
    let fx = Fixture::new();
    fx.file("macros/square.g", "G91\nG1 X5\nG1 Y5\nG1 X-5\nG1 Y-5\nG90\n");
    fx.gcode("main.gcode", "G1 X50 Y50\nM98 P/macros/square.g\nG1 X60\n");
    let (mut interp, handle) = fx.interpreter();

    interp.execute_line("M32 main.gcode", ExecMode::Interactive).unwrap();

    assert_eq!(interp.status(), Status::Idle);
    assert_eq!(interp.machine().position(), Position::new(60.0, 0.0));
    interp.machine().engine().pump().unwrap();
    assert_eq!(handle.moves(), 6);
}

#[test]
fn recursive_macro_is_bounded() {
    let fx = Fixture::new();
    fx.file("loop.g", "G91\nG1 X1\nM98 P/loop.g\n");
    let mut config = fx.config();
    config.gcode.max_macro_depth = 4;

    let (transport, _handle) = SimulationTransport::with_handle();
    let machine = Machine::new(Box::new(transport), &config);
    machine.initialize().unwrap();
    machine.home().unwrap();
    let mut interp = Interpreter::new(machine, config.gcode);

    interp.execute_macro("loop.g").unwrap();
    assert_eq!(interp.machine().position(), Position::new(4.0, 0.0));
    assert_eq!(interp.status(), Status::Idle);
    assert!(interp.machine().is_running());
}

#[test]
fn emergency_stop_in_file_aborts_remaining_lines() {
    let fx = Fixture::new();
    fx.gcode("stop.gcode", "G1 X5 Y5\nM112\nG1 X10 Y10\n");
    let (mut interp, _handle) = fx.interpreter();

    let err = interp.execute_line("M32 stop.gcode", ExecMode::Interactive).unwrap_err();
    assert!(err.is_emergency());
    assert_eq!(interp.status(), Status::Stopped);
    assert_eq!(interp.machine().position(), Position::new(5.0, 5.0));

    interp.restart().unwrap();
    assert_eq!(interp.status(), Status::Idle);
    assert_eq!(interp.selected_file(), None);
    assert_eq!(interp.machine().position(), Position::ORIGIN);
}

#[test]
fn non_fatal_errors_are_skipped() {
    let fx = Fixture::new();
    fx.gcode(
        "sloppy.gcode",
        "G4 P200\nG1 X[1+]\nG1 Xabc\nM98 P/missing.g\n#EMPTY\nG1 X3 Y4\n",
    );
    let (mut interp, _handle) = fx.interpreter();

    interp.execute_line("M32 sloppy.gcode", ExecMode::Interactive).unwrap();
    assert_eq!(interp.status(), Status::Idle);
    assert_eq!(interp.machine().position(), Position::new(3.0, 4.0));
}

#[test]
fn missing_file_reports_io_error() {
    let fx = Fixture::new();
    let (mut interp, _handle) = fx.interpreter();

    let err = interp.execute_file(Path::new("/nonexistent/part.gcode")).unwrap_err();
    assert!(matches!(err, InterpreterError::Io { .. }));
    assert_eq!(interp.status(), Status::Idle);
}

#[test]
fn running_loop_completes_file() {
    let fx = Fixture::new();
    fx.gcode("part.gcode", "G90\nG1 X10 Y10\nG1 X20 Y5\nG28\n");
    let config = fx.config();
    let (transport, _handle) = SimulationTransport::with_handle();
    let machine = Machine::start(Box::new(transport), &config).unwrap();
    let mut interp = Interpreter::new(machine, config.gcode.clone());

    interp.execute_line("M32 part.gcode", ExecMode::Interactive).unwrap();
    assert!(interp.machine().wait_idle(Duration::from_secs(5)));

    let report = interp.report();
    assert_eq!(report.status, Status::Idle);
    assert_eq!(report.position, Position::ORIGIN);
    assert_eq!(report.axes_homed, [1, 1, 1]);
    assert_eq!(report.percent_done, 100.0);
    assert_eq!(report.eta_secs, None);
}

#[test]
fn emergency_handle_stops_interpreter() {
    let fx = Fixture::new();
    let (interp, handle) = fx.interpreter();

    interp
        .machine()
        .emergency_handle()
        .trigger("interrupt")
        .unwrap();
    assert_eq!(interp.status(), Status::Stopped);
    assert!(handle.halted());
    assert_eq!(
        interp.report().message.as_deref(),
        Some("Emergency off triggered by interrupt")
    );
}

#[test]
fn file_reports_busy_then_idle() {
    let fx = Fixture::new();
    fx.file("macros/step.g", "G91\nG1 X1\nG90\n");
    fx.gcode("part.gcode", "G1 X10 Y10\nM98 P/macros/step.g\nG1 X20\n");
    let (mut interp, _handle) = fx.interpreter();
    let transitions = interp.subscribe();

    interp.execute_line("M32 part.gcode", ExecMode::Interactive).unwrap();

    // Nested macros do not report their own transitions.
    let seen: Vec<Status> = transitions.try_iter().collect();
    assert_eq!(seen, [Status::Busy, Status::Idle]);
}

#[test]
fn emergency_stop_and_restart_transitions() {
    let fx = Fixture::new();
    let (mut interp, _handle) = fx.interpreter();
    let transitions = interp.subscribe();

    interp.execute_line("M112", ExecMode::Interactive).unwrap();
    interp.execute_line("M999", ExecMode::Interactive).unwrap();

    let seen: Vec<Status> = transitions.try_iter().collect();
    assert_eq!(
        seen,
        [
            Status::EmergencyStopping,
            Status::Stopped,
            Status::Restarting,
            Status::Idle
        ]
    );
}

#[test]
fn restart_inside_a_file_stays_busy() {
    let fx = Fixture::new();
    fx.gcode("reset.gcode", "G1 X5 Y5\nM999\nG1 X7 Y3\n");
    let (mut interp, _handle) = fx.interpreter();
    let transitions = interp.subscribe();

    interp.execute_line("M32 reset.gcode", ExecMode::Interactive).unwrap();

    let seen: Vec<Status> = transitions.try_iter().collect();
    assert_eq!(
        seen,
        [Status::Busy, Status::Restarting, Status::Busy, Status::Idle]
    );
    assert_eq!(interp.machine().position(), Position::new(7.0, 3.0));
}

/// Simulated device that records the monitored status whenever the
/// emergency fragment arrives.
struct StatusRecorder {
    inner: SimulationTransport,
    monitor: Arc<OnceLock<StatusMonitor>>,
    seen: Arc<Mutex<Vec<Status>>>,
}

impl Transport for StatusRecorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if bytes == EMERGENCY_OFF.as_bytes() {
            if let Some(monitor) = self.monitor.get() {
                self.seen.lock().unwrap().push(monitor.status());
            }
        }
        self.inner.write(bytes)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.inner.flush()
    }

    fn read_pending(&mut self, buf: &mut Vec<u8>) -> Result<usize, TransportError> {
        self.inner.read_pending(buf)
    }
}

#[test]
fn monitor_reads_status_while_the_interpreter_is_busy() {
    let fx = Fixture::new();
    let config = fx.config();
    let monitor_slot = Arc::new(OnceLock::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let transport = StatusRecorder {
        inner: SimulationTransport::default(),
        monitor: Arc::clone(&monitor_slot),
        seen: Arc::clone(&seen),
    };

    let machine = Machine::start(Box::new(transport), &config).unwrap();
    let mut interp = Interpreter::new(machine, config.gcode.clone());
    let monitor = interp.monitor();
    assert!(monitor_slot.set(monitor.clone()).is_ok());

    // The restart writes the emergency fragment first, mid-operation.
    interp.execute_line("M999", ExecMode::Interactive).unwrap();
    fx.gcode("stop.gcode", "G1 X5 Y5\nM112\n");
    let _ = interp.execute_line("M32 stop.gcode", ExecMode::Interactive);

    assert_eq!(
        *seen.lock().unwrap(),
        [Status::Restarting, Status::EmergencyStopping]
    );

    let report = std::thread::spawn(move || monitor.report())
        .join()
        .expect("poller thread");
    assert_eq!(report, interp.report());
    assert_eq!(report.status, Status::Stopped);
    assert_eq!(report.position, Position::new(5.0, 5.0));
    assert_eq!(report.selected_file.as_deref(), Some("stop.gcode"));
}

#[test]
fn repeated_words_and_division_follow_gcode_text() {
    let fx = Fixture::new();
    fx.gcode("words.gcode", "#H = [9/2]\nG1 X1 X2 Y#H\n");
    let (mut interp, _handle) = fx.interpreter();

    interp.execute_line("M32 words.gcode", ExecMode::Interactive).unwrap();
    assert_eq!(interp.variables().get("H"), Some("4.5"));
    assert_eq!(interp.machine().position(), Position::new(2.0, 4.5));

    interp.execute_line("#W [4/2]", ExecMode::Interactive).unwrap();
    assert_eq!(interp.variables().get("W"), Some("2.0"));
}
