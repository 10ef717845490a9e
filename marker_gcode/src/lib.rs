//! # Marker G-code Library
//!
//! Interprets G-code files and commands for the Borries marker.
//!
//! # Module Structure
//!
//! - [`command`] - Line tokenising and the supported command codes
//! - [`expr`] - Arithmetic evaluator for bracketed parameters
//! - [`variables`] - `#name` variable table and parameter resolution
//! - [`interpreter`] - Dispatch, file/macro execution, status reporting and monitors
//! - [`error`] - `InterpreterError`
//!
//! # Usage
//!
//! ```rust,no_run
//! use marker_common::config::MarkerConfig;
//! use marker_gcode::Interpreter;
//! use marker_hal::{ExecMode, Machine, TransportRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MarkerConfig::default();
//! let transport = TransportRegistry::with_builtin().open(&config.device)?;
//! let machine = Machine::start(transport, &config)?;
//!
//! let mut interp = Interpreter::new(machine, config.gcode.clone());
//! interp.execute_line("G01 X10 Y20", ExecMode::Interactive)?;
//! println!("{}", interp.status());
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod error;
pub mod expr;
pub mod interpreter;
pub mod variables;

pub use crate::error::InterpreterError;
pub use crate::interpreter::{Interpreter, StatusMonitor, StatusReport, Unit};
