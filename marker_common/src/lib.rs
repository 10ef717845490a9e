//! Marker Common Library
//!
//! Shared constants, data types, configuration loading and the transport
//! interface used by every crate of the marker workspace.
//!
//! # Module Structure
//!
//! - [`config`] - TOML configuration loading (`ConfigLoader`, `MarkerConfig`)
//! - [`consts`] - Machine limits and protocol timing defaults
//! - [`types`] - Position, homed axes, status codes and snapshots
//! - [`transport`] - Byte transport trait implemented by serial/simulated devices
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use marker_common::prelude::*;
//!
//! let pos = Position::new(10.0, 20.0);
//! assert!(pos.within(&MachineLimits::default()));
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
pub mod transport;
pub mod types;
