//! specbench: scan controller for a multi-axis stepper-motor optical bench.
//!
//! The crate drives spectroscopy scans end to end: calibration models map
//! physical units (wavelengths, polarization angles) to motor steps, the
//! motion layer speaks the controller rack's ASCII envelope protocol with
//! backlash compensation and homing, the scan planner turns a parameter
//! file into a delta-suppressed step sequence, and the acquisition engine
//! walks that sequence capturing an averaged frame per step with retry,
//! cancellation and progress reporting.
//!
//! Module map:
//!
//! - [`config`]: TOML settings (axes, action groups, timeouts)
//! - [`error`]: crate-wide error enum and `Result` alias
//! - [`logging`]: tracing subscriber setup
//! - [`calibration`]: model evaluation, coefficient store, autocal overrides
//! - [`protocol`]: envelope framing, chunking, response parsing
//! - [`motion`]: the motion controller over a [`hardware::ControllerLink`]
//! - [`scan`]: parameter schema and sequence generation
//! - [`acquisition`]: the session engine, progress and cancellation
//! - [`hardware`]: collaborator traits, serial link, mock hardware

pub mod acquisition;
pub mod calibration;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod motion;
pub mod protocol;
pub mod scan;

pub use error::{BenchError, Result};
