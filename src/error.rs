//! Custom error types for the application.
//!
//! This module defines the primary error type, `BenchError`, used across the
//! crate. It consolidates every failure class the bench can produce, from
//! controller communication problems to calibration lookups, so that callers
//! can match on the variant that matters to them and propagate the rest
//! with `?`.
//!
//! A few failure classes are deliberately *not* errors:
//!
//! - A position readback mismatch after a move is reported by
//!   `MotionController::confirm_motor_positions` as a boolean, with the
//!   expected/actual values logged. The caller decides whether to retry.
//! - A frame capture that exhausts its retry budget is recorded as a
//!   `FailedStepRecord` by the acquisition engine and the scan continues.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serial timeout or transport failure talking to the motor controller.
    /// Fatal to the in-flight operation; never retried automatically.
    #[error("Controller communication failed: {0}")]
    ControllerCommunication(String),

    /// The controller answered, but the response does not parse. A garbled
    /// or empty running-state poll lands here rather than being treated as
    /// "not running".
    #[error("Malformed controller response: {0}")]
    ControllerProtocol(String),

    /// A motor label that does not resolve to a controller id. Raised
    /// before any hardware command is sent.
    #[error("Unknown motor axis '{0}'")]
    UnknownAxis(String),

    #[error("Unknown action group '{0}'")]
    UnknownGroup(String),

    /// No calibration model is registered for an axis in a requested group.
    #[error("No calibration model registered for '{0}'")]
    MissingCalibration(String),

    #[error("Calibration file error: {0}")]
    Calibration(String),

    /// The running-state poll did not report all axes settled in time.
    #[error("Motors did not settle within {0:?}")]
    MotionTimeout(Duration),

    #[error("Unrecognized scan mode '{0}'")]
    InvalidScanMode(String),

    #[error("Invalid scan parameters: {0}")]
    InvalidParameters(String),

    /// Another acquisition session currently owns the capture device, or
    /// the engine was started from a non-idle state.
    #[error("Acquisition already in progress")]
    AcquisitionBusy,

    /// Capture device failure outside the per-step retry path (stream
    /// open/close, hard driver errors).
    #[error("Capture device error: {0}")]
    Capture(String),

    #[error("Frame shape mismatch: {0}")]
    FrameShape(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_axis_names_the_label() {
        let err = BenchError::UnknownAxis("q9".into());
        assert_eq!(err.to_string(), "Unknown motor axis 'q9'");
    }

    #[test]
    fn motion_timeout_reports_the_bound() {
        let err = BenchError::MotionTimeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn io_errors_convert_via_from() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "port");
        let err: BenchError = io.into();
        assert!(matches!(err, BenchError::Io(_)));
    }
}
