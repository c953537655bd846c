//! Acquisition sessions: the engine, progress reporting, cancellation.

pub mod engine;
pub mod progress;

pub use engine::AcquisitionEngine;
pub use progress::{
    CancelHandle, FailedStepRecord, ProgressEvent, SessionOutcome, SessionState,
};
