//! Session bookkeeping: progress events, terminal states, cancellation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::scan::ScanStep;

/// Emitted on the progress channel after every completed step.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub step_index: usize,
    pub total_steps: usize,
    pub percent: f64,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(step_index: usize, total_steps: usize, message: impl Into<String>) -> Self {
        let percent = if total_steps == 0 {
            100.0
        } else {
            100.0 * (step_index + 1) as f64 / total_steps as f64
        };
        Self {
            step_index,
            total_steps,
            percent,
            message: message.into(),
        }
    }
}

/// Lifecycle of one acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Preparing,
    Running,
    Cancelled,
    Completed,
    Aborted,
}

impl SessionState {
    /// Terminal states allow a `reset` back to `Idle`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Cancelled | SessionState::Completed | SessionState::Aborted
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Preparing => "preparing",
            SessionState::Running => "running",
            SessionState::Cancelled => "cancelled",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// A step the engine gave up on after exhausting its retry budget,
/// serialized as `[index, step]` so the sidecar file stays compact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedStepRecord(pub usize, pub ScanStep);

/// Summary returned by every finished session, whatever its end state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub run_id: String,
    pub state: SessionState,
    pub started: chrono::DateTime<chrono::Utc>,
    pub finished: chrono::DateTime<chrono::Utc>,
    pub steps_attempted: usize,
    pub failed_steps: Vec<FailedStepRecord>,
    pub error: Option<String>,
}

/// Cloneable handle that requests cooperative cancellation.
///
/// The engine checks it at step boundaries only; a step in flight runs to
/// completion before the session winds down.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
