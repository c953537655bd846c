//! The acquisition engine: drives a scan sequence through the hardware
//! seams and captures an averaged frame per step.
//!
//! One engine owns one session at a time. The camera gate (a shared
//! `tokio::sync::Mutex`) makes camera access single-flight across engines;
//! a second caller gets `AcquisitionBusy` instead of queueing behind a
//! running scan. The stream is opened once per session and closed on every
//! exit path, including cancellation and abort.
//!
//! Per-step failure policy: a timed-out grab is retried up to the
//! configured budget, and a step whose budget runs out is recorded and
//! skipped, never aborting the session. Hard collaborator errors (driver
//! failure, motion fault) abort the remaining steps; the session still
//! returns a `SessionOutcome` describing what happened.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::progress::{CancelHandle, FailedStepRecord, ProgressEvent, SessionOutcome, SessionState};
use crate::config::AcquisitionSettings;
use crate::error::{BenchError, Result};
use crate::hardware::{BenchActions, Frame, FrameSink, FrameSource, StepMetadata};
use crate::scan::{GeneralParameters, ScanSequence};

pub struct AcquisitionEngine {
    bench: Arc<dyn BenchActions>,
    camera: Arc<dyn FrameSource>,
    sink: Arc<dyn FrameSink>,
    /// Single-flight gate over the capture device, shareable across engines.
    camera_gate: Arc<tokio::sync::Mutex<()>>,
    frame_timeout: Duration,
    retry_budget: u32,
    status_dir: PathBuf,
    state: SessionState,
    progress_tx: Option<mpsc::Sender<ProgressEvent>>,
    cancel: CancelHandle,
}

impl AcquisitionEngine {
    pub fn new(
        bench: Arc<dyn BenchActions>,
        camera: Arc<dyn FrameSource>,
        sink: Arc<dyn FrameSink>,
        settings: &AcquisitionSettings,
    ) -> Self {
        Self {
            bench,
            camera,
            sink,
            camera_gate: Arc::new(tokio::sync::Mutex::new(())),
            frame_timeout: settings.frame_timeout,
            retry_budget: settings.retry_budget,
            status_dir: settings.status_dir.clone(),
            state: SessionState::Idle,
            progress_tx: None,
            cancel: CancelHandle::new(),
        }
    }

    /// Share a camera gate with other engines driving the same device.
    pub fn with_camera_gate(mut self, gate: Arc<tokio::sync::Mutex<()>>) -> Self {
        self.camera_gate = gate;
        self
    }

    /// Attach a progress channel; one event is sent per completed step.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Handle for requesting cooperative cancellation from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Return a terminal engine to `Idle` so it can run again.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == SessionState::Idle {
            return Ok(());
        }
        if !self.state.is_terminal() {
            return Err(BenchError::AcquisitionBusy);
        }
        self.state = SessionState::Idle;
        self.cancel = CancelHandle::new();
        Ok(())
    }

    /// Run one session over `sequence`.
    ///
    /// Returns `Err` only when the engine or the camera gate is busy;
    /// everything that happens after the session starts is reported in the
    /// returned [`SessionOutcome`], whatever the end state.
    pub async fn run(
        &mut self,
        sequence: &ScanSequence,
        general: &GeneralParameters,
    ) -> Result<SessionOutcome> {
        if self.state != SessionState::Idle {
            return Err(BenchError::AcquisitionBusy);
        }
        let _camera_slot = self
            .camera_gate
            .clone()
            .try_lock_owned()
            .map_err(|_| BenchError::AcquisitionBusy)?;

        let run_id = Uuid::new_v4().to_string();
        let started = Utc::now();
        self.state = SessionState::Preparing;
        info!(%run_id, steps = sequence.len(), "acquisition session starting");

        let mut attempted = 0usize;
        let mut failed: Vec<FailedStepRecord> = Vec::new();
        let mut error: Option<String> = None;

        match self.camera.open_stream().await {
            Ok(()) => {
                self.state = SessionState::Running;
                let end = self
                    .step_loop(sequence, general, &run_id, &mut attempted, &mut failed)
                    .await;
                if let Err(close_err) = self.camera.close_stream().await {
                    warn!(error = %close_err, "failed to close capture stream");
                }
                match end {
                    Ok(true) => self.state = SessionState::Cancelled,
                    Ok(false) => self.state = SessionState::Completed,
                    Err(step_err) => {
                        error = Some(step_err.to_string());
                        self.state = SessionState::Aborted;
                    }
                }
            }
            Err(open_err) => {
                error = Some(open_err.to_string());
                self.state = SessionState::Aborted;
            }
        }

        if !failed.is_empty() {
            if let Err(write_err) = self.write_failed_steps(&failed) {
                warn!(error = %write_err, "could not write failed-step sidecar");
            }
        }

        let outcome = SessionOutcome {
            run_id,
            state: self.state,
            started,
            finished: Utc::now(),
            steps_attempted: attempted,
            failed_steps: failed,
            error,
        };
        info!(
            state = %outcome.state,
            attempted = outcome.steps_attempted,
            failed = outcome.failed_steps.len(),
            "acquisition session finished"
        );
        Ok(outcome)
    }

    /// Drive the sequence; `Ok(true)` means the session was cancelled at a
    /// step boundary.
    async fn step_loop(
        &self,
        sequence: &ScanSequence,
        general: &GeneralParameters,
        run_id: &str,
        attempted: &mut usize,
        failed: &mut Vec<FailedStepRecord>,
    ) -> Result<bool> {
        let total = sequence.len();
        for (index, step) in sequence.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(step = index, "cancellation requested, winding down");
                return Ok(true);
            }
            *attempted += 1;

            if let Some(position) = step.position {
                self.bench.move_to(position).await?;
            }
            if let Some(angle) = step.polarization {
                self.bench.set_polarization(angle).await?;
            }
            if let Some(target) = step.wavelength {
                self.bench.set_wavelength(target).await?;
            }

            match self.acquire_average(general.frame_count).await? {
                Some(frame) => {
                    self.sink.persist_transient(&frame).await?;
                    let metadata = StepMetadata {
                        run_id: run_id.to_string(),
                        step_index: index,
                        step: step.clone(),
                        filename: general.filename.clone(),
                    };
                    self.sink.persist_indexed(&frame, &metadata).await?;
                }
                None => {
                    warn!(step = index, "frame budget exhausted, step recorded as failed");
                    failed.push(FailedStepRecord(index, step.clone()));
                }
            }

            self.emit_progress(index, total);
        }
        Ok(false)
    }

    /// Capture `frames` frames and fold them into the incremental average
    /// `avg = (avg + frame) / 2`, which weights recent frames more heavily.
    /// `Ok(None)` means some grab exhausted its retry budget.
    async fn acquire_average(&self, frames: u32) -> Result<Option<Frame>> {
        let mut average: Option<Frame> = None;
        for _ in 0..frames {
            let Some(frame) = self.grab_with_retry().await? else {
                return Ok(None);
            };
            average = Some(match average {
                None => frame,
                Some(mut acc) => {
                    if acc.pixels.len() != frame.pixels.len() {
                        return Err(BenchError::FrameShape(format!(
                            "frame size changed mid-step: {} -> {}",
                            acc.pixels.len(),
                            frame.pixels.len()
                        )));
                    }
                    for (a, p) in acc.pixels.iter_mut().zip(&frame.pixels) {
                        *a = (*a + p) / 2.0;
                    }
                    acc
                }
            });
        }
        Ok(average)
    }

    async fn grab_with_retry(&self) -> Result<Option<Frame>> {
        let attempts = 1 + self.retry_budget;
        for attempt in 1..=attempts {
            match self.camera.grab_frame(self.frame_timeout).await? {
                Some(frame) => return Ok(Some(frame)),
                None => {
                    debug!(attempt, attempts, "frame grab timed out");
                }
            }
        }
        Ok(None)
    }

    fn emit_progress(&self, index: usize, total: usize) {
        let Some(tx) = &self.progress_tx else {
            return;
        };
        let event = ProgressEvent::new(index, total, format!("step {} of {total} done", index + 1));
        if tx.try_send(event).is_err() {
            debug!(step = index, "progress receiver lagging, event dropped");
        }
    }

    fn write_failed_steps(&self, failed: &[FailedStepRecord]) -> Result<()> {
        std::fs::create_dir_all(&self.status_dir)?;
        let path = self.status_dir.join("failed_steps.json");
        let text = serde_json::to_string_pretty(failed)?;
        std::fs::write(&path, text)?;
        info!(path = %path.display(), count = failed.len(), "failed-step sidecar written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{BenchCommand, GrabOutcome, MemorySink, MockBench, MockCamera};
    use crate::scan::{ScanStep, Vec3};

    fn general() -> GeneralParameters {
        GeneralParameters {
            acquisition_time: 0.01,
            frame_count: 1,
            filename: "run".to_string(),
            laser_power: 10.0,
        }
    }

    fn settings(status_dir: &std::path::Path) -> AcquisitionSettings {
        AcquisitionSettings {
            frame_timeout: Duration::from_millis(10),
            retry_budget: 1,
            status_dir: status_dir.to_path_buf(),
        }
    }

    fn step(x: f64) -> ScanStep {
        ScanStep {
            position: Some(Vec3::new(x, 0.0, 0.0)),
            polarization: None,
            wavelength: None,
        }
    }

    struct Rig {
        engine: AcquisitionEngine,
        bench: Arc<MockBench>,
        camera: Arc<MockCamera>,
        sink: Arc<MemorySink>,
        _status: tempfile::TempDir,
    }

    fn rig() -> Rig {
        let bench = Arc::new(MockBench::new());
        let camera = Arc::new(MockCamera::new(2, 2));
        let sink = Arc::new(MemorySink::new());
        let status = tempfile::tempdir().unwrap();
        let engine = AcquisitionEngine::new(
            bench.clone(),
            camera.clone(),
            sink.clone(),
            &settings(status.path()),
        );
        Rig {
            engine,
            bench,
            camera,
            sink,
            _status: status,
        }
    }

    #[tokio::test]
    async fn frames_fold_into_incremental_average() {
        let mut rig = rig();
        rig.camera.script([
            GrabOutcome::Frame(10.0),
            GrabOutcome::Frame(20.0),
            GrabOutcome::Frame(30.0),
        ]);
        let mut params = general();
        params.frame_count = 3;

        let outcome = rig.engine.run(&vec![step(1.0)], &params).await.unwrap();
        assert_eq!(outcome.state, SessionState::Completed);

        // ((10 + 20) / 2 + 30) / 2
        let indexed = rig.sink.indexed();
        assert_eq!(indexed.len(), 1);
        assert_eq!(indexed[0].1.pixels, vec![22.5; 4]);
    }

    #[tokio::test]
    async fn exhausted_step_is_recorded_and_session_completes() {
        let mut rig = rig();
        // Step 0 succeeds; step 1 times out through its whole budget (1 + 1).
        rig.camera.script([
            GrabOutcome::Frame(5.0),
            GrabOutcome::Timeout,
            GrabOutcome::Timeout,
        ]);
        let sequence = vec![step(0.0), step(1.0)];

        let outcome = rig.engine.run(&sequence, &general()).await.unwrap();
        assert_eq!(outcome.state, SessionState::Completed);
        assert_eq!(outcome.steps_attempted, 2);
        assert_eq!(outcome.failed_steps, vec![FailedStepRecord(1, step(1.0))]);
        assert_eq!(rig.sink.indexed().len(), 1);

        // Sidecar file records the same pair.
        let path = rig._status.path().join("failed_steps.json");
        let text = std::fs::read_to_string(path).unwrap();
        let parsed: Vec<FailedStepRecord> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, outcome.failed_steps);
    }

    #[tokio::test]
    async fn timed_out_grab_is_retried_within_the_step() {
        let mut rig = rig();
        rig.camera
            .script([GrabOutcome::Timeout, GrabOutcome::Frame(3.0)]);

        let outcome = rig.engine.run(&vec![step(0.0)], &general()).await.unwrap();
        assert_eq!(outcome.state, SessionState::Completed);
        assert!(outcome.failed_steps.is_empty());
        assert_eq!(rig.camera.grab_count(), 2);
    }

    #[tokio::test]
    async fn cancellation_winds_down_and_closes_the_stream() {
        let mut rig = rig();
        let handle = rig.engine.cancel_handle();
        handle.cancel();

        let sequence = vec![step(0.0), step(1.0)];
        let outcome = rig.engine.run(&sequence, &general()).await.unwrap();
        assert_eq!(outcome.state, SessionState::Cancelled);
        assert_eq!(outcome.steps_attempted, 0);
        assert!(!rig.camera.is_open());
        assert_eq!(rig.camera.close_count(), 1);
        assert!(rig.bench.commands().is_empty());
    }

    #[tokio::test]
    async fn hard_failure_aborts_but_still_reports() {
        let mut rig = rig();
        rig.camera
            .script([GrabOutcome::Fail("driver fault".to_string())]);

        let outcome = rig.engine.run(&vec![step(0.0)], &general()).await.unwrap();
        assert_eq!(outcome.state, SessionState::Aborted);
        assert!(outcome.error.as_deref().unwrap().contains("driver fault"));
        assert!(!rig.camera.is_open());
    }

    #[tokio::test]
    async fn suppressed_fields_dispatch_nothing() {
        let mut rig = rig();
        let sequence = vec![
            ScanStep {
                position: Some(Vec3::new(1.0, 0.0, 0.0)),
                polarization: Some(45.0),
                wavelength: None,
            },
            ScanStep {
                position: None,
                polarization: None,
                wavelength: Some(800.0),
            },
        ];

        rig.engine.run(&sequence, &general()).await.unwrap();
        assert_eq!(
            rig.bench.commands(),
            vec![
                BenchCommand::MoveTo(Vec3::new(1.0, 0.0, 0.0)),
                BenchCommand::SetPolarization(45.0),
                BenchCommand::SetWavelength(800.0),
            ]
        );
    }

    #[tokio::test]
    async fn terminal_engine_needs_a_reset_to_run_again() {
        let mut rig = rig();
        rig.engine.run(&vec![step(0.0)], &general()).await.unwrap();
        assert!(matches!(
            rig.engine.run(&vec![step(0.0)], &general()).await,
            Err(BenchError::AcquisitionBusy)
        ));

        rig.engine.reset().unwrap();
        let outcome = rig.engine.run(&vec![step(0.0)], &general()).await.unwrap();
        assert_eq!(outcome.state, SessionState::Completed);
    }

    #[tokio::test]
    async fn camera_gate_is_single_flight() {
        let gate = Arc::new(tokio::sync::Mutex::new(()));
        let _held = gate.clone().try_lock_owned().unwrap();

        let mut rig = rig();
        rig.engine = AcquisitionEngine::new(
            rig.bench.clone(),
            rig.camera.clone(),
            rig.sink.clone(),
            &settings(rig._status.path()),
        )
        .with_camera_gate(gate);

        assert!(matches!(
            rig.engine.run(&vec![step(0.0)], &general()).await,
            Err(BenchError::AcquisitionBusy)
        ));
        assert_eq!(rig.camera.open_count(), 0);
    }

    #[tokio::test]
    async fn progress_event_per_completed_step() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut rig = rig();
        rig.engine = AcquisitionEngine::new(
            rig.bench.clone(),
            rig.camera.clone(),
            rig.sink.clone(),
            &settings(rig._status.path()),
        )
        .with_progress(tx);

        let sequence = vec![step(0.0), step(1.0)];
        rig.engine.run(&sequence, &general()).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.step_index, 0);
        assert!((first.percent - 50.0).abs() < 1e-9);
        let second = rx.recv().await.unwrap();
        assert!((second.percent - 100.0).abs() < 1e-9);
    }
}
