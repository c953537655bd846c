//! End-to-end session test: parameters file -> sequence -> mock hardware.

use std::sync::Arc;
use std::time::Duration;

use specbench::acquisition::{AcquisitionEngine, SessionState};
use specbench::config::AcquisitionSettings;
use specbench::hardware::mock::{BenchCommand, GrabOutcome, MemorySink, MockBench, MockCamera};
use specbench::scan::{ScanMode, ScanParameters, SequenceBuilder};
use tokio::sync::mpsc;

fn write_params(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let text = serde_json::json!({
        "general_parameters": {
            "acquisition_time": 0.01,
            "frame_count": 2,
            "filename": "sample_a",
            "laser_power": 12.0
        },
        "motion_parameters": {
            "start_position": { "x": 0.0, "y": 0.0, "z": 1.0 },
            "end_position": { "x": 4.0, "y": 2.0, "z": 1.0 },
            "resolution": { "x": 2.0, "y": 1.0, "z": 0.0 }
        },
        "wavelength_parameters": { "start": 780.0, "end": 782.0, "resolution": 2.0 },
        "polarization_parameters": {
            "input_start": 0.0, "input_end": 45.0,
            "output_start": 0.0, "output_end": 0.0,
            "resolution": 45.0
        }
    });
    let path = dir.path().join("params.json");
    std::fs::write(&path, serde_json::to_string_pretty(&text).unwrap()).unwrap();
    path
}

fn settings(status_dir: &std::path::Path) -> AcquisitionSettings {
    AcquisitionSettings {
        frame_timeout: Duration::from_millis(10),
        retry_budget: 1,
        status_dir: status_dir.to_path_buf(),
    }
}

#[tokio::test]
async fn map_scan_runs_end_to_end_on_mocks() {
    let dir = tempfile::tempdir().unwrap();
    let params_path = write_params(&dir);

    let params = ScanParameters::load(&params_path).unwrap();
    let sequence = SequenceBuilder::new(&params, ScanMode::Map).build().unwrap();
    // wavelengths [780], pols [0], ys [0, 1], xs [0, 2]
    assert_eq!(sequence.len(), 4);

    let bench = Arc::new(MockBench::new());
    let camera = Arc::new(MockCamera::new(4, 4));
    let sink = Arc::new(MemorySink::new());
    let (tx, mut rx) = mpsc::channel(16);
    let mut engine =
        AcquisitionEngine::new(bench.clone(), camera.clone(), sink.clone(), &settings(dir.path()))
            .with_progress(tx);

    let outcome = engine.run(&sequence, &params.general).await.unwrap();

    assert_eq!(outcome.state, SessionState::Completed);
    assert_eq!(outcome.steps_attempted, 4);
    assert!(outcome.failed_steps.is_empty());
    assert!(outcome.finished >= outcome.started);

    // One indexed frame per step, in order, tagged with the run id.
    assert_eq!(sink.indexed().len(), 4);
    let indices: Vec<usize> = sink.indexed().iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);

    // Stream opened once for the whole session and closed at the end.
    assert_eq!(camera.open_count(), 1);
    assert_eq!(camera.close_count(), 1);
    assert!(!camera.is_open());

    // 2 frames per step.
    assert_eq!(camera.grab_count(), 8);

    // The first step dispatches everything; later steps only what changed.
    let commands = bench.commands();
    assert_eq!(
        &commands[..3],
        &[
            BenchCommand::MoveTo(specbench::scan::Vec3::new(0.0, 0.0, 1.0)),
            BenchCommand::SetPolarization(0.0),
            BenchCommand::SetWavelength(780.0),
        ]
    );
    // 3 first-step dispatches + 3 pure moves.
    assert_eq!(commands.len(), 6);

    // Progress covered every step and ended at 100%.
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.len(), 4);
    assert!((events.last().unwrap().percent - 100.0).abs() < 1e-9);

    // No failures, so no sidecar file.
    assert!(!dir.path().join("failed_steps.json").exists());
}

#[tokio::test]
async fn failed_steps_land_in_the_status_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let params_path = write_params(&dir);
    let mut params = ScanParameters::load(&params_path).unwrap();
    params.general.frame_count = 1;

    let sequence = SequenceBuilder::new(&params, ScanMode::Map).build().unwrap();
    assert_eq!(sequence.len(), 4);

    let bench = Arc::new(MockBench::new());
    let camera = Arc::new(MockCamera::new(4, 4));
    // Step 2 exhausts its grab budget (1 try + 1 retry); others succeed.
    camera.script([
        GrabOutcome::Frame(1.0),
        GrabOutcome::Frame(2.0),
        GrabOutcome::Timeout,
        GrabOutcome::Timeout,
        GrabOutcome::Frame(4.0),
    ]);
    let sink = Arc::new(MemorySink::new());
    let mut engine =
        AcquisitionEngine::new(bench, camera, sink.clone(), &settings(dir.path()));

    let outcome = engine.run(&sequence, &params.general).await.unwrap();

    assert_eq!(outcome.state, SessionState::Completed);
    assert_eq!(outcome.failed_steps.len(), 1);
    assert_eq!(outcome.failed_steps[0].0, 2);
    assert_eq!(sink.indexed().len(), 3);

    let text = std::fs::read_to_string(dir.path().join("failed_steps.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
    assert_eq!(parsed[0][0], 2);
}

#[tokio::test]
async fn cancelling_mid_session_stops_at_a_step_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let params_path = write_params(&dir);
    let params = ScanParameters::load(&params_path).unwrap();
    let sequence = SequenceBuilder::new(&params, ScanMode::Map).build().unwrap();

    let bench = Arc::new(MockBench::new());
    let mut camera = MockCamera::new(4, 4);
    // Slow grabs keep the step loop yielding so the watcher task gets to run.
    camera.grab_delay = Duration::from_millis(5);
    let camera = Arc::new(camera);
    let sink = Arc::new(MemorySink::new());
    let mut engine =
        AcquisitionEngine::new(bench, camera.clone(), sink.clone(), &settings(dir.path()));

    let handle = engine.cancel_handle();
    let (tx, mut rx) = mpsc::channel(16);
    engine = engine.with_progress(tx);

    // Cancel as soon as the first step completes.
    let watcher = tokio::spawn(async move {
        let _ = rx.recv().await;
        handle.cancel();
        // Drain so the engine's try_send never drops events.
        while rx.recv().await.is_some() {}
    });

    let outcome = engine.run(&sequence, &params.general).await.unwrap();
    watcher.await.unwrap();

    assert_eq!(outcome.state, SessionState::Cancelled);
    assert!(outcome.steps_attempted >= 1);
    assert!(outcome.steps_attempted < sequence.len());
    assert!(!camera.is_open());
}
