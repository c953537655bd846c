//! CLI entry point for specbench.
//!
//! Subcommands:
//! - `estimate`: step count and duration estimate for a parameters file
//! - `plan`: build the full sequence and print its shape
//! - `run --mock`: execute a complete session against mock hardware

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use specbench::acquisition::AcquisitionEngine;
use specbench::calibration::raman_shift;
use specbench::config::Settings;
use specbench::hardware::mock::{MemorySink, MockBench, MockCamera};
use specbench::scan::{self, ScanMode, ScanParameters, SequenceBuilder};

#[derive(Parser)]
#[command(name = "specbench")]
#[command(about = "Scan controller for a multi-axis optical bench", long_about = None)]
struct Cli {
    /// Config file (defaults to config/default.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the step count and duration estimate for a scan.
    Estimate {
        /// Scan parameters file (JSON).
        params: PathBuf,

        /// Scan mode: map or linescan.
        #[arg(long, default_value = "map")]
        mode: String,
    },

    /// Build the scan sequence and print its shape.
    Plan {
        params: PathBuf,

        #[arg(long, default_value = "map")]
        mode: String,
    },

    /// Run a full acquisition session.
    Run {
        params: PathBuf,

        #[arg(long, default_value = "map")]
        mode: String,

        /// Use mock hardware instead of the serial controller.
        #[arg(long)]
        mock: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::new(None)?,
    };
    specbench::logging::init(&settings.log_level)?;

    match cli.command {
        Commands::Estimate { params, mode } => estimate(&params, &mode),
        Commands::Plan { params, mode } => plan(&params, &mode),
        Commands::Run { params, mode, mock } => run(&settings, &params, &mode, mock).await,
    }
}

fn load(params_path: &Path, mode: &str) -> Result<(ScanParameters, ScanMode)> {
    let params = ScanParameters::load(params_path)
        .with_context(|| format!("loading scan parameters from {}", params_path.display()))?;
    let mode: ScanMode = mode.parse()?;
    Ok((params, mode))
}

fn estimate(params_path: &Path, mode: &str) -> Result<()> {
    let (params, mode) = load(params_path, mode)?;
    let estimate = scan::estimate(&params, mode);
    println!(
        "{mode} scan: {} steps, about {:.0} s",
        estimate.steps, estimate.seconds
    );
    let wl = &params.wavelength;
    if wl.start != wl.end {
        println!(
            "wavelength sweep {:.1}-{:.1} nm ({:.0} cm^-1)",
            wl.start,
            wl.end,
            raman_shift(wl.start, wl.end).abs()
        );
    }
    Ok(())
}

fn plan(params_path: &Path, mode: &str) -> Result<()> {
    let (params, mode) = load(params_path, mode)?;
    let sequence = SequenceBuilder::new(&params, mode).build()?;
    println!("{mode} scan: {} steps", sequence.len());
    if let (Some(first), Some(last)) = (sequence.first(), sequence.last()) {
        println!("first: {}", serde_json::to_string(first)?);
        println!("last:  {}", serde_json::to_string(last)?);
    }
    Ok(())
}

async fn run(settings: &Settings, params_path: &Path, mode: &str, mock: bool) -> Result<()> {
    if !mock {
        anyhow::bail!(
            "only --mock runs are wired into the CLI; deployments drive the \
             library through their own hardware adapters"
        );
    }

    let (params, mode) = load(params_path, mode)?;
    let sequence = SequenceBuilder::new(&params, mode).build()?;
    info!(steps = sequence.len(), %mode, "starting mock session");

    let bench = Arc::new(MockBench::new());
    let camera = Arc::new(MockCamera::new(64, 64));
    let sink = Arc::new(MemorySink::new());
    let mut engine = AcquisitionEngine::new(bench, camera, sink, &settings.acquisition);

    let outcome = engine.run(&sequence, &params.general).await?;
    println!(
        "session {} finished: {} ({} steps attempted, {} failed)",
        outcome.run_id,
        outcome.state,
        outcome.steps_attempted,
        outcome.failed_steps.len()
    );
    Ok(())
}
