//! Scan sequence generation.
//!
//! A scan is an ordered, finite list of [`ScanStep`]s built once per run.
//! Steps use delta-suppression encoding: a field is `None` iff it equals
//! the corresponding field in the previous step (the first step compares
//! against the session-start baseline), so the acquisition engine only
//! dispatches hardware actions for fields that actually changed.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::parameters::{ScanParameters, Vec3};
use crate::error::{BenchError, Result};

/// One step of a scan. `None` means "unchanged since the previous step".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanStep {
    pub position: Option<Vec3>,
    pub polarization: Option<f64>,
    pub wavelength: Option<f64>,
}

/// Ordered, non-restartable step list for one run.
pub type ScanSequence = Vec<ScanStep>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Raster: wavelength (outermost), polarization, Y, X (innermost).
    Map,
    /// Straight XY line, evenly interpolated; wavelength and polarization
    /// held constant.
    LineScan,
}

impl FromStr for ScanMode {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "map" => Ok(ScanMode::Map),
            "linescan" | "line_scan" => Ok(ScanMode::LineScan),
            other => Err(BenchError::InvalidScanMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Map => write!(f, "map"),
            ScanMode::LineScan => write!(f, "linescan"),
        }
    }
}

/// Hardware state at session start, used to suppress the first step's
/// already-satisfied fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanBaseline {
    pub position: Vec3,
    pub polarization: f64,
    pub wavelength: f64,
}

/// Half-open sample points `[start, end)` stepped by `step`.
///
/// Degenerate requests (`step <= 0` or `start == end`) collapse to
/// `[start]`; a reversed range (`end < start`) is empty. The end value is
/// never included; a scan that must reach the end point asks for it
/// explicitly by extending `end`.
pub fn generate_array(start: f64, end: f64, step: f64) -> Vec<f64> {
    if step <= 0.0 || start == end {
        return vec![start];
    }
    let mut values = Vec::new();
    let mut i = 0u64;
    loop {
        let value = start + i as f64 * step;
        if value >= end {
            break;
        }
        values.push(value);
        i += 1;
    }
    values
}

/// Builds the step sequence for one scan run.
pub struct SequenceBuilder<'a> {
    params: &'a ScanParameters,
    mode: ScanMode,
    baseline: Option<ScanBaseline>,
}

impl<'a> SequenceBuilder<'a> {
    pub fn new(params: &'a ScanParameters, mode: ScanMode) -> Self {
        Self {
            params,
            mode,
            baseline: None,
        }
    }

    /// Supply the session-start hardware state; first-step fields equal to
    /// it are suppressed.
    pub fn with_baseline(mut self, baseline: ScanBaseline) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn build(&self) -> Result<ScanSequence> {
        self.params.validate()?;
        let targets = match self.mode {
            ScanMode::Map => self.map_targets(),
            ScanMode::LineScan => self.linescan_targets(),
        };
        Ok(self.suppress(targets))
    }

    /// Raw per-step targets before delta suppression.
    fn map_targets(&self) -> Vec<(Vec3, f64, f64)> {
        let motion = &self.params.motion;
        let z = self
            .baseline
            .map_or(motion.start_position.z, |b| b.position.z);

        let wavelengths = generate_array(
            self.params.wavelength.start,
            self.params.wavelength.end,
            self.params.wavelength.resolution,
        );
        let polarizations = generate_array(
            self.params.polarization.input_start,
            self.params.polarization.input_end,
            self.params.polarization.resolution,
        );
        let ys = generate_array(
            motion.start_position.y,
            motion.end_position.y,
            motion.resolution.y,
        );
        let xs = generate_array(
            motion.start_position.x,
            motion.end_position.x,
            motion.resolution.x,
        );

        let mut targets = Vec::with_capacity(
            wavelengths.len() * polarizations.len() * ys.len() * xs.len(),
        );
        for &wl in &wavelengths {
            for &pol in &polarizations {
                for &y in &ys {
                    for &x in &xs {
                        targets.push((Vec3::new(x, y, z), pol, wl));
                    }
                }
            }
        }
        targets
    }

    fn linescan_targets(&self) -> Vec<(Vec3, f64, f64)> {
        let motion = &self.params.motion;
        let start = motion.start_position;
        let end = motion.end_position;
        let z = self.baseline.map_or(start.z, |b| b.position.z);

        let length = start.xy_distance(&end);
        let points = if motion.resolution.x > 0.0 {
            ((length / motion.resolution.x).floor() as usize).max(1)
        } else {
            1
        };

        let pol = self.params.polarization.input_start;
        let wl = self.params.wavelength.start;

        (0..points)
            .map(|i| {
                let t = if points == 1 {
                    0.0
                } else {
                    i as f64 / (points - 1) as f64
                };
                let x = start.x + t * (end.x - start.x);
                let y = start.y + t * (end.y - start.y);
                (Vec3::new(x, y, z), pol, wl)
            })
            .collect()
    }

    fn suppress(&self, targets: Vec<(Vec3, f64, f64)>) -> ScanSequence {
        let mut steps = Vec::with_capacity(targets.len());
        let mut prev = self
            .baseline
            .map(|b| (b.position, b.polarization, b.wavelength));

        for (position, polarization, wavelength) in targets {
            let step = match prev {
                None => ScanStep {
                    position: Some(position),
                    polarization: Some(polarization),
                    wavelength: Some(wavelength),
                },
                Some((p_pos, p_pol, p_wl)) => ScanStep {
                    position: (position != p_pos).then_some(position),
                    polarization: (polarization != p_pol).then_some(polarization),
                    wavelength: (wavelength != p_wl).then_some(wavelength),
                },
            };
            prev = Some((position, polarization, wavelength));
            steps.push(step);
        }
        steps
    }
}

/// Cheap size and duration estimate for UI feedback, computed without
/// materializing the sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanEstimate {
    pub steps: usize,
    /// Estimated duration in seconds, including a 20% margin.
    pub seconds: f64,
}

pub fn estimate(params: &ScanParameters, mode: ScanMode) -> ScanEstimate {
    let steps = match mode {
        ScanMode::Map => {
            axis_points(
                params.wavelength.start,
                params.wavelength.end,
                params.wavelength.resolution,
            ) * axis_points(
                params.polarization.input_start,
                params.polarization.input_end,
                params.polarization.resolution,
            ) * axis_points(
                params.motion.start_position.y,
                params.motion.end_position.y,
                params.motion.resolution.y,
            ) * axis_points(
                params.motion.start_position.x,
                params.motion.end_position.x,
                params.motion.resolution.x,
            )
        }
        ScanMode::LineScan => {
            let length = params
                .motion
                .start_position
                .xy_distance(&params.motion.end_position);
            if params.motion.resolution.x > 0.0 {
                ((length / params.motion.resolution.x).floor() as usize).max(1)
            } else {
                1
            }
        }
    };
    let seconds = steps as f64
        * params.general.frame_count as f64
        * params.general.acquisition_time
        * 1.2;
    ScanEstimate { steps, seconds }
}

/// Point count [`generate_array`] would produce for the same axis: 1 for
/// degenerate requests, 0 for a reversed range (empty sweep).
fn axis_points(start: f64, end: f64, step: f64) -> usize {
    if step <= 0.0 || start == end {
        1
    } else if end < start {
        0
    } else {
        (((end - start) / step).ceil() as usize).max(1)
    }
}
