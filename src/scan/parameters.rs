//! Scan parameter schema.
//!
//! Parameters arrive as a JSON file grouped exactly the way the operator
//! tooling writes them: `general_parameters`, `motion_parameters`,
//! `wavelength_parameters`, `polarization_parameters`. Once a scan starts
//! the loaded struct is treated as an immutable snapshot.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{BenchError, Result};

/// Sample-space position in stage units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance in the XY plane; Z is held by the scan modes.
    pub fn xy_distance(&self, other: &Vec3) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralParameters {
    /// Per-frame acquisition time in seconds.
    pub acquisition_time: f64,
    /// Frames captured and averaged per scan step.
    pub frame_count: u32,
    /// Base filename for persisted frames.
    pub filename: String,
    /// Requested laser power in mW.
    pub laser_power: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionParameters {
    pub start_position: Vec3,
    pub end_position: Vec3,
    /// Per-axis step resolution in stage units.
    pub resolution: Vec3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WavelengthParameters {
    pub start: f64,
    pub end: f64,
    pub resolution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolarizationParameters {
    pub input_start: f64,
    pub input_end: f64,
    pub output_start: f64,
    pub output_end: f64,
    pub resolution: f64,
}

/// Immutable snapshot of everything a scan needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanParameters {
    #[serde(rename = "general_parameters")]
    pub general: GeneralParameters,
    #[serde(rename = "motion_parameters")]
    pub motion: MotionParameters,
    #[serde(rename = "wavelength_parameters")]
    pub wavelength: WavelengthParameters,
    #[serde(rename = "polarization_parameters")]
    pub polarization: PolarizationParameters,
}

impl ScanParameters {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let params: ScanParameters = serde_json::from_str(&text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.frame_count == 0 {
            return Err(BenchError::InvalidParameters(
                "frame_count must be at least 1".into(),
            ));
        }
        if self.general.acquisition_time <= 0.0 {
            return Err(BenchError::InvalidParameters(
                "acquisition_time must be positive".into(),
            ));
        }
        if self.general.filename.is_empty() {
            return Err(BenchError::InvalidParameters("filename is empty".into()));
        }
        for (name, value) in [
            ("x resolution", self.motion.resolution.x),
            ("y resolution", self.motion.resolution.y),
            ("z resolution", self.motion.resolution.z),
            ("wavelength resolution", self.wavelength.resolution),
            ("polarization resolution", self.polarization.resolution),
        ] {
            if value < 0.0 {
                return Err(BenchError::InvalidParameters(format!(
                    "{name} must not be negative"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_parameters() -> ScanParameters {
    ScanParameters {
        general: GeneralParameters {
            acquisition_time: 0.1,
            frame_count: 2,
            filename: "sample".into(),
            laser_power: 5.0,
        },
        motion: MotionParameters {
            start_position: Vec3::new(0.0, 0.0, 1.5),
            end_position: Vec3::new(4.0, 2.0, 1.5),
            resolution: Vec3::new(2.0, 1.0, 0.0),
        },
        wavelength: WavelengthParameters {
            start: 780.0,
            end: 784.0,
            resolution: 2.0,
        },
        polarization: PolarizationParameters {
            input_start: 0.0,
            input_end: 90.0,
            output_start: 0.0,
            output_end: 0.0,
            resolution: 45.0,
        },
    }
}
