//! Unit/step calibration layer.
//!
//! Converts between physical units (wavelength in nm, angles in degrees)
//! and raw motor step counts, one independently fitted model per axis and
//! direction. Fitting happens offline; this layer only consumes the
//! published coefficients.

pub mod model;
pub mod service;

pub use model::{CalibrationModel, FitMetrics, ModelFamily};
pub use service::{CalibratedFn, CalibrationService};

/// Convert a wavelength in nm to a wavenumber in cm^-1.
pub fn wavenumber(nm: f64) -> f64 {
    1.0e7 / nm
}

/// Raman shift in cm^-1 of `detector_nm` relative to the excitation line.
pub fn raman_shift(laser_nm: f64, detector_nm: f64) -> f64 {
    wavenumber(laser_nm) - wavenumber(detector_nm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wavenumber_of_1000nm() {
        assert!((wavenumber(1000.0) - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn raman_shift_is_positive_for_stokes() {
        // 532 nm excitation, 580 nm detection
        let shift = raman_shift(532.0, 580.0);
        assert!(shift > 1500.0 && shift < 1600.0);
    }
}
