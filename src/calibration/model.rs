//! Calibration models for one bench axis.
//!
//! Each model is a pure bidirectional-capable function between a physical
//! unit (wavelength, angle) and raw motor steps. Forward and inverse
//! directions for an axis are fitted independently offline; only the
//! consumption side lives here. The family is carried explicitly in the
//! variant tag rather than being inferred from coefficient count, so a
//! degree-6 polynomial and a linear-plus-sinusoid (both 7 numbers in the
//! legacy flat-array encoding) stay distinguishable.

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

/// Model family tag used by the persisted calibration schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Polynomial,
    LinearSinusoidal,
    PolynomialSinusoidal,
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelFamily::Polynomial => "polynomial",
            ModelFamily::LinearSinusoidal => "linear_sinusoidal",
            ModelFamily::PolynomialSinusoidal => "polynomial_sinusoidal",
        };
        write!(f, "{name}")
    }
}

/// A fitted unit/steps conversion for one axis and one direction.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationModel {
    /// Plain polynomial, coefficients highest degree first.
    Polynomial { coeffs: Vec<f64> },
    /// `a1*x + a0 + amp*sin(freq*x + phase) + offset`
    LinearSinusoidal {
        a1: f64,
        a0: f64,
        amp: f64,
        freq: f64,
        phase: f64,
        offset: f64,
    },
    /// `a2*x^2 + a1*x + a0 + amp*sin(freq*x + phase) + offset`
    PolynomialSinusoidal {
        a2: f64,
        a1: f64,
        a0: f64,
        amp: f64,
        freq: f64,
        phase: f64,
        offset: f64,
    },
}

impl CalibrationModel {
    /// Build a model from an explicit family tag and its coefficient list.
    pub fn from_tagged(family: ModelFamily, coeffs: &[f64]) -> Result<Self> {
        match family {
            ModelFamily::Polynomial => {
                if coeffs.is_empty() {
                    return Err(BenchError::Calibration(
                        "polynomial model needs at least one coefficient".into(),
                    ));
                }
                Ok(CalibrationModel::Polynomial {
                    coeffs: coeffs.to_vec(),
                })
            }
            ModelFamily::LinearSinusoidal => match coeffs {
                [a1, a0, amp, freq, phase, offset] => Ok(CalibrationModel::LinearSinusoidal {
                    a1: *a1,
                    a0: *a0,
                    amp: *amp,
                    freq: *freq,
                    phase: *phase,
                    offset: *offset,
                }),
                _ => Err(BenchError::Calibration(format!(
                    "linear_sinusoidal needs 6 coefficients, got {}",
                    coeffs.len()
                ))),
            },
            ModelFamily::PolynomialSinusoidal => match coeffs {
                [a2, a1, a0, amp, freq, phase, offset] => {
                    Ok(CalibrationModel::PolynomialSinusoidal {
                        a2: *a2,
                        a1: *a1,
                        a0: *a0,
                        amp: *amp,
                        freq: *freq,
                        phase: *phase,
                        offset: *offset,
                    })
                }
                _ => Err(BenchError::Calibration(format!(
                    "polynomial_sinusoidal needs 7 coefficients, got {}",
                    coeffs.len()
                ))),
            },
        }
    }

    /// Build a model from a legacy bare coefficient array, where the family
    /// is inferred from the length: 7 selects polynomial+sinusoidal, 6
    /// selects linear+sinusoidal, anything else is a plain polynomial.
    ///
    /// Polynomials of degree >= 5 cannot be expressed this way (their
    /// lengths collide with the sinusoidal families); such fits must use
    /// the tagged schema.
    pub fn from_legacy(coeffs: &[f64]) -> Result<Self> {
        let family = match coeffs.len() {
            7 => ModelFamily::PolynomialSinusoidal,
            6 => ModelFamily::LinearSinusoidal,
            _ => ModelFamily::Polynomial,
        };
        Self::from_tagged(family, coeffs)
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            CalibrationModel::Polynomial { .. } => ModelFamily::Polynomial,
            CalibrationModel::LinearSinusoidal { .. } => ModelFamily::LinearSinusoidal,
            CalibrationModel::PolynomialSinusoidal { .. } => ModelFamily::PolynomialSinusoidal,
        }
    }

    /// Flat coefficient list in the order the persisted schema uses.
    pub fn coefficients(&self) -> Vec<f64> {
        match self {
            CalibrationModel::Polynomial { coeffs } => coeffs.clone(),
            CalibrationModel::LinearSinusoidal {
                a1,
                a0,
                amp,
                freq,
                phase,
                offset,
            } => vec![*a1, *a0, *amp, *freq, *phase, *offset],
            CalibrationModel::PolynomialSinusoidal {
                a2,
                a1,
                a0,
                amp,
                freq,
                phase,
                offset,
            } => vec![*a2, *a1, *a0, *amp, *freq, *phase, *offset],
        }
    }

    /// Evaluate the model at `x`.
    pub fn evaluate(&self, x: f64) -> f64 {
        match self {
            CalibrationModel::Polynomial { coeffs } => horner(coeffs, x),
            CalibrationModel::LinearSinusoidal {
                a1,
                a0,
                amp,
                freq,
                phase,
                offset,
            } => a1 * x + a0 + amp * (freq * x + phase).sin() + offset,
            CalibrationModel::PolynomialSinusoidal {
                a2,
                a1,
                a0,
                amp,
                freq,
                phase,
                offset,
            } => a2 * x * x + a1 * x + a0 + amp * (freq * x + phase).sin() + offset,
        }
    }
}

/// Goodness-of-fit figures recorded by the offline fitting tool. The bench
/// only carries them through for logging and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FitMetrics {
    #[serde(default)]
    pub r_squared: f64,
    #[serde(default)]
    pub rmse: f64,
    #[serde(default)]
    pub mae: f64,
    #[serde(default)]
    pub residual_std: f64,
}

fn horner(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().fold(0.0, |acc, c| acc * x + c)
}
