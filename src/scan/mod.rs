//! Scan planning: parameter schema and sequence generation.
//!
//! Everything here is pure data generation, independent of hardware. The
//! acquisition engine consumes the built [`ScanSequence`].

pub mod parameters;
pub mod sequence;

pub use parameters::{
    GeneralParameters, MotionParameters, PolarizationParameters, ScanParameters, Vec3,
    WavelengthParameters,
};
pub use sequence::{
    estimate, generate_array, ScanBaseline, ScanEstimate, ScanMode, ScanSequence, ScanStep,
    SequenceBuilder,
};
