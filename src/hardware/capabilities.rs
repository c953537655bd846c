//! Collaborator traits for the acquisition engine.
//!
//! The engine never talks to vendor SDKs or raw transports; it drives
//! three narrow seams, each a small async trait:
//!
//! - [`FrameSource`]: the capture device (open/close stream, bounded grab)
//! - [`BenchActions`]: the optical bench actions a scan step can request
//! - [`FrameSink`]: persistence for averaged frames
//!
//! Production implementations wrap the motion controller, calibration
//! service and camera driver; `hardware::mock` provides in-memory versions
//! for tests and dry runs.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::scan::{ScanStep, Vec3};

/// One captured frame, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<f64>,
}

impl Frame {
    pub fn filled(width: u32, height: u32, value: f64) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; (width * height) as usize],
        }
    }
}

/// The capture device. Exactly one stream may be open per device; the
/// acquisition engine holds it for a whole session.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn open_stream(&self) -> Result<()>;

    async fn close_stream(&self) -> Result<()>;

    /// Grab one frame, waiting at most `timeout`. `Ok(None)` means the
    /// grab timed out or the device had no frame ready; hard driver
    /// failures return `Err`.
    async fn grab_frame(&self, timeout: Duration) -> Result<Option<Frame>>;
}

/// Hardware actions a scan step can dispatch. Implementations translate
/// physical values into motor moves via the calibration service.
#[async_trait]
pub trait BenchActions: Send + Sync {
    async fn move_to(&self, position: Vec3) -> Result<()>;

    async fn set_polarization(&self, angle: f64) -> Result<()>;

    async fn set_wavelength(&self, value: f64) -> Result<()>;
}

/// Metadata attached to every persisted frame.
#[derive(Debug, Clone)]
pub struct StepMetadata {
    pub run_id: String,
    pub step_index: usize,
    pub step: ScanStep,
    pub filename: String,
}

/// Persistence collaborator. `persist_indexed` is called exactly once per
/// successfully captured step; `persist_transient` overwrites the latest
/// frame for live preview consumers.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn persist_transient(&self, frame: &Frame) -> Result<()>;

    async fn persist_indexed(&self, frame: &Frame, metadata: &StepMetadata) -> Result<()>;
}
