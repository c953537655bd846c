//! Hardware seams: capability traits, the controller transport, and mocks.

pub mod capabilities;
pub mod link;
pub mod mock;

pub use capabilities::{BenchActions, Frame, FrameSink, FrameSource, StepMetadata};
pub use link::ControllerLink;
