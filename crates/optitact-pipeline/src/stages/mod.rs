//! The concrete pipeline stages, in their canonical execution order.

mod contact;
mod displacement;
mod force;
mod input;
mod marker_tracker;
mod reconstruction;

pub use contact::ContactDetectorStage;
pub use displacement::DisplacementStage;
pub use force::ForceEstimatorStage;
pub use input::{DirectorySource, FrameSource, InputStage, SyntheticSource};
pub use marker_tracker::MarkerTrackerStage;
pub use reconstruction::Reconstruction3dStage;
