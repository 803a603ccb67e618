//! The tactile processing pipeline: a fixed chain of stages turning camera
//! frames into marker tracks, displacements, contact state, and force
//! estimates, one completed field store per frame.

pub mod calibration;
pub mod context;
pub mod filters;
pub mod matrix_io;
pub mod registry;
pub mod runner;
pub mod stage;
pub mod stages;

pub use context::{ContactState, FrameContext};
pub use runner::PipelineRunner;
pub use stage::{PipelineStage, StageOutcome};

/// Canonical field names published into the per-frame store. Configuration
/// and the wire schema refer to fields by these strings.
pub mod field_names {
    pub const RAW_IMAGE: &str = "raw_image";
    pub const MARKER_POSITIONS_2D: &str = "marker_positions_2d";
    pub const FRAME_OK: &str = "frame_ok";
    pub const TRACKER_MASK: &str = "tracker_mask";
    pub const INITIALIZE_PROGRESS: &str = "initialize_progress";
    pub const MARKER_POSITIONS_3D: &str = "marker_positions_3d";
    pub const MARKER_DISPLACEMENTS: &str = "marker_displacements";
    pub const NON_CONTACT_STATE: &str = "non_contact_state";
    pub const CONTACT_METRIC: &str = "contact_metric";
    pub const MARKER_FORCES: &str = "marker_forces";
    pub const RESULTANT_FORCE: &str = "resultant_force";
    pub const RESULTANT_MOMENT: &str = "resultant_moment";
}
