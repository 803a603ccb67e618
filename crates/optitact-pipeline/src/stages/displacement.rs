//! Displacement tracking against a rest reference.
//!
//! The reference is the mean of the first few post-calibration frames. During
//! sustained no-contact periods it drifts slowly toward the current positions
//! so thermal and mechanical creep do not masquerade as contact.

use ndarray::Array2;
use tracing::debug;

use optitact_config::stages::DisplacementParams;
use optitact_structures::OptitactDataError;

use crate::calibration::{CalibrationPhase, SharedCalibration};
use crate::context::FrameContext;
use crate::field_names;
use crate::stage::{PipelineStage, StageOutcome};

pub struct DisplacementStage {
    params: DisplacementParams,
    shared: SharedCalibration,
    /// Rest positions, N x 3; running mean while the window fills
    reference: Option<Array2<f64>>,
    frames_in_window: usize,
}

impl DisplacementStage {
    pub fn new(params: DisplacementParams, shared: SharedCalibration) -> Result<Self, OptitactDataError> {
        if params.baseline_window == 0 {
            return Err(OptitactDataError::BadParameters(
                "Displacement baseline window must be at least one frame!".into(),
            ));
        }
        if !(0.0..=1.0).contains(&params.drift_weight) {
            return Err(OptitactDataError::BadParameters(
                "Drift weight must be within [0, 1]!".into(),
            ));
        }
        Ok(DisplacementStage { params, shared, reference: None, frames_in_window: 0 })
    }

    fn update_reference(&mut self, positions: &Array2<f64>, ctx: &FrameContext) {
        match &mut self.reference {
            None => {
                self.reference = Some(positions.clone());
                self.frames_in_window = 1;
            }
            Some(reference) if self.frames_in_window < self.params.baseline_window => {
                // Incremental running mean over the baseline window
                self.frames_in_window += 1;
                let weight = 1.0 / self.frames_in_window as f64;
                *reference += &((positions - &*reference) * weight);
                if self.frames_in_window == self.params.baseline_window {
                    debug!(frames = self.frames_in_window, "Displacement reference established");
                }
            }
            Some(reference) => {
                let contact = ctx.contact_in();
                if !contact.in_contact && contact.non_contact_streak >= self.params.drift_delay {
                    *reference += &((positions - &*reference) * self.params.drift_weight);
                }
            }
        }
    }
}

impl PipelineStage for DisplacementStage {
    fn name(&self) -> &'static str {
        "displacement"
    }

    fn declared_inputs(&self) -> &'static [&'static str] {
        &[field_names::MARKER_POSITIONS_3D]
    }

    fn declared_outputs(&self) -> &'static [&'static str] {
        &[field_names::MARKER_DISPLACEMENTS]
    }

    fn process(&mut self, ctx: &mut FrameContext) -> Result<StageOutcome, OptitactDataError> {
        let positions = ctx.store.get_matrix(field_names::MARKER_POSITIONS_3D)?.clone();

        let displacements = match self.shared.snapshot().phase {
            CalibrationPhase::Warming => Array2::<f64>::zeros(positions.dim()),
            CalibrationPhase::Ready => {
                self.update_reference(&positions, ctx);
                let reference = self.reference.as_ref().ok_or_else(|| {
                    OptitactDataError::InternalError("Displacement reference missing!".into())
                })?;
                &positions - reference
            }
        };

        ctx.store.insert(field_names::MARKER_DISPLACEMENTS, displacements);
        Ok(StageOutcome::Advance)
    }
}
