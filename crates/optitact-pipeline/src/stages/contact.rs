//! Contact classification from weighted marker displacement.
//!
//! The raw metric is a per-marker weighted mean of absolute displacement.
//! Classification is debounced: the state flips only after the raw signal
//! has disagreed with it for a configured number of consecutive frames.

use tracing::{debug, info};

use optitact_config::stages::ContactParams;
use optitact_structures::data::markers::ensure_shape;
use optitact_structures::OptitactDataError;

use crate::calibration::{CalibrationPhase, SharedCalibration};
use crate::context::{ContactState, FrameContext};
use crate::field_names;
use crate::matrix_io::load_matrix;
use crate::stage::{PipelineStage, StageOutcome};

pub struct ContactDetectorStage {
    params: ContactParams,
    shared: SharedCalibration,
    /// N x 3 per-marker, per-axis sensitivity weights
    weights: ndarray::Array2<f64>,
}

impl ContactDetectorStage {
    pub fn new(params: ContactParams, shared: SharedCalibration) -> Result<Self, OptitactDataError> {
        let weights = load_matrix(&params.sensitivity_path)?;
        if weights.ncols() != 3 {
            return Err(OptitactDataError::BadParameters(format!(
                "Sensitivity matrix must have 3 columns, found {}!",
                weights.ncols()
            )));
        }
        if params.threshold <= 0.0 {
            return Err(OptitactDataError::BadParameters(
                "Contact threshold must be positive!".into(),
            ));
        }
        Ok(ContactDetectorStage { params, shared, weights })
    }

    fn metric(&self, displacements: &ndarray::Array2<f64>) -> Result<f64, OptitactDataError> {
        ensure_shape(displacements, self.weights.nrows(), 3, "marker_displacements")?;
        let mut total = 0.0;
        for marker in 0..displacements.nrows() {
            for axis in 0..3 {
                total += self.weights[(marker, axis)] * displacements[(marker, axis)].abs();
            }
        }
        Ok(total / displacements.nrows() as f64)
    }

    fn debounce(&self, previous: ContactState, raw_in_contact: bool) -> ContactState {
        let mut next = previous;
        if raw_in_contact == previous.in_contact {
            next.pending_streak = 0;
        } else {
            next.pending_streak += 1;
            if next.pending_streak >= self.params.debounce {
                next.in_contact = raw_in_contact;
                next.pending_streak = 0;
                info!(in_contact = next.in_contact, "Contact state flipped");
            }
        }
        if next.in_contact {
            next.non_contact_streak = 0;
        } else {
            next.non_contact_streak = next.non_contact_streak.saturating_add(1);
        }
        next
    }
}

impl PipelineStage for ContactDetectorStage {
    fn name(&self) -> &'static str {
        "contact_detector"
    }

    fn declared_inputs(&self) -> &'static [&'static str] {
        &[field_names::MARKER_DISPLACEMENTS]
    }

    fn declared_outputs(&self) -> &'static [&'static str] {
        &[field_names::NON_CONTACT_STATE, field_names::CONTACT_METRIC]
    }

    fn process(&mut self, ctx: &mut FrameContext) -> Result<StageOutcome, OptitactDataError> {
        if self.shared.snapshot().phase == CalibrationPhase::Warming {
            ctx.store.insert(field_names::NON_CONTACT_STATE, 1.0);
            ctx.store.insert(field_names::CONTACT_METRIC, 0.0);
            ctx.set_contact_out(ContactState::default());
            return Ok(StageOutcome::Advance);
        }

        let displacements = ctx.store.get_matrix(field_names::MARKER_DISPLACEMENTS)?;
        let metric = self.metric(displacements)?;
        let raw_in_contact = metric > self.params.threshold;
        let state = self.debounce(ctx.contact_in(), raw_in_contact);
        debug!(frame = ctx.frame_index(), metric, in_contact = state.in_contact, "Contact evaluated");

        ctx.store.insert(
            field_names::NON_CONTACT_STATE,
            if state.in_contact { 0.0 } else { 1.0 },
        );
        ctx.store.insert(field_names::CONTACT_METRIC, metric);
        ctx.set_contact_out(state);
        Ok(StageOutcome::Advance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationState;
    use ndarray::Array2;
    use optitact_structures::FieldStore;
    use std::io::Write;
    use std::sync::Arc;

    fn sensitivity_file(dir: &tempfile::TempDir, rows: usize) -> std::path::PathBuf {
        let path = dir.path().join("sensitivity.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        for _ in 0..rows {
            writeln!(file, "1.0 1.0 1.0").unwrap();
        }
        path
    }

    fn ready_shared() -> SharedCalibration {
        let shared = SharedCalibration::new();
        shared.install(CalibrationState {
            phase: CalibrationPhase::Ready,
            background: None,
            baseline_2d: None,
        });
        shared
    }

    fn run(
        stage: &mut ContactDetectorStage,
        displacements: Array2<f64>,
        contact_in: ContactState,
    ) -> (f64, ContactState) {
        let mut ctx = FrameContext::new(0, Arc::new(FieldStore::new()), contact_in);
        ctx.store.insert(field_names::MARKER_DISPLACEMENTS, displacements);
        stage.process(&mut ctx).unwrap();
        let non_contact = ctx.store.get_scalar(field_names::NON_CONTACT_STATE).unwrap();
        (non_contact, ctx.contact_out().unwrap())
    }

    #[test]
    fn debounce_resists_single_frame_spikes() {
        let dir = tempfile::tempdir().unwrap();
        let params = ContactParams {
            sensitivity_path: sensitivity_file(&dir, 2),
            threshold: 0.5,
            debounce: 3,
        };
        let mut stage = ContactDetectorStage::new(params, ready_shared()).unwrap();

        let quiet = Array2::<f64>::zeros((2, 3));
        let loud = Array2::<f64>::from_elem((2, 3), 1.0);

        let (_, state) = run(&mut stage, loud.clone(), ContactState::default());
        assert!(!state.in_contact, "single loud frame must not flip");
        let (_, state) = run(&mut stage, quiet.clone(), state);
        assert_eq!(state.pending_streak, 0, "spike forgotten after a quiet frame");

        // Three consecutive loud frames flip the state
        let mut state = state;
        for _ in 0..3 {
            let out = run(&mut stage, loud.clone(), state);
            state = out.1;
        }
        assert!(state.in_contact);
        let (non_contact, _) = run(&mut stage, loud, state);
        assert_eq!(non_contact, 0.0);
    }

    #[test]
    fn non_contact_streak_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let params = ContactParams {
            sensitivity_path: sensitivity_file(&dir, 1),
            threshold: 0.5,
            debounce: 1,
        };
        let mut stage = ContactDetectorStage::new(params, ready_shared()).unwrap();

        let quiet = Array2::<f64>::zeros((1, 3));
        let mut state = ContactState::default();
        for _ in 0..4 {
            let out = run(&mut stage, quiet.clone(), state);
            state = out.1;
        }
        assert_eq!(state.non_contact_streak, 4);
    }

    #[test]
    fn marker_count_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let params = ContactParams {
            sensitivity_path: sensitivity_file(&dir, 4),
            ..Default::default()
        };
        let mut stage = ContactDetectorStage::new(params, ready_shared()).unwrap();

        let mut ctx = FrameContext::new(0, Arc::new(FieldStore::new()), ContactState::default());
        ctx.store.insert(field_names::MARKER_DISPLACEMENTS, Array2::<f64>::zeros((2, 3)));
        assert!(stage.process(&mut ctx).is_err());
    }

    #[test]
    fn missing_sensitivity_file_is_fatal() {
        let params = ContactParams {
            sensitivity_path: "/nonexistent/sensitivity.txt".into(),
            ..Default::default()
        };
        assert!(ContactDetectorStage::new(params, ready_shared()).is_err());
    }
}
