//! Calibration state shared across stages, plus the stage that drives the
//! startup calibration window.

use std::sync::Arc;

use ndarray::Array2;
use parking_lot::RwLock;
use tracing::info;

use optitact_config::stages::CalibrationParams;
use optitact_structures::OptitactDataError;

use crate::context::FrameContext;
use crate::field_names;
use crate::stage::{PipelineStage, StageOutcome};

/// Where the pipeline is in its startup calibration window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    /// Background/baseline establishment; gating is relaxed
    Warming,
    /// Normal operation; terminal for the process lifetime
    Ready,
}

/// Snapshot of everything established during calibration.
///
/// Read-mostly after startup. The dynamic-compensation path never edits a
/// snapshot in place; it installs a whole new one through [`SharedCalibration`].
#[derive(Debug, Clone)]
pub struct CalibrationState {
    pub phase: CalibrationPhase,
    /// Smoothed background luminance model
    pub background: Option<Array2<f64>>,
    /// Rest marker positions in pixels, N x 2, row order is marker identity
    pub baseline_2d: Option<Array2<f64>>,
}

impl CalibrationState {
    fn initial() -> Self {
        CalibrationState { phase: CalibrationPhase::Warming, background: None, baseline_2d: None }
    }
}

/// Publish-new-snapshot cell for [`CalibrationState`].
///
/// Readers clone the `Arc` and work against an immutable snapshot; writers
/// swap in a replacement. Concurrent readers never observe a partial update.
#[derive(Clone)]
pub struct SharedCalibration {
    inner: Arc<RwLock<Arc<CalibrationState>>>,
}

impl SharedCalibration {
    pub fn new() -> Self {
        SharedCalibration { inner: Arc::new(RwLock::new(Arc::new(CalibrationState::initial()))) }
    }

    pub fn snapshot(&self) -> Arc<CalibrationState> {
        self.inner.read().clone()
    }

    pub fn install(&self, state: CalibrationState) {
        *self.inner.write() = Arc::new(state);
    }
}

impl Default for SharedCalibration {
    fn default() -> Self {
        Self::new()
    }
}

/// The `calibration` stage: counts completed frames through the warmup window,
/// publishes `initialize_progress`, and flips the shared phase to Ready once.
///
/// Runs after the marker tracker so that discarded frames never advance the
/// progress counter.
pub struct CalibrationManagerStage {
    params: CalibrationParams,
    frames_seen: u64,
    shared: SharedCalibration,
}

impl CalibrationManagerStage {
    pub fn new(params: CalibrationParams, shared: SharedCalibration) -> Result<Self, OptitactDataError> {
        if params.warmup_frames == 0 {
            return Err(OptitactDataError::BadParameters(
                "Calibration warmup window must be at least one frame!".into(),
            ));
        }
        Ok(CalibrationManagerStage { params, frames_seen: 0, shared })
    }
}

impl PipelineStage for CalibrationManagerStage {
    fn name(&self) -> &'static str {
        "calibration"
    }

    fn declared_inputs(&self) -> &'static [&'static str] {
        &[]
    }

    fn declared_outputs(&self) -> &'static [&'static str] {
        &[field_names::INITIALIZE_PROGRESS]
    }

    fn process(&mut self, ctx: &mut FrameContext) -> Result<StageOutcome, OptitactDataError> {
        let snapshot = self.shared.snapshot();
        let progress = match snapshot.phase {
            CalibrationPhase::Ready => 1.0,
            CalibrationPhase::Warming => {
                self.frames_seen += 1;
                if self.frames_seen >= self.params.warmup_frames {
                    let mut next = (*snapshot).clone();
                    next.phase = CalibrationPhase::Ready;
                    self.shared.install(next);
                    info!(frames = self.frames_seen, "Calibration window complete, pipeline ready");
                    1.0
                } else {
                    self.frames_seen as f64 / self.params.warmup_frames as f64
                }
            }
        };
        ctx.store.insert(field_names::INITIALIZE_PROGRESS, progress);
        Ok(StageOutcome::Advance)
    }
}
