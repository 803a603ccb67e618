//! 2D-to-3D back-projection.
//!
//! Lateral coordinates come from a planar pin-hole back-projection scaled by
//! the calibration target geometry. Depth is inferred from local marker pitch
//! expansion: markers pressed toward the camera spread apart relative to
//! their rest spacing.

use std::collections::VecDeque;

use ndarray::Array2;
use tracing::debug;

use optitact_config::stages::ReconstructionParams;
use optitact_structures::OptitactDataError;

use crate::calibration::{CalibrationPhase, SharedCalibration};
use crate::context::FrameContext;
use crate::field_names;
use crate::stage::{PipelineStage, StageOutcome};

/// Baseline neighbors consulted for the local pitch estimate.
const PITCH_NEIGHBORS: usize = 4;

pub struct Reconstruction3dStage {
    params: ReconstructionParams,
    shared: SharedCalibration,
    /// Derived once from the first Ready frame's baseline
    geometry: Option<Geometry>,
    smooth_history: VecDeque<Array2<f64>>,
}

/// Static quantities derived from the 2D baseline.
struct Geometry {
    mm_per_px: f64,
    center_x: f64,
    center_y: f64,
    /// Per marker: indices of its nearest baseline neighbors
    neighbors: Vec<Vec<usize>>,
    /// Per marker: mean baseline distance to those neighbors, in pixels
    rest_pitch: Vec<f64>,
}

impl Reconstruction3dStage {
    pub fn new(params: ReconstructionParams, shared: SharedCalibration) -> Result<Self, OptitactDataError> {
        if params.cell_size_mm <= 0.0 {
            return Err(OptitactDataError::BadParameters("Cell size must be positive!".into()));
        }
        if params.working_distance_mm <= 0.0 {
            return Err(OptitactDataError::BadParameters("Working distance must be positive!".into()));
        }
        Ok(Reconstruction3dStage { params, shared, geometry: None, smooth_history: VecDeque::new() })
    }

    fn derive_geometry(&self, baseline: &Array2<f64>) -> Result<Geometry, OptitactDataError> {
        let marker_count = baseline.nrows();
        if marker_count < 2 {
            return Err(OptitactDataError::BadParameters(
                "Reconstruction needs at least two markers!".into(),
            ));
        }

        let mut neighbors = Vec::with_capacity(marker_count);
        let mut rest_pitch = Vec::with_capacity(marker_count);
        let mut nearest_distances = Vec::with_capacity(marker_count);

        for marker in 0..marker_count {
            let mut by_distance: Vec<(usize, f64)> = (0..marker_count)
                .filter(|&other| other != marker)
                .map(|other| (other, pair_distance(baseline, marker, other)))
                .collect();
            by_distance.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            by_distance.truncate(PITCH_NEIGHBORS);

            nearest_distances.push(by_distance[0].1);
            let pitch = by_distance.iter().map(|(_, d)| d).sum::<f64>() / by_distance.len() as f64;
            if pitch <= f64::EPSILON {
                return Err(OptitactDataError::BadParameters(
                    "Baseline markers are coincident, cannot derive pitch!".into(),
                ));
            }
            neighbors.push(by_distance.into_iter().map(|(index, _)| index).collect());
            rest_pitch.push(pitch);
        }

        // Pixel scale from the physical cell size over the median rest spacing
        nearest_distances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median_pitch = nearest_distances[nearest_distances.len() / 2];
        let mm_per_px = self.params.cell_size_mm / median_pitch;

        let center_x = baseline.column(0).mean().unwrap_or(0.0);
        let center_y = baseline.column(1).mean().unwrap_or(0.0);

        debug!(mm_per_px, median_pitch, "Reconstruction geometry derived");
        Ok(Geometry { mm_per_px, center_x, center_y, neighbors, rest_pitch })
    }

    fn back_project(&self, positions: &Array2<f64>, geometry: &Geometry) -> Array2<f64> {
        let marker_count = positions.nrows();
        let mut points = Array2::<f64>::zeros((marker_count, 3));
        for marker in 0..marker_count {
            let u = positions[(marker, 0)];
            let v = positions[(marker, 1)];
            points[(marker, 0)] = (u - geometry.center_x) * geometry.mm_per_px;
            points[(marker, 1)] = (v - geometry.center_y) * geometry.mm_per_px;

            let current_pitch = geometry.neighbors[marker]
                .iter()
                .map(|&other| pair_distance(positions, marker, other))
                .sum::<f64>()
                / geometry.neighbors[marker].len() as f64;
            let expansion = current_pitch / geometry.rest_pitch[marker] - 1.0;
            points[(marker, 2)] = self.params.working_distance_mm * expansion;
        }
        points
    }

    /// Trailing moving average over the last `smooth_window` frames.
    fn smooth(&mut self, points: Array2<f64>) -> Array2<f64> {
        let window = self.params.smooth_window.max(1);
        if window == 1 {
            return points;
        }
        if self.smooth_history.front().map(|p| p.dim()) != Some(points.dim()) {
            self.smooth_history.clear();
        }
        self.smooth_history.push_back(points);
        while self.smooth_history.len() > window {
            self.smooth_history.pop_front();
        }
        let mut mean = Array2::<f64>::zeros(self.smooth_history[0].dim());
        for entry in &self.smooth_history {
            mean += entry;
        }
        mean / self.smooth_history.len() as f64
    }
}

fn pair_distance(positions: &Array2<f64>, a: usize, b: usize) -> f64 {
    let dx = positions[(a, 0)] - positions[(b, 0)];
    let dy = positions[(a, 1)] - positions[(b, 1)];
    (dx * dx + dy * dy).sqrt()
}

impl PipelineStage for Reconstruction3dStage {
    fn name(&self) -> &'static str {
        "reconstruction_3d"
    }

    fn declared_inputs(&self) -> &'static [&'static str] {
        &[field_names::MARKER_POSITIONS_2D]
    }

    fn declared_outputs(&self) -> &'static [&'static str] {
        &[field_names::MARKER_POSITIONS_3D]
    }

    fn process(&mut self, ctx: &mut FrameContext) -> Result<StageOutcome, OptitactDataError> {
        let positions = ctx.store.get_matrix(field_names::MARKER_POSITIONS_2D)?;
        let snapshot = self.shared.snapshot();

        let points = match (snapshot.phase, snapshot.baseline_2d.as_ref()) {
            (CalibrationPhase::Warming, _) | (_, None) => {
                Array2::<f64>::zeros((positions.nrows(), 3))
            }
            (CalibrationPhase::Ready, Some(baseline)) => {
                if self.geometry.is_none() {
                    self.geometry = Some(self.derive_geometry(baseline)?);
                }
                let geometry = self.geometry.as_ref().ok_or_else(|| {
                    OptitactDataError::InternalError("Geometry derivation skipped!".into())
                })?;
                let raw = self.back_project(positions, geometry);
                self.smooth(raw)
            }
        };

        ctx.store.insert(field_names::MARKER_POSITIONS_3D, points);
        Ok(StageOutcome::Advance)
    }
}
