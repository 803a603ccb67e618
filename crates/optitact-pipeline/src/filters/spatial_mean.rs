//! Neighborhood smoothing across markers.

use ndarray::Array2;
use serde::Deserialize;

use optitact_structures::{FieldValue, OptitactDataError};

use super::{FieldFilter, FilterContext};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpatialMeanParams {
    /// Spatial neighbors blended into each marker, excluding itself
    pub neighbors: usize,
}

impl Default for SpatialMeanParams {
    fn default() -> Self {
        Self { neighbors: 4 }
    }
}

/// Replaces each marker row with the mean of itself and its nearest spatial
/// neighbors, then restores the original per-column sums exactly so the
/// downstream resultant is unchanged by smoothing.
pub struct SpatialMeanFilter {
    neighbors: usize,
}

impl SpatialMeanFilter {
    pub fn new(params: SpatialMeanParams) -> Self {
        SpatialMeanFilter { neighbors: params.neighbors }
    }

    fn smooth(&self, positions: &Array2<f64>, values: &Array2<f64>) -> Result<Array2<f64>, OptitactDataError> {
        let marker_count = values.nrows();
        if positions.nrows() != marker_count {
            return Err(OptitactDataError::FieldContract(format!(
                "spatial_mean has {} positions for {} value rows!",
                positions.nrows(),
                marker_count
            )));
        }
        let neighbor_count = self.neighbors.min(marker_count.saturating_sub(1));
        if neighbor_count == 0 {
            return Ok(values.clone());
        }

        let mut smoothed = Array2::<f64>::zeros(values.dim());
        for marker in 0..marker_count {
            let mut by_distance: Vec<(usize, f64)> = (0..marker_count)
                .filter(|&other| other != marker)
                .map(|other| {
                    let mut dist_sq = 0.0;
                    for axis in 0..positions.ncols() {
                        let d = positions[(marker, axis)] - positions[(other, axis)];
                        dist_sq += d * d;
                    }
                    (other, dist_sq)
                })
                .collect();
            by_distance
                .sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            by_distance.truncate(neighbor_count);

            let blend = 1.0 / (neighbor_count + 1) as f64;
            for axis in 0..values.ncols() {
                let mut sum = values[(marker, axis)];
                for (other, _) in &by_distance {
                    sum += values[(*other, axis)];
                }
                smoothed[(marker, axis)] = sum * blend;
            }
        }

        // Exact column-sum restoration
        for axis in 0..values.ncols() {
            let original: f64 = values.column(axis).sum();
            let current: f64 = smoothed.column(axis).sum();
            let correction = (original - current) / marker_count as f64;
            for marker in 0..marker_count {
                smoothed[(marker, axis)] += correction;
            }
        }
        Ok(smoothed)
    }
}

impl FieldFilter for SpatialMeanFilter {
    fn name(&self) -> &'static str {
        "spatial_mean"
    }

    fn apply(
        &mut self,
        ctx: &FilterContext<'_>,
        value: FieldValue,
    ) -> Result<FieldValue, OptitactDataError> {
        match value {
            FieldValue::Matrix(m) => Ok(FieldValue::Matrix(self.smooth(ctx.positions, &m)?)),
            other => Err(OptitactDataError::FieldContract(format!(
                "spatial_mean cannot filter {}!",
                other
            ))),
        }
    }
}
