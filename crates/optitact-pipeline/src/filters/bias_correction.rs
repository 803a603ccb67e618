//! Residual bias removal for force-like fields.
//!
//! Learns a per-marker bias estimate and always subtracts it. Learning is
//! gated on the measured resultant magnitude (below or above a threshold,
//! per configured sign) so real contact is never absorbed into the bias,
//! and the per-marker learning rate falls off linearly with distance from
//! the assumed contact center.

use ndarray::Array2;
use serde::Deserialize;

use optitact_structures::{FieldValue, OptitactDataError};

use super::{FieldFilter, FilterContext};

/// Which side of the threshold enables learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateSign {
    Below,
    Above,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BiasCorrectionParams {
    pub learning_rate: f64,
    /// Resultant magnitude gate for the bias update
    pub threshold: f64,
    pub sign: GateSign,
    /// Assumed lateral contact center, in the marker coordinate frame
    pub center_offset: [f64; 2],
    /// Linear falloff of the learning rate with distance from the center;
    /// zero means every marker learns at the full rate
    pub position_gain: f64,
}

impl Default for BiasCorrectionParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.02,
            threshold: 0.1,
            sign: GateSign::Below,
            center_offset: [0.0, 0.0],
            position_gain: 0.0,
        }
    }
}

pub struct BiasCorrectionFilter {
    params: BiasCorrectionParams,
    bias: Option<Array2<f64>>,
}

impl BiasCorrectionFilter {
    pub fn new(params: BiasCorrectionParams) -> Self {
        BiasCorrectionFilter { params, bias: None }
    }

    fn learning_gate(&self, values: &Array2<f64>) -> bool {
        let mut resultant = [0.0f64; 3];
        for row in 0..values.nrows() {
            for axis in 0..values.ncols().min(3) {
                resultant[axis] += values[(row, axis)];
            }
        }
        let magnitude = resultant.iter().map(|v| v * v).sum::<f64>().sqrt();
        match self.params.sign {
            GateSign::Below => magnitude < self.params.threshold,
            GateSign::Above => magnitude > self.params.threshold,
        }
    }

    /// Per-marker learning weight: a linear ramp about the contact center.
    fn marker_weight(&self, positions: &Array2<f64>, marker: usize) -> f64 {
        if self.params.position_gain == 0.0 || marker >= positions.nrows() {
            return 1.0;
        }
        let dx = positions[(marker, 0)] - self.params.center_offset[0];
        let dy = positions[(marker, 1)] - self.params.center_offset[1];
        (1.0 - self.params.position_gain * (dx * dx + dy * dy).sqrt()).max(0.0)
    }

    fn correct(&mut self, positions: &Array2<f64>, values: &Array2<f64>) -> Array2<f64> {
        if self.bias.as_ref().map(|b| b.dim()) != Some(values.dim()) {
            self.bias = Some(Array2::<f64>::zeros(values.dim()));
        }
        if self.learning_gate(values) {
            let weights: Vec<f64> =
                (0..values.nrows()).map(|marker| self.marker_weight(positions, marker)).collect();
            let rate = self.params.learning_rate;
            if let Some(bias) = self.bias.as_mut() {
                for marker in 0..values.nrows() {
                    for axis in 0..values.ncols() {
                        let error = values[(marker, axis)] - bias[(marker, axis)];
                        bias[(marker, axis)] += rate * weights[marker] * error;
                    }
                }
            }
        }
        match &self.bias {
            Some(bias) => values - bias,
            None => values.clone(),
        }
    }
}

impl FieldFilter for BiasCorrectionFilter {
    fn name(&self) -> &'static str {
        "bias_correction"
    }

    fn apply(
        &mut self,
        ctx: &FilterContext<'_>,
        value: FieldValue,
    ) -> Result<FieldValue, OptitactDataError> {
        match value {
            FieldValue::Matrix(m) => Ok(FieldValue::Matrix(self.correct(ctx.positions, &m))),
            other => Err(OptitactDataError::FieldContract(format!(
                "bias_correction cannot filter {}!",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(count: usize) -> Array2<f64> {
        Array2::from_shape_fn((count, 3), |(marker, axis)| {
            if axis == 0 { marker as f64 * 5.0 } else { 0.0 }
        })
    }

    #[test]
    fn small_constant_offset_converges_to_zero() {
        let mut filter = BiasCorrectionFilter::new(BiasCorrectionParams {
            learning_rate: 0.3,
            threshold: 1.0,
            ..Default::default()
        });
        let pos = positions(2);
        // Resultant magnitude of this offset is below the gate threshold
        let offset = Array2::from_elem((2, 3), 0.05);

        let mut residual = f64::INFINITY;
        for _ in 0..60 {
            let out = filter.correct(&pos, &offset);
            let magnitude = out.iter().map(|v| v.abs()).fold(0.0f64, f64::max);
            assert!(magnitude <= residual + 1e-12, "residual must shrink monotonically");
            residual = magnitude;
        }
        assert!(residual < 1e-3, "residual bias {}", residual);
    }

    #[test]
    fn strong_contact_is_not_learned_as_bias() {
        let mut filter = BiasCorrectionFilter::new(BiasCorrectionParams {
            learning_rate: 0.5,
            threshold: 0.5,
            ..Default::default()
        });
        let pos = positions(1);
        let press = Array2::from_elem((1, 3), 8.0);
        for _ in 0..20 {
            let out = filter.correct(&pos, &press);
            assert_eq!(out, press, "press signal must pass through unbiased");
        }
    }

    #[test]
    fn above_sign_inverts_the_gate() {
        let mut filter = BiasCorrectionFilter::new(BiasCorrectionParams {
            learning_rate: 1.0,
            threshold: 0.5,
            sign: GateSign::Above,
            ..Default::default()
        });
        let pos = positions(1);
        let loud = Array2::from_elem((1, 3), 2.0);
        let out = filter.correct(&pos, &loud);
        // Learned immediately at rate 1.0, so the output collapses to zero
        assert!(out.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn position_ramp_slows_distant_markers() {
        let mut filter = BiasCorrectionFilter::new(BiasCorrectionParams {
            learning_rate: 1.0,
            threshold: 10.0,
            position_gain: 0.1,
            center_offset: [0.0, 0.0],
            ..Default::default()
        });
        let pos = positions(2); // marker 1 sits 5 units from the center
        let offset = Array2::from_elem((2, 3), 0.1);
        let out = filter.correct(&pos, &offset);
        // Marker 0 learns at full rate; marker 1 at half rate
        assert!(out[(0, 0)].abs() < 1e-12);
        assert!((out[(1, 0)] - 0.05).abs() < 1e-9);
    }
}
