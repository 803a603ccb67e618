//! Trailing moving average over recent frames.

use std::collections::VecDeque;

use ndarray::Array2;
use serde::Deserialize;

use optitact_structures::{FieldValue, OptitactDataError};

use super::{FieldFilter, FilterContext};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemporalMeanParams {
    pub window: usize,
}

impl Default for TemporalMeanParams {
    fn default() -> Self {
        Self { window: 5 }
    }
}

/// Averages the field over the last `window` frames. Works on scalars and
/// matrices; a shape change resets the history.
pub struct TemporalMeanFilter {
    window: usize,
    scalar_history: VecDeque<f64>,
    matrix_history: VecDeque<Array2<f64>>,
}

impl TemporalMeanFilter {
    pub fn new(params: TemporalMeanParams) -> Self {
        TemporalMeanFilter {
            window: params.window.max(1),
            scalar_history: VecDeque::new(),
            matrix_history: VecDeque::new(),
        }
    }

    fn mean_scalar(&mut self, value: f64) -> f64 {
        self.scalar_history.push_back(value);
        while self.scalar_history.len() > self.window {
            self.scalar_history.pop_front();
        }
        self.scalar_history.iter().sum::<f64>() / self.scalar_history.len() as f64
    }

    fn mean_matrix(&mut self, value: Array2<f64>) -> Array2<f64> {
        if self.matrix_history.front().map(|m| m.dim()) != Some(value.dim()) {
            self.matrix_history.clear();
        }
        self.matrix_history.push_back(value);
        while self.matrix_history.len() > self.window {
            self.matrix_history.pop_front();
        }
        let mut mean = Array2::<f64>::zeros(self.matrix_history[0].dim());
        for entry in &self.matrix_history {
            mean += entry;
        }
        mean / self.matrix_history.len() as f64
    }
}

impl FieldFilter for TemporalMeanFilter {
    fn name(&self) -> &'static str {
        "temporal_mean"
    }

    fn apply(
        &mut self,
        _ctx: &FilterContext<'_>,
        value: FieldValue,
    ) -> Result<FieldValue, OptitactDataError> {
        match value {
            FieldValue::Scalar(v) => Ok(FieldValue::Scalar(self.mean_scalar(v))),
            FieldValue::Matrix(m) => Ok(FieldValue::Matrix(self.mean_matrix(m))),
            other => Err(OptitactDataError::FieldContract(format!(
                "temporal_mean cannot filter {}!",
                other
            ))),
        }
    }
}
