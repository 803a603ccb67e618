//! Per-marker force estimation and resultant aggregation.
//!
//! The elastomer is modeled as independent linear springs: per-marker force is
//! the elementwise product of displacement, stiffness, and the per-axis scale
//! calibration. Marker-level filters run before aggregation so the resultants
//! are always consistent with the published marker forces.

use ndarray::Array2;

use optitact_config::stages::ForceParams;
use optitact_config::FilterConfig;
use optitact_structures::data::markers::row3;
use optitact_structures::data::Vec3;
use optitact_structures::{FieldValue, OptitactDataError};

use crate::calibration::{CalibrationPhase, SharedCalibration};
use crate::context::FrameContext;
use crate::field_names;
use crate::filters::{build_filter, FieldFilter, FilterContext};
use crate::matrix_io::load_matrix;
use crate::stage::{PipelineStage, StageOutcome};

pub struct ForceEstimatorStage {
    params: ForceParams,
    shared: SharedCalibration,
    /// N x 3 per-marker stiffness; `None` means the uniform scalar applies
    stiffness: Option<Array2<f64>>,
    /// Configured order is application order, partitioned by target field
    filters: Vec<(String, Box<dyn FieldFilter>)>,
}

impl ForceEstimatorStage {
    pub fn new(
        params: ForceParams,
        filter_configs: &[FilterConfig],
        shared: SharedCalibration,
    ) -> Result<Self, OptitactDataError> {
        let stiffness = match &params.stiffness_path {
            Some(path) => {
                let matrix = load_matrix(path)?;
                if matrix.ncols() != 3 {
                    return Err(OptitactDataError::BadParameters(format!(
                        "Stiffness matrix must have 3 columns, found {}!",
                        matrix.ncols()
                    )));
                }
                Some(matrix)
            }
            None => {
                if params.stiffness <= 0.0 {
                    return Err(OptitactDataError::BadParameters(
                        "Uniform stiffness must be positive!".into(),
                    ));
                }
                None
            }
        };

        let mut filters = Vec::with_capacity(filter_configs.len());
        for config in filter_configs {
            let filter = build_filter(config)
                .map_err(|e| OptitactDataError::BadParameters(e.to_string()))?;
            filters.push((config.field.clone(), filter));
        }

        Ok(ForceEstimatorStage { params, shared, stiffness, filters })
    }

    fn marker_forces(&self, displacements: &Array2<f64>) -> Result<Array2<f64>, OptitactDataError> {
        let marker_count = displacements.nrows();
        if let Some(stiffness) = &self.stiffness {
            if stiffness.nrows() != marker_count {
                return Err(OptitactDataError::BadParameters(format!(
                    "Stiffness matrix covers {} markers but the pipeline tracks {}!",
                    stiffness.nrows(),
                    marker_count
                )));
            }
        }

        let mut forces = Array2::<f64>::zeros((marker_count, 3));
        for marker in 0..marker_count {
            for axis in 0..3 {
                let k = match &self.stiffness {
                    Some(stiffness) => stiffness[(marker, axis)],
                    None => self.params.stiffness,
                };
                forces[(marker, axis)] =
                    self.params.scale[axis] * k * displacements[(marker, axis)];
            }
        }
        Ok(forces)
    }

    fn apply_filters(
        filters: &mut [(String, Box<dyn FieldFilter>)],
        field: &str,
        ctx: &FilterContext<'_>,
        mut value: FieldValue,
    ) -> Result<FieldValue, OptitactDataError> {
        for (target, filter) in filters.iter_mut() {
            if target == field {
                value = filter.apply(ctx, value)?;
            }
        }
        Ok(value)
    }
}

fn resultants(positions: &Array2<f64>, forces: &Array2<f64>) -> (Vec3, Vec3) {
    let mut total = Vec3::default();
    let mut moment = Vec3::default();
    for marker in 0..forces.nrows() {
        let force = row3(forces, marker);
        let position = row3(positions, marker);
        total += force;
        moment += position.cross(&force);
    }
    (total, moment)
}

fn row_matrix(v: Vec3) -> Array2<f64> {
    Array2::from_shape_vec((1, 3), v.to_array().to_vec()).unwrap_or_else(|_| Array2::zeros((1, 3)))
}

impl PipelineStage for ForceEstimatorStage {
    fn name(&self) -> &'static str {
        "force_estimator"
    }

    fn declared_inputs(&self) -> &'static [&'static str] {
        &[field_names::MARKER_DISPLACEMENTS, field_names::MARKER_POSITIONS_3D]
    }

    fn declared_outputs(&self) -> &'static [&'static str] {
        &[
            field_names::MARKER_FORCES,
            field_names::RESULTANT_FORCE,
            field_names::RESULTANT_MOMENT,
        ]
    }

    fn process(&mut self, ctx: &mut FrameContext) -> Result<StageOutcome, OptitactDataError> {
        let positions = ctx.store.get_matrix(field_names::MARKER_POSITIONS_3D)?.clone();

        if self.shared.snapshot().phase == CalibrationPhase::Warming {
            ctx.store.insert(field_names::MARKER_FORCES, Array2::<f64>::zeros(positions.dim()));
            ctx.store.insert(field_names::RESULTANT_FORCE, Array2::<f64>::zeros((1, 3)));
            ctx.store.insert(field_names::RESULTANT_MOMENT, Array2::<f64>::zeros((1, 3)));
            return Ok(StageOutcome::Advance);
        }

        let displacements = ctx.store.get_matrix(field_names::MARKER_DISPLACEMENTS)?;
        let raw_forces = self.marker_forces(displacements)?;

        let filter_ctx = FilterContext { positions: &positions };

        // Marker-level filters first, then aggregate, so the published
        // resultants always equal the sum over the published marker forces
        let filtered = Self::apply_filters(
            &mut self.filters,
            field_names::MARKER_FORCES,
            &filter_ctx,
            FieldValue::Matrix(raw_forces),
        )?;
        let forces: Array2<f64> = filtered.try_into()?;

        let (total, moment) = resultants(&positions, &forces);
        let total = Self::apply_filters(
            &mut self.filters,
            field_names::RESULTANT_FORCE,
            &filter_ctx,
            FieldValue::Matrix(row_matrix(total)),
        )?;
        let moment = Self::apply_filters(
            &mut self.filters,
            field_names::RESULTANT_MOMENT,
            &filter_ctx,
            FieldValue::Matrix(row_matrix(moment)),
        )?;

        ctx.store.insert(field_names::MARKER_FORCES, forces);
        let total: Array2<f64> = total.try_into()?;
        let moment: Array2<f64> = moment.try_into()?;
        ctx.store.insert(field_names::RESULTANT_FORCE, total);
        ctx.store.insert(field_names::RESULTANT_MOMENT, moment);
        Ok(StageOutcome::Advance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationState;
    use optitact_structures::FieldStore;
    use std::sync::Arc;

    fn ready_shared() -> SharedCalibration {
        let shared = SharedCalibration::new();
        shared.install(CalibrationState {
            phase: CalibrationPhase::Ready,
            background: None,
            baseline_2d: None,
        });
        shared
    }

    fn run(stage: &mut ForceEstimatorStage, positions: Array2<f64>, displacements: Array2<f64>) -> FieldStore {
        let mut ctx = FrameContext::new(0, Arc::new(FieldStore::new()), Default::default());
        ctx.store.insert(field_names::MARKER_POSITIONS_3D, positions);
        ctx.store.insert(field_names::MARKER_DISPLACEMENTS, displacements);
        stage.process(&mut ctx).unwrap();
        ctx.store
    }

    #[test]
    fn linear_spring_model() {
        let params = ForceParams { stiffness: 2.0, scale: [1.0, 1.0, 0.5], ..Default::default() };
        let mut stage = ForceEstimatorStage::new(params, &[], ready_shared()).unwrap();

        let positions = Array2::<f64>::zeros((2, 3));
        let displacements = ndarray::array![[1.0, 0.0, 4.0], [0.0, -2.0, 0.0]];
        let store = run(&mut stage, positions, displacements);

        let forces = store.get_matrix(field_names::MARKER_FORCES).unwrap();
        assert_eq!(forces[(0, 0)], 2.0);
        assert_eq!(forces[(0, 2)], 4.0);
        assert_eq!(forces[(1, 1)], -4.0);

        let total = store.get_matrix(field_names::RESULTANT_FORCE).unwrap();
        assert_eq!(total[(0, 0)], 2.0);
        assert_eq!(total[(0, 1)], -4.0);
        assert_eq!(total[(0, 2)], 4.0);
    }

    #[test]
    fn moment_is_position_cross_force() {
        let params = ForceParams::default();
        let mut stage = ForceEstimatorStage::new(params, &[], ready_shared()).unwrap();

        // One marker at x=2 mm pushed along z by 1
        let positions = ndarray::array![[2.0, 0.0, 0.0]];
        let displacements = ndarray::array![[0.0, 0.0, 1.0]];
        let store = run(&mut stage, positions, displacements);

        let moment = store.get_matrix(field_names::RESULTANT_MOMENT).unwrap();
        // (2,0,0) x (0,0,1) = (0, -2, 0)
        assert_eq!(moment[(0, 0)], 0.0);
        assert_eq!(moment[(0, 1)], -2.0);
        assert_eq!(moment[(0, 2)], 0.0);
    }

    #[test]
    fn spatial_filter_preserves_the_resultant() {
        let filter = FilterConfig {
            name: "spatial_mean".to_string(),
            field: field_names::MARKER_FORCES.to_string(),
            params: toml::Table::new(),
        };
        let mut filtered_stage =
            ForceEstimatorStage::new(ForceParams::default(), std::slice::from_ref(&filter), ready_shared())
                .unwrap();
        let mut plain_stage =
            ForceEstimatorStage::new(ForceParams::default(), &[], ready_shared()).unwrap();

        let positions = Array2::from_shape_fn((6, 3), |(marker, axis)| {
            if axis == 0 { marker as f64 } else { 0.0 }
        });
        let mut displacements = Array2::<f64>::zeros((6, 3));
        displacements[(3, 2)] = 5.0;

        let filtered = run(&mut filtered_stage, positions.clone(), displacements.clone());
        let plain = run(&mut plain_stage, positions, displacements);

        let a = filtered.get_matrix(field_names::RESULTANT_FORCE).unwrap();
        let b = plain.get_matrix(field_names::RESULTANT_FORCE).unwrap();
        for axis in 0..3 {
            assert!((a[(0, axis)] - b[(0, axis)]).abs() < 1e-9);
        }
    }

    #[test]
    fn stiffness_matrix_row_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stiffness.txt");
        std::fs::write(&path, "1 1 1\n1 1 1\n").unwrap();
        let params = ForceParams { stiffness_path: Some(path), ..Default::default() };
        let mut stage = ForceEstimatorStage::new(params, &[], ready_shared()).unwrap();

        let mut ctx = FrameContext::new(0, Arc::new(FieldStore::new()), Default::default());
        ctx.store.insert(field_names::MARKER_POSITIONS_3D, Array2::<f64>::zeros((3, 3)));
        ctx.store.insert(field_names::MARKER_DISPLACEMENTS, Array2::<f64>::zeros((3, 3)));
        assert!(stage.process(&mut ctx).is_err());
    }
}
