//! Stage construction from configuration entries.

use optitact_config::StageConfig;
use optitact_structures::OptitactDataError;

use crate::calibration::{CalibrationManagerStage, SharedCalibration};
use crate::stage::PipelineStage;
use crate::stages::{
    ContactDetectorStage, DisplacementStage, ForceEstimatorStage, InputStage, MarkerTrackerStage,
    Reconstruction3dStage,
};

/// Builds one stage from its config entry. Parameter tables are parsed and
/// resource files loaded here, so a broken config fails before the first frame.
pub fn build_stage(
    config: &StageConfig,
    shared: &SharedCalibration,
) -> Result<Box<dyn PipelineStage>, OptitactDataError> {
    let bad = |e: optitact_config::ConfigError| OptitactDataError::BadParameters(e.to_string());

    match config.name.as_str() {
        "input" => Ok(Box::new(InputStage::new(config.parse_params().map_err(bad)?)?)),
        "marker_tracker" => Ok(Box::new(MarkerTrackerStage::new(
            config.parse_params().map_err(bad)?,
            config.threads,
            shared.clone(),
        )?)),
        "calibration" => Ok(Box::new(CalibrationManagerStage::new(
            config.parse_params().map_err(bad)?,
            shared.clone(),
        )?)),
        "reconstruction_3d" => Ok(Box::new(Reconstruction3dStage::new(
            config.parse_params().map_err(bad)?,
            shared.clone(),
        )?)),
        "displacement" => Ok(Box::new(DisplacementStage::new(
            config.parse_params().map_err(bad)?,
            shared.clone(),
        )?)),
        "contact_detector" => Ok(Box::new(ContactDetectorStage::new(
            config.parse_params().map_err(bad)?,
            shared.clone(),
        )?)),
        "force_estimator" => Ok(Box::new(ForceEstimatorStage::new(
            config.parse_params().map_err(bad)?,
            &config.filters,
            shared.clone(),
        )?)),
        other => Err(OptitactDataError::BadParameters(format!(
            "Unknown stage '{}'!", other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_stage_is_rejected() {
        let config = StageConfig { name: "fft".to_string(), ..Default::default() };
        assert!(build_stage(&config, &SharedCalibration::new()).is_err());
    }

    #[test]
    fn tracker_requires_marker_count() {
        let config = StageConfig { name: "marker_tracker".to_string(), ..Default::default() };
        // Default marker_count of zero must fail construction
        assert!(build_stage(&config, &SharedCalibration::new()).is_err());
    }

    #[test]
    fn input_stage_builds_from_defaults() {
        let config = StageConfig { name: "input".to_string(), ..Default::default() };
        let stage = build_stage(&config, &SharedCalibration::new()).unwrap();
        assert_eq!(stage.name(), "input");
    }
}
