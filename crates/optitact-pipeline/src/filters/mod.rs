//! Per-field filter chains.
//!
//! Filters attach to named stage output fields through configuration and run
//! in configured order. Each filter owns whatever history it needs; the
//! pipeline hands it one field value per frame.

use optitact_config::{ConfigError, ConfigResult, FilterConfig};
use optitact_structures::FieldValue;
use optitact_structures::OptitactDataError;

use ndarray::Array2;

mod bias_correction;
mod spatial_mean;
mod temporal_mean;

pub use bias_correction::BiasCorrectionFilter;
pub use spatial_mean::SpatialMeanFilter;
pub use temporal_mean::TemporalMeanFilter;

/// Frame-scoped read-only inputs a filter may consult beyond its own field.
pub struct FilterContext<'a> {
    /// Current 3D marker positions, N x 3
    pub positions: &'a Array2<f64>,
}

pub trait FieldFilter: Send {
    fn name(&self) -> &'static str;

    /// Consumes the field value and returns the filtered replacement.
    fn apply(
        &mut self,
        ctx: &FilterContext<'_>,
        value: FieldValue,
    ) -> Result<FieldValue, OptitactDataError>;
}

/// Instantiates a filter from its config entry. Unknown names are rejected
/// here and during config validation; this is the second line of defense.
pub fn build_filter(config: &FilterConfig) -> ConfigResult<Box<dyn FieldFilter>> {
    match config.name.as_str() {
        "temporal_mean" => Ok(Box::new(TemporalMeanFilter::new(config.parse_params()?))),
        "spatial_mean" => Ok(Box::new(SpatialMeanFilter::new(config.parse_params()?))),
        "bias_correction" => Ok(Box::new(BiasCorrectionFilter::new(config.parse_params()?))),
        other => Err(ConfigError::ValidationError(format!("Unknown filter '{}'!", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_all_known_filters() {
        for name in ["temporal_mean", "spatial_mean", "bias_correction"] {
            let config = FilterConfig {
                name: name.to_string(),
                field: "marker_forces".to_string(),
                params: toml::Table::new(),
            };
            assert!(build_filter(&config).is_ok(), "{} failed to build", name);
        }
    }

    #[test]
    fn registry_rejects_unknown_filters() {
        let config = FilterConfig { name: "kalman".to_string(), ..Default::default() };
        assert!(build_filter(&config).is_err());
    }
}
