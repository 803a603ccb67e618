// Copyright 2025 Optitact Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Ensures the pipeline descriptor is internally consistent before any stage
//! is constructed, so bad parameters fail at startup instead of mid-frame.

use std::path::{Path, PathBuf};

use crate::stages::{ContactParams, TrackerParams};
use crate::{ConfigError, ConfigResult, PipelineConfig};

/// Stage names the startup registry can bind. Validation rejects anything else.
pub const KNOWN_STAGE_NAMES: &[&str] = &[
    "input",
    "calibration",
    "marker_tracker",
    "reconstruction_3d",
    "displacement",
    "contact_detector",
    "force_estimator",
];

const KNOWN_WIRE_TYPES: &[&str] = &["mat", "f64"];
const KNOWN_FILTER_NAMES: &[&str] = &["temporal_mean", "spatial_mean", "bias_correction"];

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    UnknownName { kind: &'static str, name: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::UnknownName { kind, name } => {
                write!(f, "Unknown {} name: '{}'", kind, name)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete pipeline descriptor
///
/// Checks:
/// - identity block gates startup (non-empty license key)
/// - every stage name is known to the registry, with no duplicates
/// - per-stage thread counts are at least 1
/// - the tracker declares a positive marker count
/// - the contact detector names its sensitivity matrix, and the matrix has
///   one row per configured marker
/// - sink schemas are non-empty with known wire types
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &PipelineConfig) -> ConfigResult<()> {
    let mut errors: Vec<ConfigValidationError> = Vec::new();

    if config.identity.license_key.trim().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "identity.license_key".to_string(),
        });
    }

    if config.stages.is_empty() {
        errors.push(ConfigValidationError::MissingRequired { field: "stages".to_string() });
    }

    let mut tracker_marker_count: Option<usize> = None;
    let mut contact_sensitivity: Option<PathBuf> = None;

    let mut seen_names: Vec<&str> = Vec::new();
    for stage in &config.stages {
        if !KNOWN_STAGE_NAMES.contains(&stage.name.as_str()) {
            errors.push(ConfigValidationError::UnknownName {
                kind: "stage",
                name: stage.name.clone(),
            });
            continue;
        }
        if seen_names.contains(&stage.name.as_str()) {
            errors.push(ConfigValidationError::InvalidValue {
                field: format!("stages.{}", stage.name),
                reason: "stage appears more than once".to_string(),
            });
        }
        seen_names.push(stage.name.as_str());

        if stage.threads == 0 {
            errors.push(ConfigValidationError::InvalidValue {
                field: format!("stages.{}.threads", stage.name),
                reason: "thread count must be at least 1".to_string(),
            });
        }

        for filter in &stage.filters {
            if !KNOWN_FILTER_NAMES.contains(&filter.name.as_str()) {
                errors.push(ConfigValidationError::UnknownName {
                    kind: "filter",
                    name: filter.name.clone(),
                });
            }
            if filter.field.trim().is_empty() {
                errors.push(ConfigValidationError::MissingRequired {
                    field: format!("stages.{}.filters.field", stage.name),
                });
            }
        }

        match stage.name.as_str() {
            "marker_tracker" => {
                match stage.parse_params::<TrackerParams>() {
                    Ok(params) if params.marker_count == 0 => {
                        errors.push(ConfigValidationError::InvalidValue {
                            field: "stages.marker_tracker.marker_count".to_string(),
                            reason: "marker count must be positive".to_string(),
                        });
                    }
                    Ok(params) => tracker_marker_count = Some(params.marker_count),
                    Err(e) => errors.push(ConfigValidationError::InvalidValue {
                        field: "stages.marker_tracker".to_string(),
                        reason: e.to_string(),
                    }),
                }
            }
            "contact_detector" => {
                match stage.parse_params::<ContactParams>() {
                    Ok(params) if params.sensitivity_path.as_os_str().is_empty() => {
                        errors.push(ConfigValidationError::MissingRequired {
                            field: "stages.contact_detector.sensitivity_path".to_string(),
                        });
                    }
                    Ok(params) => contact_sensitivity = Some(params.sensitivity_path),
                    Err(e) => errors.push(ConfigValidationError::InvalidValue {
                        field: "stages.contact_detector".to_string(),
                        reason: e.to_string(),
                    }),
                }
            }
            _ => {}
        }
    }

    // The sensitivity matrix must cover exactly the configured marker set;
    // a mismatch here is a startup error, never a mid-frame one
    if let (Some(marker_count), Some(path)) = (tracker_marker_count, &contact_sensitivity) {
        match sensitivity_rows(path) {
            Ok(rows) if rows != marker_count => {
                errors.push(ConfigValidationError::InvalidValue {
                    field: "stages.contact_detector.sensitivity_path".to_string(),
                    reason: format!(
                        "sensitivity matrix has {} rows but the tracker is configured for {} markers",
                        rows, marker_count
                    ),
                });
            }
            Ok(_) => {}
            Err(reason) => errors.push(ConfigValidationError::InvalidValue {
                field: "stages.contact_detector.sensitivity_path".to_string(),
                reason,
            }),
        }
    }

    for (sink_index, sink) in config.sinks.iter().enumerate() {
        if sink.address.trim().is_empty() {
            errors.push(ConfigValidationError::MissingRequired {
                field: format!("sinks[{}].address", sink_index),
            });
        }
        if sink.fields.is_empty() {
            errors.push(ConfigValidationError::MissingRequired {
                field: format!("sinks[{}].fields", sink_index),
            });
        }
        if sink.queue_capacity == 0 {
            errors.push(ConfigValidationError::InvalidValue {
                field: format!("sinks[{}].queue_capacity", sink_index),
                reason: "queue capacity must be at least 1".to_string(),
            });
        }
        for field in &sink.fields {
            if !KNOWN_WIRE_TYPES.contains(&field.wire_type.as_str()) {
                errors.push(ConfigValidationError::UnknownName {
                    kind: "wire type",
                    name: field.wire_type.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        let listing = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");
        Err(ConfigError::ValidationError(listing))
    }
}

/// Counts the data rows of a whitespace-text matrix file.
fn sensitivity_rows(path: &Path) -> Result<usize, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("unable to read sensitivity matrix '{}': {}", path.display(), e))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SinkConfig, SinkFieldConfig, StageConfig};

    fn valid_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.identity.license_key = "key".to_string();
        config.stages.push(StageConfig { name: "input".to_string(), ..Default::default() });
        config
    }

    #[test]
    fn accepts_minimal_valid_descriptor() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn rejects_unknown_stage_name() {
        let mut config = valid_config();
        config.stages.push(StageConfig { name: "telepathy".to_string(), ..Default::default() });
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("telepathy"));
    }

    #[test]
    fn rejects_duplicate_stage() {
        let mut config = valid_config();
        config.stages.push(StageConfig { name: "input".to_string(), ..Default::default() });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_zero_threads() {
        let mut config = valid_config();
        config.stages[0].threads = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_bad_sink_schema() {
        let mut config = valid_config();
        config.sinks.push(SinkConfig {
            address: "tcp://127.0.0.1:5600".to_string(),
            queue_capacity: 8,
            fields: vec![SinkFieldConfig {
                name: "resultant_force".to_string(),
                wire_type: "matrix".to_string(), // must be "mat"
            }],
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_sensitivity_row_count_mismatch() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensitivity.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        for _ in 0..4 {
            writeln!(file, "1.0 1.0 1.0").unwrap();
        }

        let mut config = valid_config();
        config.stages.push(StageConfig {
            name: "marker_tracker".to_string(),
            config: toml::Table::from_iter([(
                "marker_count".to_string(),
                toml::Value::Integer(2),
            )]),
            ..Default::default()
        });
        config.stages.push(StageConfig {
            name: "contact_detector".to_string(),
            config: toml::Table::from_iter([(
                "sensitivity_path".to_string(),
                toml::Value::String(path.display().to_string()),
            )]),
            ..Default::default()
        });

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("4 rows"), "{}", err);

        // Four configured markers match the file and pass
        config.stages[1].config =
            toml::Table::from_iter([("marker_count".to_string(), toml::Value::Integer(4))]);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rejects_unreadable_sensitivity_file() {
        let mut config = valid_config();
        config.stages.push(StageConfig {
            name: "marker_tracker".to_string(),
            config: toml::Table::from_iter([(
                "marker_count".to_string(),
                toml::Value::Integer(2),
            )]),
            ..Default::default()
        });
        config.stages.push(StageConfig {
            name: "contact_detector".to_string(),
            config: toml::Table::from_iter([(
                "sensitivity_path".to_string(),
                toml::Value::String("/nonexistent/sensitivity.txt".to_string()),
            )]),
            ..Default::default()
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_zero_marker_count() {
        let mut config = valid_config();
        config.stages.push(StageConfig {
            name: "marker_tracker".to_string(),
            ..Default::default()
        });
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("marker count"));
    }
}
