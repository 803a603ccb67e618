// Copyright 2025 Optitact Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! Loading order:
//! 1. TOML file (base descriptor)
//! 2. Environment variables (runtime overrides)

use crate::{validate_config, ConfigError, ConfigResult, PipelineConfig};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "optitact_configuration.toml";

/// Find the Optitact configuration file
///
/// Search order:
/// 1. `OPTITACT_CONFIG_PATH` environment variable
/// 2. Current working directory: `./optitact_configuration.toml`
/// 3. Parent directories (up to 5 levels)
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("OPTITACT_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        } else {
            return Err(ConfigError::FileNotFound(format!(
                "Config file specified by OPTITACT_CONFIG_PATH not found: {}",
                path.display()
            )));
        }
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.clone();
        for _ in 0..5 {
            if let Some(parent) = current.parent() {
                search_paths.push(parent.join(CONFIG_FILE_NAME));
                current = parent.to_path_buf();
            }
        }
    }

    for path in &search_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "Optitact configuration file '{}' not found in any of these locations:\n{}\n\nSet OPTITACT_CONFIG_PATH environment variable to specify a custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load and validate the pipeline descriptor
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, the file is searched for.
///
/// # Errors
///
/// Returns an error if the file is not found, contains invalid TOML, or fails
/// validation - all of which abort startup.
pub fn load_config(config_path: Option<&Path>) -> ConfigResult<PipelineConfig> {
    let config_file = if let Some(path) = config_path {
        path.to_path_buf()
    } else {
        find_config_file()?
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: PipelineConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `OPTITACT_LOG_LEVEL` -> `logging.level`
/// - `OPTITACT_LICENSE_KEY` -> `identity.license_key`
/// - `OPTITACT_SINK_ADDRESS` -> address of the first configured sink
pub fn apply_environment_overrides(config: &mut PipelineConfig) {
    if let Ok(value) = env::var("OPTITACT_LOG_LEVEL") {
        config.logging.level = value;
    }
    if let Ok(value) = env::var("OPTITACT_LICENSE_KEY") {
        config.identity.license_key = value;
    }
    if let Ok(value) = env::var("OPTITACT_SINK_ADDRESS") {
        if let Some(sink) = config.sinks.first_mut() {
            sink.address = value;
        }
    }
}
