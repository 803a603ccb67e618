// Copyright 2025 Optitact Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Optitact Configuration System
//!
//! Type-safe loader for the pipeline descriptor:
//! - TOML file parsing
//! - Environment variable overrides
//! - Fail-fast validation at startup
//!
//! ## Usage
//!
//! ```rust,no_run
//! use optitact_config::load_config;
//!
//! let config = load_config(None).expect("Failed to load config");
//! println!("Stages: {}", config.stages.len());
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod loader;
pub mod stages;
pub mod types;
pub mod validation;

pub use loader::{apply_environment_overrides, find_config_file, load_config};
pub use types::*;
pub use validation::{validate_config, ConfigValidationError, KNOWN_STAGE_NAMES};

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found. Searched: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Configuration validation failed:\n{0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
