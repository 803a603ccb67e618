// Copyright 2025 Optitact Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! These structs map to sections of `optitact_configuration.toml`: an identity
//! block that gates startup, the ordered stage list, per-field filter chains,
//! and the transport sinks.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root pipeline descriptor
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub identity: IdentityConfig,
    pub logging: LoggingConfig,
    /// Ordered list of stage entries; order is execution order
    pub stages: Vec<StageConfig>,
    pub sinks: Vec<SinkConfig>,
}

/// Identity block: gates startup but is otherwise opaque to the processing core
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub version: String,
    pub serial_number: String,
    pub license_key: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// When set, a rotated file log is written under this directory
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), log_dir: None }
    }
}

/// One stage entry: identity, worker count, stage-specific parameters, and
/// the ordered filter chain attached to named output fields
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StageConfig {
    pub name: String,
    pub threads: usize,
    pub config: toml::Table,
    pub filters: Vec<FilterConfig>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            threads: 1,
            config: toml::Table::new(),
            filters: Vec::new(),
        }
    }
}

impl StageConfig {
    /// Parses the untyped stage parameter table into a typed stage config,
    /// failing fast at startup instead of deep inside the frame loop.
    pub fn parse_params<T: serde::de::DeserializeOwned>(&self) -> crate::ConfigResult<T> {
        T::deserialize(toml::Value::Table(self.config.clone())).map_err(|e| {
            crate::ConfigError::ValidationError(format!(
                "Stage '{}' has invalid parameters: {}", self.name, e
            ))
        })
    }
}

/// One filter chain entry: `{name, field, params}`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    pub name: String,
    pub field: String,
    pub params: toml::Table,
}

impl FilterConfig {
    pub fn parse_params<T: serde::de::DeserializeOwned>(&self) -> crate::ConfigResult<T> {
        T::deserialize(toml::Value::Table(self.params.clone())).map_err(|e| {
            crate::ConfigError::ValidationError(format!(
                "Filter '{}' on field '{}' has invalid parameters: {}", self.name, self.field, e
            ))
        })
    }
}

/// One transport sink: remote address plus the ordered field schema
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    pub address: String,
    /// Bounded outbound queue depth; oldest packets are dropped under backpressure
    pub queue_capacity: usize,
    pub fields: Vec<SinkFieldConfig>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { address: String::new(), queue_capacity: 8, fields: Vec::new() }
    }
}

/// One wire schema entry: `{fieldName, wireType}`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkFieldConfig {
    pub name: String,
    /// `mat` or `f64`
    pub wire_type: String,
}
