// Copyright 2025 Optitact Contributors
// SPDX-License-Identifier: Apache-2.0

//! Unified logging initialization for Optitact
//!
//! Provides console logging with env-filter support and optional rotated
//! file logging per run.

use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::Utc;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Keeps the non-blocking file writer alive for the process lifetime.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Get the log directory path, when file logging is enabled
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Initialize logging with console output and optional file output
///
/// When `log_dir` is set, a timestamped run folder is created:
/// ```text
/// ./logs/
///   └── run_20250101_120000/
///       └── optitact.log
/// ```
///
/// # Arguments
/// * `level` - Base level filter, overridable via `OPTITACT_LOG`
/// * `log_dir` - Base directory for file logs; `None` disables file logging
pub fn init_logging(level: &str, log_dir: Option<PathBuf>) -> Result<LoggingGuard> {
    let env_filter = EnvFilter::try_from_env("OPTITACT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    let mut file_guard = None;
    let mut run_folder = None;
    let file_layer = if let Some(base_log_dir) = log_dir {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let folder = base_log_dir.join(format!("run_{}", timestamp));
        std::fs::create_dir_all(&folder)
            .with_context(|| format!("Failed to create log directory: {}", folder.display()))?;

        let file_appender = rolling::daily(&folder, "optitact.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        file_guard = Some(guard);
        run_folder = Some(folder);

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .boxed(),
        )
    } else {
        None
    };

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install the global tracing subscriber")?;

    Ok(LoggingGuard { _file_guard: file_guard, log_dir: run_folder })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_reports_disabled_file_logging() {
        let guard = LoggingGuard { _file_guard: None, log_dir: None };
        assert!(guard.log_dir().is_none());
    }
}
