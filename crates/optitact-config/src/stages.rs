// Copyright 2025 Optitact Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed per-stage parameter structs.
//!
//! Each stage's untyped `config` table is parsed into one of these exactly
//! once at startup via [`crate::StageConfig::parse_params`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `input` stage parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InputParams {
    /// `directory` or `synthetic`; camera devices plug in behind the same seam
    pub source: String,
    /// Frame directory for the `directory` source
    pub path: Option<PathBuf>,
    /// Target frame rate ceiling in Hz; 0 disables pacing
    pub fps_limit: f64,
    /// Discard the first K frames while the hardware settles
    pub skip_first: u64,
    /// Process every Mth frame
    pub step: u64,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl Default for InputParams {
    fn default() -> Self {
        Self {
            source: "synthetic".to_string(),
            path: None,
            fps_limit: 0.0,
            skip_first: 0,
            step: 1,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }
}

/// Which side of the background the markers sit on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerPolarity {
    MarkersDark,
    MarkersLight,
}

/// `marker_tracker` stage parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerParams {
    pub marker_count: usize,
    /// Foreground threshold on the background-subtracted luminance
    pub threshold: f64,
    pub polarity: MarkerPolarity,
    pub blur_radius: usize,
    /// Contours under this pixel area are rejected as noise
    pub min_area: usize,
    /// Spatial matching grid divisions
    pub div_x: usize,
    pub div_y: usize,
    /// Per-cell candidate depth bound for the matcher
    pub max_cell_candidates: usize,
    /// Aggregate frame-to-frame movement above this flags the frame bad
    pub movement_range: f64,
    pub discard_bad_frames: bool,
    /// Skips the blur pass and narrows the match search
    pub fast_mode: bool,
    pub dynamic_compensation: DynamicCompensationParams,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            marker_count: 0,
            threshold: 30.0,
            polarity: MarkerPolarity::MarkersDark,
            blur_radius: 1,
            min_area: 4,
            div_x: 8,
            div_y: 8,
            max_cell_candidates: 8,
            movement_range: 200.0,
            discard_bad_frames: true,
            fast_mode: false,
            dynamic_compensation: DynamicCompensationParams::default(),
        }
    }
}

/// Periodic background re-estimation to counter lighting drift
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DynamicCompensationParams {
    pub enabled: bool,
    /// Re-estimate every this many frames
    pub interval: u64,
    /// Blocks per image side for the offset grid
    pub blocks: usize,
    /// An estimated offset beyond this falls back to the static background
    pub max_offset: f64,
}

impl Default for DynamicCompensationParams {
    fn default() -> Self {
        Self { enabled: false, interval: 30, blocks: 4, max_offset: 40.0 }
    }
}

/// `reconstruction_3d` stage parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconstructionParams {
    /// Calibration target dimensions in cells
    pub grid_cols: usize,
    pub grid_rows: usize,
    /// Physical size of one target cell in millimetres
    pub cell_size_mm: f64,
    /// Nominal sensor-to-camera distance in millimetres
    pub working_distance_mm: f64,
    /// Trailing moving-average window over 3D positions
    pub smooth_window: usize,
}

impl Default for ReconstructionParams {
    fn default() -> Self {
        Self {
            grid_cols: 0,
            grid_rows: 0,
            cell_size_mm: 1.0,
            working_distance_mm: 20.0,
            smooth_window: 3,
        }
    }
}

/// `displacement` stage parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplacementParams {
    /// Frames averaged into the reference baseline during calibration
    pub baseline_window: usize,
    /// Consecutive no-contact frames required before drift correction engages
    pub drift_delay: u32,
    /// Per-frame weight nudging the baseline toward the current position
    pub drift_weight: f64,
}

impl Default for DisplacementParams {
    fn default() -> Self {
        Self { baseline_window: 10, drift_delay: 30, drift_weight: 0.01 }
    }
}

/// `contact_detector` stage parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContactParams {
    /// Path to the N x 3 sensitivity/weight matrix; missing or malformed is fatal
    pub sensitivity_path: PathBuf,
    pub threshold: f64,
    /// Consecutive frames on the other side of the threshold before the state flips
    pub debounce: u32,
}

impl Default for ContactParams {
    fn default() -> Self {
        Self { sensitivity_path: PathBuf::new(), threshold: 0.05, debounce: 5 }
    }
}

/// `force_estimator` stage parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForceParams {
    /// Optional N x 3 per-marker stiffness matrix; absent means uniform stiffness
    pub stiffness_path: Option<PathBuf>,
    /// Uniform stiffness used when no matrix file is configured
    pub stiffness: f64,
    /// Per-axis scale calibration factors
    pub scale: [f64; 3],
}

impl Default for ForceParams {
    fn default() -> Self {
        Self { stiffness_path: None, stiffness: 1.0, scale: [1.0, 1.0, 1.0] }
    }
}

/// `calibration` stage parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CalibrationParams {
    /// Frames in the startup calibration window
    pub warmup_frames: u64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self { warmup_frames: 30 }
    }
}
