//! Frame acquisition.
//!
//! Camera/frame-grabber drivers are external collaborators; they plug in
//! behind [`FrameSource`]. The stage itself owns pacing, skip/step handling,
//! and the deterministic geometric transforms.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use optitact_config::stages::InputParams;
use optitact_structures::data::ImageFrame;
use optitact_structures::OptitactDataError;

use crate::context::FrameContext;
use crate::field_names;
use crate::stage::{PipelineStage, StageOutcome};

/// Synchronous frame producer. `Ok(None)` is a transient failure: the stage
/// discards the frame and downstream holds its previous values.
pub trait FrameSource: Send {
    fn acquire_frame(&mut self) -> Result<Option<ImageFrame>, OptitactDataError>;
}

/// Replays image files from a directory in filename order.
pub struct DirectorySource {
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectorySource {
    /// An unreadable directory is fatal: the pipeline cannot start without
    /// its input source.
    pub fn new(path: &Path) -> Result<Self, OptitactDataError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)
            .map_err(|e| {
                OptitactDataError::BadParameters(format!(
                    "Input source directory '{}' is unavailable: {}", path.display(), e
                ))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(OptitactDataError::BadParameters(format!(
                "Input source directory '{}' contains no frames!", path.display()
            )));
        }
        Ok(DirectorySource { files, next: 0 })
    }
}

impl FrameSource for DirectorySource {
    fn acquire_frame(&mut self) -> Result<Option<ImageFrame>, OptitactDataError> {
        if self.next >= self.files.len() {
            // Replay from the start so directory sources behave like a
            // continuous camera feed
            debug!("Frame directory exhausted, replay wrapped");
            self.next = 0;
        }
        let path = &self.files[self.next];
        self.next += 1;
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Transient frame read failure");
                return Ok(None);
            }
        };
        match ImageFrame::from_encoded_bytes(&bytes) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Undecodable frame skipped");
                Ok(None)
            }
        }
    }
}

/// Renders a grid of dark dots on a light background, all dots shifted by a
/// shared offset. Used for bench runs and tests.
pub struct SyntheticSource {
    cols: usize,
    rows: usize,
    spacing: f64,
    radius: f64,
    background_level: u8,
    dot_level: u8,
    offset: Arc<Mutex<(f64, f64)>>,
}

impl SyntheticSource {
    pub fn new(cols: usize, rows: usize, spacing: f64, radius: f64) -> Self {
        SyntheticSource {
            cols,
            rows,
            spacing,
            radius,
            background_level: 200,
            dot_level: 30,
            offset: Arc::new(Mutex::new((0.0, 0.0))),
        }
    }

    /// Shared handle controlling the dot offset of subsequent frames.
    pub fn offset_handle(&self) -> Arc<Mutex<(f64, f64)>> {
        self.offset.clone()
    }

    fn render(&self) -> Result<ImageFrame, OptitactDataError> {
        let margin = self.spacing;
        let width = (2.0 * margin + (self.cols - 1) as f64 * self.spacing).ceil() as usize + 1;
        let height = (2.0 * margin + (self.rows - 1) as f64 * self.spacing).ceil() as usize + 1;
        let (dx, dy) = *self.offset.lock();

        let mut frame = ImageFrame::new(height, width, 1)?;
        let pixels = frame.get_internal_data_mut();
        pixels.fill(self.background_level);

        let radius_sq = self.radius * self.radius;
        for row in 0..self.rows {
            for col in 0..self.cols {
                let cx = margin + col as f64 * self.spacing + dx;
                let cy = margin + row as f64 * self.spacing + dy;
                let x_lo = (cx - self.radius).floor().max(0.0) as usize;
                let x_hi = ((cx + self.radius).ceil() as usize).min(width - 1);
                let y_lo = (cy - self.radius).floor().max(0.0) as usize;
                let y_hi = ((cy + self.radius).ceil() as usize).min(height - 1);
                for y in y_lo..=y_hi {
                    for x in x_lo..=x_hi {
                        let ddx = x as f64 - cx;
                        let ddy = y as f64 - cy;
                        if ddx * ddx + ddy * ddy <= radius_sq {
                            pixels[(y, x, 0)] = self.dot_level;
                        }
                    }
                }
            }
        }
        Ok(frame)
    }
}

impl FrameSource for SyntheticSource {
    fn acquire_frame(&mut self) -> Result<Option<ImageFrame>, OptitactDataError> {
        Ok(Some(self.render()?))
    }
}

/// The `input` stage.
pub struct InputStage {
    params: InputParams,
    source: Box<dyn FrameSource>,
    startup_skip_done: bool,
    last_emit: Option<Instant>,
}

impl InputStage {
    pub fn new(params: InputParams) -> Result<Self, OptitactDataError> {
        let source: Box<dyn FrameSource> = match params.source.as_str() {
            "directory" => {
                let path = params.path.as_deref().ok_or_else(|| {
                    OptitactDataError::BadParameters(
                        "Input source 'directory' requires a path!".into(),
                    )
                })?;
                Box::new(DirectorySource::new(path)?)
            }
            "synthetic" => Box::new(SyntheticSource::new(8, 8, 12.0, 3.0)),
            other => {
                return Err(OptitactDataError::BadParameters(format!(
                    "Unknown input source kind '{}'!", other
                )));
            }
        };
        Ok(Self::with_source(params, source))
    }

    /// Plugs in an externally constructed source (device drivers, tests).
    pub fn with_source(params: InputParams, source: Box<dyn FrameSource>) -> Self {
        InputStage { params, source, startup_skip_done: false, last_emit: None }
    }

    fn pace(&mut self) {
        if self.params.fps_limit <= 0.0 {
            return;
        }
        let min_interval = Duration::from_secs_f64(1.0 / self.params.fps_limit);
        if let Some(last) = self.last_emit {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                std::thread::sleep(min_interval - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());
    }
}

impl PipelineStage for InputStage {
    fn name(&self) -> &'static str {
        "input"
    }

    fn declared_inputs(&self) -> &'static [&'static str] {
        &[]
    }

    fn declared_outputs(&self) -> &'static [&'static str] {
        &[field_names::RAW_IMAGE]
    }

    fn process(&mut self, ctx: &mut FrameContext) -> Result<StageOutcome, OptitactDataError> {
        if !self.startup_skip_done {
            // Let the hardware settle before trusting anything it produces
            for _ in 0..self.params.skip_first {
                let _ = self.source.acquire_frame()?;
            }
            self.startup_skip_done = true;
        }

        // Process every Mth frame
        for _ in 1..self.params.step.max(1) {
            let _ = self.source.acquire_frame()?;
        }

        self.pace();

        let Some(mut frame) = self.source.acquire_frame()? else {
            debug!(frame = ctx.frame_index(), "No frame available, discarding tick");
            return Ok(StageOutcome::DiscardFrame);
        };

        if self.params.flip_horizontal {
            frame.flip_horizontal();
        }
        if self.params.flip_vertical {
            frame.flip_vertical();
        }

        ctx.store.insert(field_names::RAW_IMAGE, frame);
        Ok(StageOutcome::Advance)
    }
}
