//! 2D marker detection and tracking ("DMP").
//!
//! Segments markers against a smoothed background model, extracts contours,
//! and matches them to the previous frame's marker positions through a
//! spatial grid so matching stays linear in the candidate count.

use ndarray::{Array2, Zip};
use tracing::{debug, warn};

use optitact_config::stages::{MarkerPolarity, TrackerParams};
use optitact_structures::data::{box_blur, ImageFrame};
use optitact_structures::OptitactDataError;

use crate::calibration::{CalibrationPhase, CalibrationState, SharedCalibration};
use crate::context::FrameContext;
use crate::field_names;
use crate::stage::{PipelineStage, StageOutcome};

/// Blur radius for the background illumination model. Wide enough to wash the
/// markers out of the model so they reappear in the foreground difference.
const BACKGROUND_BLUR_RADIUS: usize = 9;

pub struct MarkerTrackerStage {
    params: TrackerParams,
    shared: SharedCalibration,
    pool: Option<rayon::ThreadPool>,
    /// Per-pixel sum and frame count accumulated during the warmup window
    background_accum: Option<(Array2<f64>, u64)>,
    finalized: bool,
    /// N x 2, marker identity is the row index
    prev_positions: Option<Array2<f64>>,
    frames_processed: u64,
}

impl MarkerTrackerStage {
    pub fn new(params: TrackerParams, threads: usize, shared: SharedCalibration) -> Result<Self, OptitactDataError> {
        if params.marker_count == 0 {
            return Err(OptitactDataError::BadParameters("Marker count must be positive!".into()));
        }
        if params.div_x == 0 || params.div_y == 0 {
            return Err(OptitactDataError::BadParameters("Matching grid divisions must be positive!".into()));
        }
        let pool = if threads > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| OptitactDataError::InternalError(e.to_string()))?,
            )
        } else {
            None
        };
        Ok(MarkerTrackerStage {
            params,
            shared,
            pool,
            background_accum: None,
            finalized: false,
            prev_positions: None,
            frames_processed: 0,
        })
    }

    fn foreground(&self, gray: &Array2<f64>, background: &Array2<f64>) -> Array2<f64> {
        let polarity = self.params.polarity;
        let diff = |bg: &f64, px: &f64| match polarity {
            MarkerPolarity::MarkersDark => bg - px,
            MarkerPolarity::MarkersLight => px - bg,
        };
        match &self.pool {
            Some(pool) => pool.install(|| {
                Zip::from(background).and(gray).par_map_collect(|bg, px| diff(bg, px).max(0.0))
            }),
            None => Zip::from(background).and(gray).map_collect(|bg, px| diff(bg, px).max(0.0)),
        }
    }

    fn detect_centroids(&self, gray: &Array2<f64>, background: &Array2<f64>) -> (Vec<(f64, f64)>, Array2<u8>) {
        let mut foreground = self.foreground(gray, background);
        if !self.params.fast_mode && self.params.blur_radius > 0 {
            foreground = box_blur(&foreground, self.params.blur_radius);
        }
        let mask = foreground.mapv(|v| v > self.params.threshold);
        let centroids = extract_centroids(&mask, self.params.min_area);
        let mask_u8 = mask.mapv(|m| if m { 255u8 } else { 0u8 });
        (centroids, mask_u8)
    }

    /// Establishes the background model and the initial marker ordering from
    /// the accumulated warmup frames. A centroid count that does not match
    /// the configured marker count is fatal.
    fn finalize_calibration(&mut self, snapshot: &CalibrationState) -> Result<(), OptitactDataError> {
        let (sum, count) = self.background_accum.take().ok_or_else(|| {
            OptitactDataError::InternalError("Calibration finished before any frame was seen!".into())
        })?;
        let mean = sum.mapv(|v| v / count as f64);
        let background = box_blur(&mean, BACKGROUND_BLUR_RADIUS);

        let (centroids, _) = self.detect_centroids(&mean, &background);
        if centroids.len() != self.params.marker_count {
            return Err(OptitactDataError::BadParameters(format!(
                "Calibration found {} markers but {} are configured!",
                centroids.len(),
                self.params.marker_count
            )));
        }

        let baseline = order_row_major(centroids, self.params.marker_count);
        self.prev_positions = Some(baseline.clone());

        let mut next = snapshot.clone();
        next.background = Some(background);
        next.baseline_2d = Some(baseline);
        self.shared.install(next);
        self.finalized = true;
        debug!(markers = self.params.marker_count, "Marker baseline established");
        Ok(())
    }

    /// Periodic background re-estimation over a coarse block grid. Offsets
    /// beyond the configured bound reject the whole update and keep the
    /// static model installed.
    fn dynamic_compensation(&self, gray: &Array2<f64>, snapshot: &CalibrationState) {
        let Some(background) = snapshot.background.as_ref() else { return };
        let blocks = self.params.dynamic_compensation.blocks.max(1);
        let (h, w) = gray.dim();
        let block_h = (h + blocks - 1) / blocks;
        let block_w = (w + blocks - 1) / blocks;

        let mut offsets = Array2::<f64>::zeros((blocks, blocks));
        for by in 0..blocks {
            for bx in 0..blocks {
                let y_range = (by * block_h)..((by + 1) * block_h).min(h);
                let x_range = (bx * block_w)..((bx + 1) * block_w).min(w);
                let mut sum = 0.0;
                let mut count = 0usize;
                for y in y_range.clone() {
                    for x in x_range.clone() {
                        sum += gray[(y, x)] - background[(y, x)];
                        count += 1;
                    }
                }
                if count > 0 {
                    offsets[(by, bx)] = sum / count as f64;
                }
            }
        }

        let worst = offsets.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        if worst > self.params.dynamic_compensation.max_offset {
            warn!(
                worst_offset = worst,
                bound = self.params.dynamic_compensation.max_offset,
                "Dynamic compensation out of bounds, keeping static background"
            );
            return;
        }

        let mut adjusted = background.clone();
        for y in 0..h {
            for x in 0..w {
                adjusted[(y, x)] += offsets[(y / block_h.max(1), x / block_w.max(1))];
            }
        }
        let mut next = snapshot.clone();
        next.background = Some(adjusted);
        self.shared.install(next);
        debug!(worst_offset = worst, "Background model recompensated");
    }
}

impl PipelineStage for MarkerTrackerStage {
    fn name(&self) -> &'static str {
        "marker_tracker"
    }

    fn declared_inputs(&self) -> &'static [&'static str] {
        &[field_names::RAW_IMAGE]
    }

    fn declared_outputs(&self) -> &'static [&'static str] {
        &[field_names::MARKER_POSITIONS_2D, field_names::FRAME_OK, field_names::TRACKER_MASK]
    }

    fn process(&mut self, ctx: &mut FrameContext) -> Result<StageOutcome, OptitactDataError> {
        let image = ctx.store.get_image(field_names::RAW_IMAGE)?;
        let gray = image.to_grayscale();
        let (height, width) = gray.dim();
        let snapshot = self.shared.snapshot();
        self.frames_processed += 1;

        match snapshot.phase {
            CalibrationPhase::Warming => {
                match &mut self.background_accum {
                    Some((sum, count)) => {
                        if sum.dim() != gray.dim() {
                            return Err(OptitactDataError::BadParameters(format!(
                                "Frame resolution changed mid-run: {}x{} vs {}x{}!",
                                gray.dim().0, gray.dim().1, sum.dim().0, sum.dim().1
                            )));
                        }
                        *sum += &gray;
                        *count += 1;
                    }
                    None => self.background_accum = Some((gray.clone(), 1)),
                }
                // Relaxed gating: identities are not established yet
                ctx.store.insert(
                    field_names::MARKER_POSITIONS_2D,
                    Array2::<f64>::zeros((self.params.marker_count, 2)),
                );
                ctx.store.insert(field_names::FRAME_OK, 1.0);
                ctx.store.insert(field_names::TRACKER_MASK, blank_mask(height, width)?);
                Ok(StageOutcome::Advance)
            }
            CalibrationPhase::Ready => {
                if !self.finalized {
                    self.finalize_calibration(&snapshot)?;
                }
                // Re-read: finalize_calibration may have installed a new snapshot
                let snapshot = self.shared.snapshot();
                let background = snapshot.background.as_ref().ok_or_else(|| {
                    OptitactDataError::InternalError("Ready phase without a background model!".into())
                })?;

                if self.params.dynamic_compensation.enabled
                    && self.frames_processed % self.params.dynamic_compensation.interval.max(1) == 0
                {
                    self.dynamic_compensation(&gray, &snapshot);
                }

                let (centroids, mask) = self.detect_centroids(&gray, background);
                let prev = self.prev_positions.as_ref().ok_or_else(|| {
                    OptitactDataError::InternalError("Tracking without a baseline!".into())
                })?;

                let (matched, movement) = match_markers(
                    prev,
                    &centroids,
                    width,
                    height,
                    &self.params,
                );

                if movement > self.params.movement_range {
                    debug!(frame = ctx.frame_index(), movement, "Movement range exceeded, frame flagged bad");
                    if self.params.discard_bad_frames {
                        return Ok(StageOutcome::DiscardFrame);
                    }
                    // Republish the previous positions unchanged
                    ctx.store.insert(field_names::MARKER_POSITIONS_2D, prev.clone());
                    ctx.store.insert(field_names::FRAME_OK, 0.0);
                    ctx.store.insert(field_names::TRACKER_MASK, mask_to_image(&mask)?);
                    return Ok(StageOutcome::Advance);
                }

                self.prev_positions = Some(matched.clone());
                ctx.store.insert(field_names::MARKER_POSITIONS_2D, matched);
                ctx.store.insert(field_names::FRAME_OK, 1.0);
                ctx.store.insert(field_names::TRACKER_MASK, mask_to_image(&mask)?);
                Ok(StageOutcome::Advance)
            }
        }
    }
}

fn blank_mask(height: usize, width: usize) -> Result<ImageFrame, OptitactDataError> {
    ImageFrame::new(height, width, 1)
}

fn mask_to_image(mask: &Array2<u8>) -> Result<ImageFrame, OptitactDataError> {
    let (h, w) = mask.dim();
    ImageFrame::from_raw(mask.iter().copied().collect(), h, w, 1)
}

/// Connected-component extraction over a boolean mask. Flood fill with an
/// explicit stack; components under `min_area` are rejected as noise.
fn extract_centroids(mask: &Array2<bool>, min_area: usize) -> Vec<(f64, f64)> {
    let (h, w) = mask.dim();
    let mut visited = Array2::<bool>::from_elem((h, w), false);
    let mut centroids = Vec::new();
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if !mask[(y, x)] || visited[(y, x)] {
                continue;
            }
            stack.push((y, x));
            visited[(y, x)] = true;
            let mut area = 0usize;
            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            while let Some((cy, cx)) = stack.pop() {
                area += 1;
                sum_x += cx as f64;
                sum_y += cy as f64;
                let neighbors = [
                    (cy.wrapping_sub(1), cx),
                    (cy + 1, cx),
                    (cy, cx.wrapping_sub(1)),
                    (cy, cx + 1),
                ];
                for (ny, nx) in neighbors {
                    if ny < h && nx < w && mask[(ny, nx)] && !visited[(ny, nx)] {
                        visited[(ny, nx)] = true;
                        stack.push((ny, nx));
                    }
                }
            }
            if area >= min_area {
                centroids.push((sum_x / area as f64, sum_y / area as f64));
            }
        }
    }
    centroids
}

/// Sorts centroids into stable row-major identity order. Rows are quantized
/// by the expected marker pitch so small vertical jitter cannot reorder them.
fn order_row_major(mut centroids: Vec<(f64, f64)>, marker_count: usize) -> Array2<f64> {
    let pitch_estimate = if centroids.len() > 1 {
        let min_x = centroids.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
        let max_x = centroids.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
        let min_y = centroids.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
        let max_y = centroids.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);
        let span = ((max_x - min_x).max(1.0) * (max_y - min_y).max(1.0)) / centroids.len() as f64;
        span.sqrt()
    } else {
        1.0
    };
    let row_of = |y: f64| (y / (pitch_estimate * 0.75).max(1.0)).round() as i64;
    centroids.sort_by(|a, b| {
        (row_of(a.1), a.0).partial_cmp(&(row_of(b.1), b.0)).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut baseline = Array2::<f64>::zeros((marker_count, 2));
    for (index, (x, y)) in centroids.into_iter().enumerate() {
        baseline[(index, 0)] = x;
        baseline[(index, 1)] = y;
    }
    baseline
}

/// Grid-bucketed nearest-neighbor matching of candidates to previous marker
/// positions. Returns the matched N x 2 positions and the aggregate movement.
fn match_markers(
    prev: &Array2<f64>,
    candidates: &[(f64, f64)],
    width: usize,
    height: usize,
    params: &TrackerParams,
) -> (Array2<f64>, f64) {
    let div_x = params.div_x;
    let div_y = params.div_y;
    let cell_w = (width as f64 / div_x as f64).max(1.0);
    let cell_h = (height as f64 / div_y as f64).max(1.0);

    let cell_of = |x: f64, y: f64| -> (usize, usize) {
        let cx = ((x / cell_w) as usize).min(div_x - 1);
        let cy = ((y / cell_h) as usize).min(div_y - 1);
        (cx, cy)
    };

    let mut cells: Vec<Vec<usize>> = vec![Vec::new(); div_x * div_y];
    for (index, (x, y)) in candidates.iter().enumerate() {
        let (cx, cy) = cell_of(*x, *y);
        let cell = &mut cells[cy * div_x + cx];
        if cell.len() < params.max_cell_candidates {
            cell.push(index);
        }
    }

    let mut taken = vec![false; candidates.len()];
    let mut matched = prev.clone();
    let mut movement = 0.0;

    for marker in 0..prev.nrows() {
        let px = prev[(marker, 0)];
        let py = prev[(marker, 1)];
        let (cx, cy) = cell_of(px, py);

        let mut best: Option<(usize, f64)> = None;
        let reach: i64 = if params.fast_mode { 0 } else { 1 };
        for dy in -reach..=reach {
            for dx in -reach..=reach {
                let nx = cx as i64 + dx;
                let ny = cy as i64 + dy;
                if nx < 0 || ny < 0 || nx >= div_x as i64 || ny >= div_y as i64 {
                    continue;
                }
                for &candidate in &cells[ny as usize * div_x + nx as usize] {
                    if taken[candidate] {
                        continue;
                    }
                    let (qx, qy) = candidates[candidate];
                    let dist = ((qx - px).powi(2) + (qy - py).powi(2)).sqrt();
                    if best.map_or(true, |(_, d)| dist < d) {
                        best = Some((candidate, dist));
                    }
                }
            }
        }

        if let Some((candidate, dist)) = best {
            taken[candidate] = true;
            matched[(marker, 0)] = candidates[candidate].0;
            matched[(marker, 1)] = candidates[candidate].1;
            movement += dist;
        }
        // Unmatched markers keep their previous position
    }

    (matched, movement)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&[u8]]) -> Array2<bool> {
        let h = rows.len();
        let w = rows[0].len();
        Array2::from_shape_fn((h, w), |(y, x)| rows[y][x] != 0)
    }

    #[test]
    fn centroids_reject_small_areas() {
        let mask = mask_from(&[
            &[1, 1, 0, 0, 0],
            &[1, 1, 0, 0, 1],
            &[0, 0, 0, 0, 0],
        ]);
        let centroids = extract_centroids(&mask, 2);
        assert_eq!(centroids.len(), 1);
        assert!((centroids[0].0 - 0.5).abs() < 1e-9);
        assert!((centroids[0].1 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn row_major_order_is_stable_under_jitter() {
        let centroids = vec![(10.0, 10.2), (20.0, 9.8), (10.0, 20.1), (20.0, 19.9)];
        let ordered = order_row_major(centroids, 4);
        assert_eq!(ordered[(0, 0)], 10.0);
        assert_eq!(ordered[(1, 0)], 20.0);
        assert_eq!(ordered[(2, 0)], 10.0);
        assert_eq!(ordered[(3, 0)], 20.0);
    }

    #[test]
    fn matching_preserves_identity() {
        let prev = ndarray::array![[10.0, 10.0], [30.0, 10.0]];
        // Candidates listed in swapped order; identity must follow proximity
        let candidates = vec![(31.0, 10.0), (11.0, 10.0)];
        let params = TrackerParams { marker_count: 2, ..Default::default() };
        let (matched, movement) = match_markers(&prev, &candidates, 64, 64, &params);
        assert_eq!(matched[(0, 0)], 11.0);
        assert_eq!(matched[(1, 0)], 31.0);
        assert!((movement - 2.0).abs() < 1e-9);
    }

    #[test]
    fn unmatched_marker_keeps_previous_position() {
        let prev = ndarray::array![[10.0, 10.0], [50.0, 50.0]];
        let candidates = vec![(10.5, 10.0)];
        let params = TrackerParams { marker_count: 2, ..Default::default() };
        let (matched, _) = match_markers(&prev, &candidates, 64, 64, &params);
        assert_eq!(matched[(1, 0)], 50.0);
        assert_eq!(matched[(1, 1)], 50.0);
    }

    #[test]
    fn fast_mode_narrows_the_match_search() {
        // With an 8x8 grid over 64 px the cells are 8 px wide; the candidate
        // sits one cell to the right of the previous position
        let prev = ndarray::array![[10.0, 10.0]];
        let candidates = vec![(17.0, 10.0)];

        let wide = TrackerParams { marker_count: 1, ..Default::default() };
        let (matched, _) = match_markers(&prev, &candidates, 64, 64, &wide);
        assert_eq!(matched[(0, 0)], 17.0);

        let fast = TrackerParams { marker_count: 1, fast_mode: true, ..Default::default() };
        let (matched, movement) = match_markers(&prev, &candidates, 64, 64, &fast);
        assert_eq!(matched[(0, 0)], 10.0, "out-of-cell candidate must not match");
        assert_eq!(movement, 0.0);
    }

    fn ready_with_background(level: f64) -> (SharedCalibration, std::sync::Arc<CalibrationState>) {
        let shared = SharedCalibration::new();
        shared.install(CalibrationState {
            phase: CalibrationPhase::Ready,
            background: Some(Array2::from_elem((16, 16), level)),
            baseline_2d: None,
        });
        let snapshot = shared.snapshot();
        (shared, snapshot)
    }

    fn compensating_stage(shared: SharedCalibration, max_offset: f64) -> MarkerTrackerStage {
        let params = TrackerParams {
            marker_count: 1,
            dynamic_compensation: optitact_config::stages::DynamicCompensationParams {
                enabled: true,
                interval: 1,
                blocks: 2,
                max_offset,
            },
            ..Default::default()
        };
        MarkerTrackerStage::new(params, 1, shared).unwrap()
    }

    #[test]
    fn dynamic_compensation_reinstalls_a_shifted_background() {
        let (shared, snapshot) = ready_with_background(100.0);
        let stage = compensating_stage(shared.clone(), 40.0);

        // Uniform +10 luminance drift, well inside the offset bound
        let gray = Array2::from_elem((16, 16), 110.0);
        stage.dynamic_compensation(&gray, &snapshot);

        let background = shared.snapshot().background.clone().unwrap();
        for value in background.iter() {
            assert!((value - 110.0).abs() < 1e-9, "background not recompensated: {}", value);
        }
    }

    #[test]
    fn dynamic_compensation_out_of_bounds_keeps_the_static_background() {
        let (shared, snapshot) = ready_with_background(100.0);
        let stage = compensating_stage(shared.clone(), 40.0);

        // A +100 jump exceeds max_offset; the whole update is rejected
        let gray = Array2::from_elem((16, 16), 200.0);
        stage.dynamic_compensation(&gray, &snapshot);

        let background = shared.snapshot().background.clone().unwrap();
        for value in background.iter() {
            assert!((value - 100.0).abs() < 1e-9, "static background was replaced: {}", value);
        }
    }
}
