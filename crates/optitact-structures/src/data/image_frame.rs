use ndarray::{Array2, Array3, Axis};

use crate::OptitactDataError;

// NOTE -> (0,0) is in the top left corner!

/// A raw image buffer in height x width x channels memory order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    pixels: Array3<u8>, // HeightsWidthsChannels
}

impl ImageFrame {
    /// Creates a new zero-filled frame.
    pub fn new(height: usize, width: usize, channels: usize) -> Result<ImageFrame, OptitactDataError> {
        if height == 0 || width == 0 || !(1..=4).contains(&channels) {
            return Err(OptitactDataError::BadParameters(format!(
                "Invalid image dimensions {}x{}x{}!", height, width, channels
            )));
        }
        Ok(ImageFrame { pixels: Array3::zeros((height, width, channels)) })
    }

    /// Wraps an existing raw buffer. The buffer length must equal
    /// height * width * channels.
    pub fn from_raw(buffer: Vec<u8>, height: usize, width: usize, channels: usize) -> Result<ImageFrame, OptitactDataError> {
        if buffer.len() != height * width * channels {
            return Err(OptitactDataError::BadParameters(format!(
                "Raw buffer of {} bytes does not match {}x{}x{}!",
                buffer.len(), height, width, channels
            )));
        }
        let pixels = Array3::from_shape_vec((height, width, channels), buffer)
            .map_err(|e| OptitactDataError::InternalError(e.to_string()))?;
        Ok(ImageFrame { pixels })
    }

    /// Decodes PNG/JPEG bytes into an RGB frame.
    pub fn from_encoded_bytes(bytes: &[u8]) -> Result<ImageFrame, OptitactDataError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| OptitactDataError::DeserializationError(format!("Unable to decode image: {}", e)))?
            .into_rgb8();
        let (width, height) = (decoded.width() as usize, decoded.height() as usize);
        ImageFrame::from_raw(decoded.into_raw(), height, width, 3)
    }

    pub fn height(&self) -> usize {
        self.pixels.shape()[0]
    }

    pub fn width(&self) -> usize {
        self.pixels.shape()[1]
    }

    pub fn channels(&self) -> usize {
        self.pixels.shape()[2]
    }

    pub fn get_internal_data(&self) -> &Array3<u8> {
        &self.pixels
    }

    pub fn get_internal_data_mut(&mut self) -> &mut Array3<u8> {
        &mut self.pixels
    }

    /// Mirrors the frame left-to-right.
    pub fn flip_horizontal(&mut self) {
        self.pixels.invert_axis(Axis(1));
    }

    /// Mirrors the frame top-to-bottom.
    pub fn flip_vertical(&mut self) {
        self.pixels.invert_axis(Axis(0));
    }

    /// Collapses the frame to a single luminance plane in [0, 255].
    pub fn to_grayscale(&self) -> Array2<f64> {
        let (h, w, c) = (self.height(), self.width(), self.channels());
        let mut out = Array2::<f64>::zeros((h, w));
        for y in 0..h {
            for x in 0..w {
                let value = match c {
                    1 => self.pixels[(y, x, 0)] as f64,
                    _ => {
                        // Rec. 601 luma weights
                        0.299 * self.pixels[(y, x, 0)] as f64
                            + 0.587 * self.pixels[(y, x, 1)] as f64
                            + 0.114 * self.pixels[(y, x, 2)] as f64
                    }
                };
                out[(y, x)] = value;
            }
        }
        out
    }
}

/// Separable box blur over a luminance plane. A radius of zero returns the
/// input unchanged.
pub fn box_blur(plane: &Array2<f64>, radius: usize) -> Array2<f64> {
    if radius == 0 {
        return plane.clone();
    }
    let (h, w) = plane.dim();
    let mut horizontal = Array2::<f64>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(w - 1);
            let mut sum = 0.0;
            for xi in lo..=hi {
                sum += plane[(y, xi)];
            }
            horizontal[(y, x)] = sum / (hi - lo + 1) as f64;
        }
    }
    let mut out = Array2::<f64>::zeros((h, w));
    for y in 0..h {
        let lo_y = y.saturating_sub(radius);
        let hi_y = (y + radius).min(h - 1);
        for x in 0..w {
            let mut sum = 0.0;
            for yi in lo_y..=hi_y {
                sum += horizontal[(yi, x)];
            }
            out[(y, x)] = sum / (hi_y - lo_y + 1) as f64;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_rejects_bad_length() {
        assert!(ImageFrame::from_raw(vec![0u8; 10], 2, 2, 3).is_err());
        assert!(ImageFrame::from_raw(vec![0u8; 12], 2, 2, 3).is_ok());
    }

    #[test]
    fn flips_mirror_pixels() {
        let mut frame = ImageFrame::from_raw(vec![1, 2, 3, 4], 2, 2, 1).unwrap();
        frame.flip_horizontal();
        assert_eq!(frame.get_internal_data()[(0, 0, 0)], 2);
        frame.flip_vertical();
        assert_eq!(frame.get_internal_data()[(0, 0, 0)], 4);
    }

    #[test]
    fn box_blur_preserves_constant_plane() {
        let plane = Array2::from_elem((5, 5), 42.0);
        let blurred = box_blur(&plane, 2);
        for value in blurred.iter() {
            assert!((value - 42.0).abs() < 1e-12);
        }
    }
}
