//! Helpers for marker-indexed matrices.
//!
//! Every marker-indexed field in the pipeline is an N x D matrix whose row
//! order is the stable marker identity. These helpers keep the shape checks
//! and row conversions in one place.

use ndarray::Array2;

use crate::data::Vec3;
use crate::OptitactDataError;

/// Verifies a marker matrix has exactly the expected shape.
pub fn ensure_shape(matrix: &Array2<f64>, markers: usize, dims: usize, what: &str) -> Result<(), OptitactDataError> {
    if matrix.nrows() != markers || matrix.ncols() != dims {
        return Err(OptitactDataError::FieldContract(format!(
            "{} must be {}x{} but is {}x{}!",
            what, markers, dims, matrix.nrows(), matrix.ncols()
        )));
    }
    Ok(())
}

/// Reads row `index` of an N x 3 matrix as a [`Vec3`].
pub fn row3(matrix: &Array2<f64>, index: usize) -> Vec3 {
    Vec3::new(matrix[(index, 0)], matrix[(index, 1)], matrix[(index, 2)])
}
