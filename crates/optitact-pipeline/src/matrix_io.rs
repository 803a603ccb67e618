//! Plain-text matrix loading for the sensitivity and stiffness files.

use std::path::Path;

use ndarray::Array2;
use optitact_structures::OptitactDataError;

/// Loads a whitespace-separated text matrix. Every row must have the same
/// number of columns; anything else is an error, surfaced at startup.
pub fn load_matrix(path: &Path) -> Result<Array2<f64>, OptitactDataError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        OptitactDataError::BadParameters(format!(
            "Unable to read matrix file '{}': {}", path.display(), e
        ))
    })?;
    parse_matrix(&content).map_err(|e| {
        OptitactDataError::BadParameters(format!(
            "Malformed matrix file '{}': {}", path.display(), e
        ))
    })
}

fn parse_matrix(content: &str) -> Result<Array2<f64>, String> {
    let mut values: Vec<f64> = Vec::new();
    let mut cols: Option<usize> = None;
    let mut rows = 0usize;

    for (line_number, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let row: Result<Vec<f64>, _> = trimmed.split_whitespace().map(str::parse::<f64>).collect();
        let row = row.map_err(|e| format!("line {}: {}", line_number + 1, e))?;
        match cols {
            None => cols = Some(row.len()),
            Some(expected) if expected != row.len() => {
                return Err(format!(
                    "line {}: expected {} columns but found {}",
                    line_number + 1, expected, row.len()
                ));
            }
            Some(_) => {}
        }
        values.extend(row);
        rows += 1;
    }

    let cols = cols.ok_or_else(|| "file contains no data rows".to_string())?;
    Array2::from_shape_vec((rows, cols), values).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_rows_and_skips_comments() {
        let matrix = parse_matrix("# weights\n1 2 3\n4 5 6\n\n7 8 9\n").unwrap();
        assert_eq!(matrix.dim(), (3, 3));
        assert_eq!(matrix[(2, 1)], 8.0);
    }

    #[test]
    fn rejects_ragged_rows() {
        assert!(parse_matrix("1 2 3\n4 5\n").is_err());
    }

    #[test]
    fn rejects_empty_file() {
        assert!(parse_matrix("# only a comment\n").is_err());
    }

    #[test]
    fn load_matrix_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "0.5 0.5 1.0").unwrap();
        writeln!(file, "0.25 0.25 2.0").unwrap();

        let matrix = load_matrix(&path).unwrap();
        assert_eq!(matrix.dim(), (2, 3));
        assert_eq!(matrix[(1, 2)], 2.0);

        assert!(load_matrix(&dir.path().join("missing.txt")).is_err());
    }
}
