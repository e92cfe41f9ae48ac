//! File helpers shared by in-process operations.
//!
//! Voxel data exchanged with in-process confound operations is a
//! tab-separated matrix without a header: one row per voxel, one column
//! per volume. Masks are single-column matrices of zeros and ones.

use fmriprep_workflow::{PortValues, RunError, require};
use ndarray::{Array2, ArrayView2};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

/// Port naming the directory in-process operations write to.
pub const OUT_DIR: &str = "out_dir";

/// Reads a path-valued input.
pub(crate) fn path_input(inputs: &PortValues, port: &str) -> Result<PathBuf, RunError> {
    require(inputs, port)?
        .as_str()
        .map(PathBuf::from)
        .ok_or_else(|| invalid(port, "expected a path"))
}

/// Reads an optional path-valued input.
pub(crate) fn optional_path(inputs: &PortValues, port: &str) -> Option<PathBuf> {
    inputs.get(port).and_then(JsonValue::as_str).map(PathBuf::from)
}

/// Reads a list of paths; a single path counts as a one-element list.
pub(crate) fn paths_input(inputs: &PortValues, port: &str) -> Result<Vec<PathBuf>, RunError> {
    match require(inputs, port)? {
        JsonValue::String(path) => Ok(vec![PathBuf::from(path)]),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(PathBuf::from)
                    .ok_or_else(|| invalid(port, "expected a list of paths"))
            })
            .collect(),
        _ => Err(invalid(port, "expected a path or a list of paths")),
    }
}

/// Reads an optional non-negative integer, defaulting to zero.
pub(crate) fn count_input(inputs: &PortValues, port: &str) -> Result<usize, RunError> {
    match inputs.get(port) {
        None | Some(JsonValue::Null) => Ok(0),
        Some(value) => value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| invalid(port, "expected a non-negative integer")),
    }
}

/// Directory outputs go to: `out_dir` if given, else the directory of
/// the file on `source_port`.
pub(crate) fn output_dir(inputs: &PortValues, source_port: &str) -> PathBuf {
    optional_path(inputs, OUT_DIR)
        .or_else(|| {
            optional_path(inputs, source_port)
                .and_then(|p| p.parent().map(Path::to_path_buf))
        })
        .unwrap_or_else(|| PathBuf::from("."))
}

pub(crate) fn read_text(path: &Path) -> Result<String, RunError> {
    std::fs::read_to_string(path).map_err(|e| io_failure(path, &e))
}

pub(crate) fn write_text(path: &Path, text: &str) -> Result<(), RunError> {
    std::fs::write(path, text).map_err(|e| io_failure(path, &e))
}

/// Reads a headerless tab-separated matrix.
pub(crate) fn read_matrix(path: &Path) -> Result<Array2<f64>, RunError> {
    let file = std::fs::File::open(path).map_err(|e| io_failure(path, &e))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_reader(file);

    let mut values = Vec::new();
    let mut rows = 0;
    for record in reader.records() {
        let record = record.map_err(|e| malformed(path, &e.to_string()))?;
        for cell in &record {
            let value = if cell == "n/a" {
                f64::NAN
            } else {
                cell.trim()
                    .parse::<f64>()
                    .map_err(|e| malformed(path, &format!("'{cell}': {e}")))?
            };
            values.push(value);
        }
        rows += 1;
    }
    let cols = if rows == 0 { 0 } else { values.len() / rows };
    Array2::from_shape_vec((rows, cols), values).map_err(|e| malformed(path, &e.to_string()))
}

/// Writes a headerless tab-separated matrix.
pub(crate) fn write_matrix(path: &Path, matrix: ArrayView2<'_, f64>) -> Result<(), RunError> {
    let file = std::fs::File::create(path).map_err(|e| io_failure(path, &e))?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(file);
    for row in matrix.rows() {
        writer
            .write_record(row.iter().map(|v| if v.is_nan() { "n/a".to_string() } else { v.to_string() }))
            .map_err(|e| malformed(path, &e.to_string()))?;
    }
    writer.flush().map_err(|e| io_failure(path, &e))
}

/// Reads a single-column mask; any non-zero value selects the voxel.
pub(crate) fn read_mask(path: &Path) -> Result<Vec<bool>, RunError> {
    let matrix = read_matrix(path)?;
    Ok(matrix.rows().into_iter().map(|row| row.iter().any(|v| *v != 0.0)).collect())
}

/// Converts `NaN` to JSON `null`.
pub(crate) fn json_number(value: f64) -> JsonValue {
    if value.is_finite() {
        JsonValue::from(value)
    } else {
        JsonValue::Null
    }
}

pub(crate) fn path_value(path: &Path) -> JsonValue {
    JsonValue::from(path.to_string_lossy().into_owned())
}

pub(crate) fn invalid(port: &str, reason: &str) -> RunError {
    RunError::InvalidInput {
        port: port.to_string(),
        reason: reason.to_string(),
    }
}

fn io_failure(path: &Path, err: &std::io::Error) -> RunError {
    RunError::Failed {
        reason: format!("{}: {err}", path.display()),
    }
}

fn malformed(path: &Path, reason: &str) -> RunError {
    RunError::Failed {
        reason: format!("{}: {reason}", path.display()),
    }
}
