//! Motion parameters and framewise displacement.
//!
//! Every realignment tool writes its six parameters in its own order and
//! units. They are normalised to `X Y Z RotX RotY RotZ`: translations in
//! millimetres, rotations in radians.

use crate::error::SignalError;
use ndarray::{Array2, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};

/// Column names of normalised motion parameters.
pub const MOTION_COLUMNS: [&str; 6] = ["X", "Y", "Z", "RotX", "RotY", "RotZ"];

/// Head radius used to turn rotations into displacements (Power et al.).
pub const FD_RADIUS_MM: f64 = 50.0;

/// The tool that wrote a motion parameter file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionSource {
    /// `RotX RotY RotZ X Y Z`, radians and millimetres (MCFLIRT).
    #[default]
    Fsl,
    /// `X Y Z RotX RotY RotZ`, millimetres and radians.
    Spm,
    /// `roll pitch yaw dS dL dP`, degrees and millimetres (3dvolreg).
    Afni,
}

/// Parses whitespace-separated rows of numbers.
///
/// # Errors
///
/// Returns [`SignalError::InvalidParameter`] for a non-numeric token and
/// [`SignalError::ShapeMismatch`] for ragged rows.
pub fn parse_motion_text(text: &str) -> Result<Array2<f64>, SignalError> {
    let mut values = Vec::new();
    let mut n_rows = 0;
    let mut width = None;

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let row = line
            .split_whitespace()
            .map(|token| {
                token.parse::<f64>().map_err(|e| SignalError::InvalidParameter {
                    name: "motion parameters".to_string(),
                    reason: format!("'{token}': {e}"),
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let expected = *width.get_or_insert(row.len());
        if row.len() != expected {
            return Err(SignalError::ShapeMismatch {
                what: format!("motion parameter row {}", n_rows + 1),
                expected,
                found: row.len(),
            });
        }
        values.extend(row);
        n_rows += 1;
    }

    let width = width.unwrap_or(6);
    Array2::from_shape_vec((n_rows, width), values).map_err(|e| SignalError::InvalidParameter {
        name: "motion parameters".to_string(),
        reason: e.to_string(),
    })
}

/// Reorders and rescales raw parameters (volumes × 6) to `X Y Z RotX RotY RotZ`.
///
/// # Errors
///
/// Returns [`SignalError::ShapeMismatch`] unless there are six columns.
pub fn normalize_motion(
    params: ArrayView2<'_, f64>,
    source: MotionSource,
) -> Result<Array2<f64>, SignalError> {
    if params.ncols() != 6 {
        return Err(SignalError::ShapeMismatch {
            what: "motion parameter columns".to_string(),
            expected: 6,
            found: params.ncols(),
        });
    }

    let mut out = Array2::zeros((params.nrows(), 6));
    match source {
        MotionSource::Spm => out.assign(&params),
        MotionSource::Fsl => {
            out.slice_mut(s![.., 0..3]).assign(&params.slice(s![.., 3..6]));
            out.slice_mut(s![.., 3..6]).assign(&params.slice(s![.., 0..3]));
        }
        MotionSource::Afni => {
            // roll/pitch/yaw rotate about the z/x/y axes; dS/dL/dP translate along z/x/y.
            for (mut row, raw) in out.axis_iter_mut(Axis(0)).zip(params.axis_iter(Axis(0))) {
                row[0] = raw[4];
                row[1] = raw[5];
                row[2] = raw[3];
                row[3] = raw[1].to_radians();
                row[4] = raw[2].to_radians();
                row[5] = raw[0].to_radians();
            }
        }
    }
    Ok(out)
}

/// Framewise displacement (Power et al. 2012) of normalised parameters.
///
/// Returns one value per volume transition, `volumes − 1` in total.
///
/// # Errors
///
/// Returns [`SignalError::ShapeMismatch`] unless there are six columns.
pub fn framewise_displacement(
    params: ArrayView2<'_, f64>,
    radius_mm: f64,
) -> Result<Vec<f64>, SignalError> {
    if params.ncols() != 6 {
        return Err(SignalError::ShapeMismatch {
            what: "motion parameter columns".to_string(),
            expected: 6,
            found: params.ncols(),
        });
    }

    Ok((1..params.nrows())
        .map(|t| {
            let delta = &params.row(t) - &params.row(t - 1);
            let translation: f64 = delta.slice(s![0..3]).iter().map(|d| d.abs()).sum();
            let rotation: f64 = delta.slice(s![3..6]).iter().map(|d| d.abs()).sum();
            translation + radius_mm * rotation
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn fsl_rotations_move_to_the_back() {
        let raw = array![[0.01, 0.02, 0.03, 1.0, 2.0, 3.0]];
        let norm = normalize_motion(raw.view(), MotionSource::Fsl).expect("normalize");
        assert_eq!(norm, array![[1.0, 2.0, 3.0, 0.01, 0.02, 0.03]]);
    }

    #[test]
    fn afni_degrees_become_radians() {
        let raw = array![[90.0, 0.0, 0.0, 3.0, 1.0, 2.0]];
        let norm = normalize_motion(raw.view(), MotionSource::Afni).expect("normalize");
        assert_eq!(norm[[0, 0]], 1.0);
        assert_eq!(norm[[0, 2]], 3.0);
        assert!((norm[[0, 5]] - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn rejects_wrong_width() {
        let raw = Array2::<f64>::zeros((3, 5));
        assert!(normalize_motion(raw.view(), MotionSource::Spm).is_err());
    }

    #[test]
    fn framewise_displacement_power() {
        let params = array![
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [1.0, -1.0, 0.0, 0.01, 0.0, 0.0],
            [1.0, -1.0, 0.0, 0.01, 0.0, 0.0],
        ];
        let fd = framewise_displacement(params.view(), FD_RADIUS_MM).expect("fd");
        assert_eq!(fd.len(), 2);
        assert!((fd[0] - 2.5).abs() < 1e-12);
        assert!(fd[1].abs() < 1e-12);
    }

    #[test]
    fn parse_text_rows() {
        let parsed = parse_motion_text("0 0 0 1 2 3\n0.1 0 0 1 2 3\n\n").expect("parse");
        assert_eq!(parsed.dim(), (2, 6));
        let err = parse_motion_text("0 0 0 1 2 3\n0 0 0\n").unwrap_err();
        assert!(matches!(err, SignalError::ShapeMismatch { .. }));
        assert!(parse_motion_text("a b c d e f").is_err());
    }
}
