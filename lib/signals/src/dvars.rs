//! DVARS: the spatial RMS of the temporal derivative.
//!
//! Follows Nichols' standardisation: the series is scaled so the median
//! voxel mean is 1000, each voxel's expected derivative spread is
//! estimated from a robust standard deviation and its lag-1
//! autocorrelation, and DVARS is reported raw, standardised, and
//! voxel-wise standardised.

use crate::error::SignalError;
use crate::stats::{mean, median, robust_std};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Target of intensity normalisation.
const NORMALIZED_MEDIAN: f64 = 1000.0;

/// Voxels whose robust spread falls below this are excluded.
const MIN_ROBUST_STD: f64 = 1e-10;

/// DVARS series, one value per volume transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dvars {
    /// Standardised DVARS.
    pub std: Vec<f64>,
    /// Raw DVARS after intensity normalisation.
    pub nonstd: Vec<f64>,
    /// Voxel-wise standardised DVARS.
    pub vxstd: Vec<f64>,
}

/// Computes DVARS of `data` (voxels × time).
///
/// # Errors
///
/// Returns [`SignalError::Empty`] when fewer than two volumes are given or
/// no voxel has a usable signal.
pub fn compute_dvars(data: ArrayView2<'_, f64>) -> Result<Dvars, SignalError> {
    if data.ncols() < 2 {
        return Err(SignalError::Empty {
            what: "DVARS time series".to_string(),
        });
    }

    let voxel_means: Vec<f64> = data
        .axis_iter(Axis(0))
        .map(|row| row.mean().unwrap_or(0.0))
        .collect();
    let center = median(&voxel_means);
    let scale = if center.abs() > f64::EPSILON {
        NORMALIZED_MEDIAN / center
    } else {
        1.0
    };

    let mut kept: Vec<Vec<f64>> = Vec::new();
    let mut diff_sdhat = Vec::new();
    for row in data.axis_iter(Axis(0)) {
        let series: Vec<f64> = row.iter().map(|v| v * scale).collect();
        if series.iter().any(|v| !v.is_finite()) {
            continue;
        }
        let sd = robust_std(&series);
        if sd < MIN_ROBUST_STD {
            continue;
        }
        diff_sdhat.push((2.0 * (1.0 - lag_one_autocorrelation(&series))).sqrt() * sd);
        kept.push(series);
    }

    if kept.is_empty() {
        return Err(SignalError::Empty {
            what: "DVARS voxel set".to_string(),
        });
    }
    debug!(voxels = kept.len(), dropped = data.nrows() - kept.len(), "computing DVARS");

    let transitions = data.ncols() - 1;
    let diffs = Array2::from_shape_fn((kept.len(), transitions), |(v, t)| {
        kept[v][t + 1] - kept[v][t]
    });
    let sdhat_mean = mean(&diff_sdhat);

    let mut dvars = Dvars {
        std: Vec::with_capacity(transitions),
        nonstd: Vec::with_capacity(transitions),
        vxstd: Vec::with_capacity(transitions),
    };
    for column in diffs.axis_iter(Axis(1)) {
        let n = column.len() as f64;
        let nonstd = (column.iter().map(|d| d * d).sum::<f64>() / n).sqrt();
        let vxstd = (column
            .iter()
            .zip(&diff_sdhat)
            .map(|(d, sd)| if *sd > 0.0 { (d / sd).powi(2) } else { 0.0 })
            .sum::<f64>()
            / n)
            .sqrt();
        dvars.nonstd.push(nonstd);
        dvars.std.push(nonstd / sdhat_mean);
        dvars.vxstd.push(vxstd);
    }
    Ok(dvars)
}

fn lag_one_autocorrelation(series: &[f64]) -> f64 {
    let mu = mean(series);
    let centered: Vec<f64> = series.iter().map(|v| v - mu).collect();
    let denom: f64 = centered.iter().map(|v| v * v).sum();
    if denom <= 0.0 {
        return 0.0;
    }
    let numer: f64 = centered.windows(2).map(|w| w[0] * w[1]).sum();
    (numer / denom).clamp(-1.0, 1.0)
}
