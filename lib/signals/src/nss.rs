//! Detection of non-steady-state volumes at the start of a run.
//!
//! The global signal of the first volumes is scored with the modified
//! z-score `0.6745·|x − median| / MAD`; the leading run of volumes above
//! the threshold is reported.

use crate::stats::median;
use ndarray::{Array2, ArrayView2, Axis};

/// Number of leading volumes inspected.
pub const NSS_WINDOW: usize = 50;

/// Modified z-score above which a volume is an outlier.
pub const NSS_THRESHOLD: f64 = 3.5;

/// Counts the leading non-steady-state volumes of `data` (voxels × time).
#[must_use]
pub fn detect_non_steady_state(data: ArrayView2<'_, f64>) -> usize {
    let window = data.ncols().min(NSS_WINDOW);
    if data.nrows() == 0 || window == 0 {
        return 0;
    }
    let global: Vec<f64> = (0..window)
        .map(|t| data.column(t).mean().unwrap_or(f64::NAN))
        .collect();
    leading_outliers(&global, NSS_THRESHOLD)
}

/// Counts how many leading points have a modified z-score above `threshold`.
#[must_use]
pub fn leading_outliers(points: &[f64], threshold: f64) -> usize {
    let center = median(points);
    let deviations: Vec<f64> = points.iter().map(|p| (p - center).abs()).collect();
    let mad = median(&deviations);
    if !mad.is_finite() || mad <= 0.0 {
        return 0;
    }
    deviations
        .iter()
        .take_while(|d| 0.6745 * **d / mad > threshold)
        .count()
}

/// One indicator column per non-steady-state volume (volumes × count).
#[must_use]
pub fn non_steady_state_columns(n_volumes: usize, count: usize) -> Array2<f64> {
    let mut columns = Array2::zeros((n_volumes, count));
    for (k, mut column) in columns.axis_iter_mut(Axis(1)).enumerate() {
        if k < n_volumes {
            column[k] = 1.0;
        }
    }
    columns
}

/// Column names `NonSteadyState00`, ...
#[must_use]
pub fn non_steady_state_names(count: usize) -> Vec<String> {
    (0..count).map(|k| format!("NonSteadyState{k:02}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with_spikes(spikes: &[f64], steady: usize) -> Array2<f64> {
        let n = spikes.len() + steady;
        Array2::from_shape_fn((4, n), |(v, t)| {
            let base = 100.0 + v as f64 + if t % 2 == 0 { 0.5 } else { -0.5 };
            spikes.get(t).copied().unwrap_or(base)
        })
    }

    #[test]
    fn detects_leading_spikes() {
        let data = run_with_spikes(&[400.0, 250.0], 98);
        assert_eq!(detect_non_steady_state(data.view()), 2);
    }

    #[test]
    fn steady_run_has_none() {
        let data = run_with_spikes(&[], 100);
        assert_eq!(detect_non_steady_state(data.view()), 0);
    }

    #[test]
    fn late_outliers_are_ignored() {
        let mut points = vec![100.0, 101.0, 99.0, 100.0, 101.0, 99.0];
        points.push(500.0);
        assert_eq!(leading_outliers(&points, NSS_THRESHOLD), 0);
    }

    #[test]
    fn indicator_columns() {
        let columns = non_steady_state_columns(5, 2);
        assert_eq!(columns.column(0).to_vec(), vec![1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(columns.column(1).to_vec(), vec![0.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(non_steady_state_names(2), vec!["NonSteadyState00", "NonSteadyState01"]);
    }
}
