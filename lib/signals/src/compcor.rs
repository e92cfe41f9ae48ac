//! Component-based noise correction.
//!
//! Both flavours share one decomposition: the masked voxel time series
//! are cleaned of drift (a constant plus the cosine basis), variance
//! normalised, and the leading left singular vectors of the result are
//! returned as regressors. Temporal CompCor picks its voxels with
//! [`high_variance_mask`]; anatomical CompCor uses an eroded tissue mask.

use crate::cosine::{COSINE_CUTOFF_SECONDS, cosine_columns, cosine_count};
use crate::error::{CompCorError, SignalError};
use crate::stats::percentile;
use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default number of components kept.
pub const DEFAULT_COMPONENTS: usize = 6;

/// Default share of highest-variance voxels kept by temporal CompCor.
pub const DEFAULT_VARIANCE_FRACTION: f64 = 0.05;

/// Jacobi sweeps allowed before the decomposition reports
/// [`CompCorError::NotConverged`].
const MAX_SWEEPS: usize = 100;

/// Smallest pivot accepted by the drift regression, and the relative
/// off-diagonal norm (scaled by the Frobenius norm of the covariance) at
/// which the Jacobi iteration counts as converged.
const PIVOT_EPSILON: f64 = 1e-12;

/// CompCor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompCor {
    pub n_components: usize,
    /// Leading volumes excluded from the fit and zero-filled in the output.
    pub ignore_initial_volumes: usize,
    pub repetition_time: f64,
}

/// Components (volumes × components) and their share of variance.
#[derive(Debug, Clone, PartialEq)]
pub struct CompCorResult {
    pub components: Array2<f64>,
    pub variance_explained: Vec<f64>,
}

impl CompCorResult {
    /// Column names with the given prefix, e.g. `a_comp_cor_00`.
    #[must_use]
    pub fn names(&self, prefix: &str) -> Vec<String> {
        (0..self.components.ncols())
            .map(|k| format!("{prefix}{k:02}"))
            .collect()
    }
}

impl CompCor {
    #[must_use]
    pub fn new(repetition_time: f64) -> Self {
        Self {
            n_components: DEFAULT_COMPONENTS,
            ignore_initial_volumes: 0,
            repetition_time,
        }
    }

    #[must_use]
    pub fn with_components(mut self, n: usize) -> Self {
        self.n_components = n;
        self
    }

    #[must_use]
    pub fn ignoring(mut self, volumes: usize) -> Self {
        self.ignore_initial_volumes = volumes;
        self
    }

    /// All-`NaN` components for a run of `volumes`, one column per
    /// component the decomposition would have returned.
    #[must_use]
    pub fn sentinel(&self, volumes: usize) -> CompCorResult {
        let n = self
            .n_components
            .min(volumes.saturating_sub(self.ignore_initial_volumes));
        CompCorResult {
            components: Array2::from_elem((volumes, n), f64::NAN),
            variance_explained: vec![f64::NAN; n],
        }
    }

    /// Computes components from the voxels of `data` (voxels × time)
    /// selected by `mask`.
    ///
    /// An empty mask yields all-`NaN` components.
    ///
    /// # Errors
    ///
    /// Returns [`CompCorError::NonFinite`], [`CompCorError::Singular`] or
    /// [`CompCorError::NotConverged`] on numerical trouble, and
    /// [`CompCorError::Signal`] for malformed inputs.
    pub fn compute(
        &self,
        data: ArrayView2<'_, f64>,
        mask: &[bool],
    ) -> Result<CompCorResult, CompCorError> {
        if mask.len() != data.nrows() {
            return Err(SignalError::ShapeMismatch {
                what: "CompCor mask".to_string(),
                expected: data.nrows(),
                found: mask.len(),
            }
            .into());
        }
        let volumes = data.ncols();
        if self.ignore_initial_volumes >= volumes {
            return Err(SignalError::InvalidParameter {
                name: "ignore_initial_volumes".to_string(),
                reason: format!("{} of {volumes} volumes", self.ignore_initial_volumes),
            }
            .into());
        }

        let kept = volumes - self.ignore_initial_volumes;
        let n = self.n_components.min(kept);
        let rows: Vec<usize> = (0..mask.len()).filter(|&v| mask[v]).collect();
        if rows.is_empty() {
            return Ok(self.sentinel(volumes));
        }

        // time × voxels
        let mut y = data
            .select(Axis(0), &rows)
            .slice(s![.., self.ignore_initial_volumes..])
            .t()
            .to_owned();
        if y.iter().any(|v| !v.is_finite()) {
            return Err(CompCorError::NonFinite);
        }

        // The drift basis spans the kept volumes; its size follows the run.
        let design = drift_design(
            kept,
            cosine_count(volumes, self.repetition_time, COSINE_CUTOFF_SECONDS),
        );
        y = regress_out(&design, &y)?;
        variance_normalize(&mut y);

        let covariance = y.dot(&y.t());
        let (eigenvalues, eigenvectors) = jacobi_eigen(covariance)?;
        let total: f64 = eigenvalues.iter().filter(|v| **v > 0.0).sum();

        let mut components = Array2::zeros((volumes, n));
        let mut variance_explained = Vec::with_capacity(n);
        for k in 0..n {
            let mut vector = eigenvectors.column(k).to_owned();
            orient(&mut vector);
            components
                .slice_mut(s![self.ignore_initial_volumes.., k])
                .assign(&vector);
            variance_explained.push(if total > 0.0 {
                eigenvalues[k].max(0.0) / total
            } else {
                0.0
            });
        }
        debug!(voxels = rows.len(), components = n, "computed CompCor components");
        Ok(CompCorResult {
            components,
            variance_explained,
        })
    }
}

/// Selects the `fraction` of voxels within `mask` whose time series have
/// the highest standard deviation.
///
/// # Errors
///
/// Returns [`SignalError::InvalidParameter`] for a fraction outside
/// `(0, 1]` and [`SignalError::ShapeMismatch`] for a mask of the wrong size.
pub fn high_variance_mask(
    data: ArrayView2<'_, f64>,
    mask: &[bool],
    fraction: f64,
) -> Result<Vec<bool>, SignalError> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(SignalError::InvalidParameter {
            name: "fraction".to_string(),
            reason: format!("{fraction} is not in (0, 1]"),
        });
    }
    if mask.len() != data.nrows() {
        return Err(SignalError::ShapeMismatch {
            what: "variance mask".to_string(),
            expected: data.nrows(),
            found: mask.len(),
        });
    }

    let stds: Vec<f64> = data
        .axis_iter(Axis(0))
        .map(|row| row.std(0.0))
        .collect();
    let within: Vec<f64> = stds
        .iter()
        .zip(mask)
        .filter(|(_, m)| **m)
        .map(|(sd, _)| *sd)
        .collect();
    if within.is_empty() {
        return Ok(vec![false; mask.len()]);
    }
    let threshold = percentile(&within, 100.0 * (1.0 - fraction));
    Ok(stds
        .iter()
        .zip(mask)
        .map(|(sd, m)| *m && *sd >= threshold)
        .collect())
}

fn drift_design(volumes: usize, count: usize) -> Array2<f64> {
    let basis = cosine_columns(volumes, count);
    let mut design = Array2::ones((volumes, basis.ncols() + 1));
    design.slice_mut(s![.., 1..]).assign(&basis);
    design
}

fn regress_out(design: &Array2<f64>, y: &Array2<f64>) -> Result<Array2<f64>, CompCorError> {
    let gram = design.t().dot(design);
    let rhs = design.t().dot(y);
    let beta = solve(gram, rhs)?;
    Ok(y - &design.dot(&beta))
}

/// Solves `a · x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array2<f64>) -> Result<Array2<f64>, CompCorError> {
    let n = a.nrows();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < PIVOT_EPSILON {
            return Err(CompCorError::Singular);
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            for k in 0..b.ncols() {
                b.swap([pivot, k], [col, k]);
            }
        }
        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            for k in 0..b.ncols() {
                b[[row, k]] -= factor * b[[col, k]];
            }
        }
    }

    let mut x = Array2::zeros(b.dim());
    for row in (0..n).rev() {
        for k in 0..b.ncols() {
            let tail: f64 = ((row + 1)..n).map(|j| a[[row, j]] * x[[j, k]]).sum();
            x[[row, k]] = (b[[row, k]] - tail) / a[[row, row]];
        }
    }
    Ok(x)
}

fn variance_normalize(y: &mut Array2<f64>) {
    for mut column in y.axis_iter_mut(Axis(1)) {
        let sd = column.std(0.0);
        if sd > PIVOT_EPSILON {
            column /= sd;
        } else {
            column.fill(0.0);
        }
    }
}

/// Cyclic Jacobi eigen-decomposition of a symmetric matrix. Eigenvalues
/// are returned in descending order with matching eigenvector columns.
///
/// Converged once the off-diagonal norm drops to `PIVOT_EPSILON` times the
/// Frobenius norm (at least `PIVOT_EPSILON`); fails after `MAX_SWEEPS`.
fn jacobi_eigen(mut a: Array2<f64>) -> Result<(Vec<f64>, Array2<f64>), CompCorError> {
    let n = a.nrows();
    let mut v = Array2::eye(n);
    let scale: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let tolerance = PIVOT_EPSILON * scale.max(1.0);

    let mut converged = n < 2;
    for _ in 0..MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .map(|(i, j)| a[[i, j]] * a[[i, j]])
            .sum::<f64>()
            .sqrt();
        if off <= tolerance {
            converged = true;
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if a[[p, q]].abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * a[[p, q]]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }
    if !converged {
        return Err(CompCorError::NotConverged { sweeps: MAX_SWEEPS });
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[[j, j]].total_cmp(&a[[i, i]]));
    let values = order.iter().map(|&i| a[[i, i]]).collect();
    let vectors = v.select(Axis(1), &order);
    Ok((values, vectors))
}

/// Flips a vector so its largest-magnitude entry is positive.
fn orient(vector: &mut Array1<f64>) {
    let peak = vector
        .iter()
        .copied()
        .max_by(|a, b| a.abs().total_cmp(&b.abs()))
        .unwrap_or(0.0);
    if peak < 0.0 {
        vector.mapv_inplace(|x| -x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(voxels: usize, volumes: usize) -> Array2<f64> {
        Array2::from_shape_fn((voxels, volumes), |(v, t)| {
            let slow = (t as f64 * 0.7).sin() * (v % 3) as f64;
            let fast = (t as f64 * 2.3 + v as f64).cos();
            let jitter = ((v * 31 + t * 17) % 13) as f64 / 13.0;
            100.0 + slow + fast + jitter
        })
    }

    #[test]
    fn six_components_per_run() {
        let data = synthetic(40, 100);
        let result = CompCor::new(2.0)
            .compute(data.view(), &[true; 40])
            .expect("compcor");
        assert_eq!(result.components.dim(), (100, 6));
        assert_eq!(result.variance_explained.len(), 6);
        assert!(
            result
                .variance_explained
                .windows(2)
                .all(|w| w[0] >= w[1] - 1e-12)
        );
        assert_eq!(result.names("t_comp_cor_")[5], "t_comp_cor_05");
    }

    #[test]
    fn components_are_unit_norm() {
        let data = synthetic(30, 60);
        let result = CompCor::new(2.0)
            .compute(data.view(), &[true; 30])
            .expect("compcor");
        for column in result.components.axis_iter(Axis(1)) {
            let norm: f64 = column.iter().map(|x| x * x).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn ignored_volumes_are_zero_filled() {
        let data = synthetic(30, 60);
        let result = CompCor::new(2.0)
            .ignoring(3)
            .compute(data.view(), &[true; 30])
            .expect("compcor");
        assert_eq!(result.components.nrows(), 60);
        assert!(result.components.slice(s![0..3, ..]).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn empty_mask_gives_nan() {
        let data = synthetic(10, 20);
        let result = CompCor::new(2.0)
            .compute(data.view(), &[false; 10])
            .expect("compcor");
        assert!(result.components.iter().all(|v| v.is_nan()));
        let sentinel = CompCor::new(2.0).sentinel(20);
        assert_eq!(sentinel.components.dim(), result.components.dim());
        assert_eq!(sentinel.variance_explained.len(), 6);
    }

    #[test]
    fn non_finite_data_is_unstable() {
        let mut data = synthetic(10, 20);
        data[[3, 4]] = f64::NAN;
        let err = CompCor::new(2.0)
            .compute(data.view(), &[true; 10])
            .unwrap_err();
        assert_eq!(err, CompCorError::NonFinite);
        assert!(err.is_unstable());
    }

    #[test]
    fn mask_size_is_checked() {
        let data = synthetic(10, 20);
        let err = CompCor::new(2.0).compute(data.view(), &[true; 4]).unwrap_err();
        assert!(!err.is_unstable());
    }

    #[test]
    fn jacobi_recovers_diagonal() {
        let m = ndarray::array![[2.0, 1.0], [1.0, 2.0]];
        let (values, vectors) = jacobi_eigen(m).expect("eigen");
        assert!((values[0] - 3.0).abs() < 1e-9);
        assert!((values[1] - 1.0).abs() < 1e-9);
        assert!((vectors[[0, 0]].abs() - vectors[[1, 0]].abs()).abs() < 1e-9);
    }

    #[test]
    fn jacobi_converges_on_a_dense_covariance() {
        let data = synthetic(12, 30);
        let covariance = data.dot(&data.t());
        let scale = covariance.iter().map(|x| x * x).sum::<f64>().sqrt();
        let (values, vectors) = jacobi_eigen(covariance.clone()).expect("converged");

        let trace: f64 = covariance.diag().sum();
        assert!((values.iter().sum::<f64>() - trace).abs() < 1e-9 * scale);
        for (k, value) in values.iter().enumerate() {
            let vector = vectors.column(k);
            let residual = &covariance.dot(&vector) - &(&vector * *value);
            assert!(residual.iter().all(|r| r.abs() < 1e-8 * scale));
        }
    }

    #[test]
    fn high_variance_keeps_top_fraction() {
        let data = Array2::from_shape_fn((20, 10), |(v, t)| {
            if t % 2 == 0 { v as f64 } else { -(v as f64) }
        });
        let mask = high_variance_mask(data.view(), &[true; 20], 0.1).expect("mask");
        assert_eq!(mask.iter().filter(|m| **m).count(), 2);
        assert!(mask[18] && mask[19]);
        assert!(high_variance_mask(data.view(), &[true; 20], 0.0).is_err());
    }
}
