//! Discrete cosine drift basis for high-pass filtering.

use ndarray::Array2;
use std::f64::consts::PI;

/// High-pass cutoff period in seconds.
pub const COSINE_CUTOFF_SECONDS: f64 = 128.0;

/// Number of cosine regressors for a run: `⌊T·TR/cutoff⌋ + 1`.
#[must_use]
pub fn cosine_count(n_volumes: usize, repetition_time: f64, cutoff: f64) -> usize {
    if n_volumes == 0 || cutoff <= 0.0 {
        return 0;
    }
    (n_volumes as f64 * repetition_time / cutoff).floor() as usize + 1
}

/// Cosine basis (volumes × regressors), column `k` being
/// `sqrt(2/T)·cos(π/T·(t + ½)·(k + 1))`.
#[must_use]
pub fn cosine_basis(n_volumes: usize, repetition_time: f64, cutoff: f64) -> Array2<f64> {
    cosine_columns(n_volumes, cosine_count(n_volumes, repetition_time, cutoff))
}

/// The first `count` cosine regressors over `n_volumes`.
///
/// Used when the regressor count follows the whole run but the basis only
/// spans the volumes kept after discarding non-steady-state ones.
#[must_use]
pub fn cosine_columns(n_volumes: usize, count: usize) -> Array2<f64> {
    let length = n_volumes as f64;
    let norm = (2.0 / length).sqrt();
    Array2::from_shape_fn((n_volumes, count), |(t, k)| {
        norm * (PI / length * (t as f64 + 0.5) * (k + 1) as f64).cos()
    })
}

/// Column names `Cosine00`, `Cosine01`, ...
#[must_use]
pub fn cosine_names(count: usize) -> Vec<String> {
    (0..count).map(|k| format!("Cosine{k:02}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_follows_cutoff() {
        assert_eq!(cosine_count(100, 2.0, COSINE_CUTOFF_SECONDS), 2);
        assert_eq!(cosine_count(200, 2.0, COSINE_CUTOFF_SECONDS), 4);
        assert_eq!(cosine_count(10, 1.0, COSINE_CUTOFF_SECONDS), 1);
        assert_eq!(cosine_count(0, 2.0, COSINE_CUTOFF_SECONDS), 0);
    }

    #[test]
    fn basis_columns_are_orthonormal() {
        let basis = cosine_basis(100, 2.0, COSINE_CUTOFF_SECONDS);
        assert_eq!(basis.dim(), (100, 2));
        let gram = basis.t().dot(&basis);
        assert!((gram[[0, 0]] - 1.0).abs() < 1e-9);
        assert!((gram[[1, 1]] - 1.0).abs() < 1e-9);
        assert!(gram[[0, 1]].abs() < 1e-9);
    }

    #[test]
    fn explicit_count_over_a_shorter_span() {
        let basis = cosine_columns(62, cosine_count(64, 2.0, COSINE_CUTOFF_SECONDS));
        assert_eq!(basis.dim(), (62, 2));
        assert_eq!(cosine_basis(62, 2.0, COSINE_CUTOFF_SECONDS).ncols(), 1);
        let gram = basis.t().dot(&basis);
        assert!((gram[[1, 1]] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(cosine_names(2), vec!["Cosine00", "Cosine01"]);
    }
}
