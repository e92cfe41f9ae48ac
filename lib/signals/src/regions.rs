//! Mean signal within a region.

use crate::error::SignalError;
use ndarray::ArrayView2;

/// Mean time series of the voxels selected by `mask` in `data` (voxels × time).
///
/// An empty region yields `NaN` at every time point.
///
/// # Errors
///
/// Returns [`SignalError::ShapeMismatch`] if the mask does not cover every voxel.
pub fn region_mean(data: ArrayView2<'_, f64>, mask: &[bool]) -> Result<Vec<f64>, SignalError> {
    if mask.len() != data.nrows() {
        return Err(SignalError::ShapeMismatch {
            what: "region mask".to_string(),
            expected: data.nrows(),
            found: mask.len(),
        });
    }

    let selected = mask.iter().filter(|m| **m).count();
    let mut sums = vec![0.0; data.ncols()];
    for (row, _) in data.outer_iter().zip(mask).filter(|(_, m)| **m) {
        for (sum, value) in sums.iter_mut().zip(row) {
            *sum += value;
        }
    }
    Ok(sums.into_iter().map(|s| s / selected as f64).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn averages_selected_voxels() {
        let data = array![[1.0, 2.0], [3.0, 4.0], [100.0, 100.0]];
        let mean = region_mean(data.view(), &[true, true, false]).expect("mean");
        assert_eq!(mean, vec![2.0, 3.0]);
    }

    #[test]
    fn empty_region_is_nan() {
        let data = array![[1.0, 2.0]];
        let mean = region_mean(data.view(), &[false]).expect("mean");
        assert!(mean.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn mask_must_match() {
        let data = array![[1.0, 2.0]];
        assert!(region_mean(data.view(), &[true, false]).is_err());
    }
}
