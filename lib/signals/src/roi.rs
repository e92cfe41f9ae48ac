//! Region-of-interest masks from tissue probability maps.
//!
//! Masks are `Array3<bool>` volumes. Erosion uses the 6-connected cross
//! structuring element, and voxels outside the volume count as background.

use crate::error::SignalError;
use ndarray::{Array3, ArrayView3, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How a tissue probability map becomes a ROI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiParams {
    /// Minimum probability for a voxel to enter the ROI.
    pub prob_thresh: f64,
    /// Erode the ROI by this many millimetres.
    pub erode_mm: Option<f64>,
    /// Erode the ROI until at most this share of its volume remains.
    pub erode_prop: Option<f64>,
    /// Erode the brain mask by this many millimetres before masking.
    pub mask_erode_mm: Option<f64>,
    /// Erode the brain mask until at most this share of its volume remains.
    pub mask_erode_prop: Option<f64>,
}

impl Default for RoiParams {
    fn default() -> Self {
        Self {
            prob_thresh: 0.95,
            erode_mm: None,
            erode_prop: None,
            mask_erode_mm: None,
            mask_erode_prop: None,
        }
    }
}

impl RoiParams {
    /// Cerebrospinal fluid: the brain mask is eroded by 30 mm.
    #[must_use]
    pub fn csf() -> Self {
        Self {
            mask_erode_mm: Some(30.0),
            ..Self::default()
        }
    }

    /// White matter.
    #[must_use]
    pub fn wm() -> Self {
        Self {
            erode_prop: Some(0.6),
            mask_erode_prop: Some(0.6_f64.powi(3)),
            ..Self::default()
        }
    }

    /// Combined CSF and white matter for anatomical CompCor.
    #[must_use]
    pub fn acompcor() -> Self {
        Self::wm()
    }
}

/// A ROI and the (possibly eroded) brain mask it was clipped with.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    pub roi: Array3<bool>,
    pub eroded_mask: Array3<bool>,
}

/// Thresholds `tpm`, clips it to the (eroded) `brain_mask` and erodes it.
///
/// # Errors
///
/// Returns [`SignalError::ShapeMismatch`] when the volumes differ in shape
/// and [`SignalError::InvalidParameter`] for a threshold outside `[0, 1]`.
pub fn tpm_to_roi(
    tpm: ArrayView3<'_, f64>,
    brain_mask: ArrayView3<'_, bool>,
    zooms: [f64; 3],
    params: &RoiParams,
) -> Result<Roi, SignalError> {
    check_shape("brain mask", tpm.dim(), brain_mask.dim())?;
    if !(0.0..=1.0).contains(&params.prob_thresh) {
        return Err(SignalError::InvalidParameter {
            name: "prob_thresh".to_string(),
            reason: format!("{} is not a probability", params.prob_thresh),
        });
    }

    let mut mask = brain_mask.to_owned();
    if let Some(mm) = params.mask_erode_mm.filter(|mm| *mm > 0.0) {
        mask = erode(mask.view(), iterations_for(mm, zooms));
    } else if let Some(prop) = params.mask_erode_prop.filter(|p| *p < 1.0) {
        mask = erode_to_proportion(mask, prop);
    }

    let mut roi = Zip::from(&tpm)
        .and(&mask)
        .map_collect(|p, m| *m && *p >= params.prob_thresh);

    if let Some(mm) = params.erode_mm.filter(|mm| *mm > 0.0) {
        roi = erode(roi.view(), iterations_for(mm, zooms));
    } else if let Some(prop) = params.erode_prop.filter(|p| *p < 1.0) {
        roi = erode_to_proportion(roi, prop);
    }

    debug!(
        voxels = count(&roi),
        mask_voxels = count(&mask),
        "derived ROI from tissue probability map"
    );
    Ok(Roi {
        roi,
        eroded_mask: mask,
    })
}

/// Binary erosion with the 6-connected structuring element.
#[must_use]
pub fn erode(mask: ArrayView3<'_, bool>, iterations: usize) -> Array3<bool> {
    let mut current = mask.to_owned();
    for _ in 0..iterations {
        let (nx, ny, nz) = current.dim();
        let previous = current.clone();
        let inside = |x: isize, y: isize, z: isize| {
            x >= 0
                && y >= 0
                && z >= 0
                && (x as usize) < nx
                && (y as usize) < ny
                && (z as usize) < nz
                && previous[[x as usize, y as usize, z as usize]]
        };
        current = Array3::from_shape_fn((nx, ny, nz), |(x, y, z)| {
            let (x, y, z) = (x as isize, y as isize, z as isize);
            inside(x, y, z)
                && inside(x - 1, y, z)
                && inside(x + 1, y, z)
                && inside(x, y - 1, z)
                && inside(x, y + 1, z)
                && inside(x, y, z - 1)
                && inside(x, y, z + 1)
        });
    }
    current
}

/// Union of tissue probability maps, clipped to `[0, 1]`.
///
/// # Errors
///
/// Returns [`SignalError::Empty`] without maps and
/// [`SignalError::ShapeMismatch`] when they differ in shape.
pub fn add_tpms(tpms: &[ArrayView3<'_, f64>]) -> Result<Array3<f64>, SignalError> {
    let Some((first, rest)) = tpms.split_first() else {
        return Err(SignalError::Empty {
            what: "tissue probability maps".to_string(),
        });
    };
    let mut sum = first.to_owned();
    for tpm in rest {
        check_shape("tissue probability map", sum.dim(), tpm.dim())?;
        sum += tpm;
    }
    sum.mapv_inplace(|p| p.clamp(0.0, 1.0));
    Ok(sum)
}

/// Clips `roi` against `mask`.
///
/// # Errors
///
/// Returns [`SignalError::ShapeMismatch`] when the volumes differ in shape.
pub fn apply_mask(
    roi: ArrayView3<'_, bool>,
    mask: ArrayView3<'_, bool>,
) -> Result<Array3<bool>, SignalError> {
    check_shape("mask", roi.dim(), mask.dim())?;
    Ok(Zip::from(&roi).and(&mask).map_collect(|r, m| *r && *m))
}

fn iterations_for(mm: f64, zooms: [f64; 3]) -> usize {
    let largest = zooms.iter().copied().fold(f64::MIN_POSITIVE, f64::max);
    ((mm / largest).floor() as usize).max(1)
}

fn erode_to_proportion(mut mask: Array3<bool>, proportion: f64) -> Array3<bool> {
    let original = count(&mask);
    if original == 0 {
        return mask;
    }
    while count(&mask) as f64 / original as f64 > proportion {
        let next = erode(mask.view(), 1);
        if next == mask {
            break;
        }
        mask = next;
    }
    mask
}

fn count(mask: &Array3<bool>) -> usize {
    mask.iter().filter(|v| **v).count()
}

fn check_shape(
    what: &str,
    expected: (usize, usize, usize),
    found: (usize, usize, usize),
) -> Result<(), SignalError> {
    if expected == found {
        return Ok(());
    }
    Err(SignalError::ShapeMismatch {
        what: format!("{what} {found:?} vs {expected:?}"),
        expected: expected.0 * expected.1 * expected.2,
        found: found.0 * found.1 * found.2,
    })
}
