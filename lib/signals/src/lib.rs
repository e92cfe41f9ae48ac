//! Confound numerics computed in-process.
//!
//! External tools do the heavy image processing; the regressors that make
//! up the confounds table are small enough to compute directly from
//! `ndarray` matrices laid out as voxels × time:
//!
//! - motion parameter normalisation and framewise displacement
//! - DVARS (standardised, raw and voxel-wise standardised)
//! - region means, cosine drift basis, non-steady-state detection
//! - temporal and anatomical CompCor
//! - ROI mask derivation from tissue probability maps
//! - the confounds table and its TSV/JSON serialisation

pub mod compcor;
pub mod cosine;
pub mod dvars;
pub mod error;
pub mod motion;
pub mod nss;
pub mod regions;
pub mod roi;
pub mod stats;
pub mod table;

pub use compcor::{CompCor, CompCorResult, DEFAULT_COMPONENTS, DEFAULT_VARIANCE_FRACTION, high_variance_mask};
pub use cosine::{COSINE_CUTOFF_SECONDS, cosine_basis, cosine_columns, cosine_count, cosine_names};
pub use dvars::{Dvars, compute_dvars};
pub use error::{CompCorError, SignalError};
pub use motion::{
    FD_RADIUS_MM, MOTION_COLUMNS, MotionSource, framewise_displacement, normalize_motion,
    parse_motion_text,
};
pub use nss::{NSS_WINDOW, detect_non_steady_state, non_steady_state_columns, non_steady_state_names};
pub use regions::region_mean;
pub use roi::{Roi, RoiParams, add_tpms, apply_mask, erode, tpm_to_roi};
pub use table::{Components, ConfoundSources, ConfoundsTable};
