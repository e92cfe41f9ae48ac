//! Memory estimates derived from the size of a BOLD series.

use fmriprep_core::BoldRun;

/// Thresholding and eroding one tissue probability map.
pub const TPM_MEM_GB: f64 = 0.2;

/// Any step holding a single 3-D volume or mask.
pub const VOLUME_MEM_GB: f64 = 0.1;

/// Building a sampling reference grid.
pub const SAMPLING_REFERENCE_MEM_GB: f64 = 0.3;

/// Resampling a mask onto a template grid.
pub const TEMPLATE_MASK_MEM_GB: f64 = 1.0;

/// Rewriting transform or regressor files.
pub const TABLE_MEM_GB: f64 = 0.05;

/// Peak memory, in GB, of the three classes of per-run nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryEstimate {
    /// Reading the series once.
    pub filesize: f64,
    /// Holding a resampled copy.
    pub resampled: f64,
    /// Registration, head-motion correction and confound extraction.
    pub largemem: f64,
}

impl MemoryEstimate {
    /// Estimates for a series of `size_gb` with `n_volumes` volumes.
    #[must_use]
    pub fn new(size_gb: f64, n_volumes: usize) -> Self {
        let volumes = n_volumes.max(100) as f64;
        Self {
            filesize: size_gb,
            resampled: 4.0 * size_gb,
            largemem: (0.007 * volumes + 1.5) * size_gb,
        }
    }

    #[must_use]
    pub fn for_run(run: &BoldRun) -> Self {
        Self::new(run.size_gb, run.n_volumes)
    }
}
