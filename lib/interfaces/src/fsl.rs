//! FSL programs.

use crate::tool::{Package, ToolSpec};
use fmriprep_workflow::PortKind::{File, FileList, Integer, Number, Text};

fn fsl(name: &str, command: &str) -> ToolSpec {
    ToolSpec::external(name, command, Package::Fsl)
}

/// Rigid head-motion correction against a reference volume.
#[must_use]
pub fn mcflirt() -> ToolSpec {
    fsl("MCFLIRT", "mcflirt")
        .input("in_file", File)
        .optional("ref_file", File)
        .output("out_file", File)
        .output("par_file", File)
        .output("mat_file", FileList)
        .output("rms_files", FileList)
        .param("save_mats", true)
        .param("save_plots", true)
        .param("save_rms", true)
}

/// Linear registration with `dof` degrees of freedom.
#[must_use]
pub fn flirt(dof: u8) -> ToolSpec {
    fsl("FLIRT", "flirt")
        .input("in_file", File)
        .input("reference", File)
        .optional("in_matrix_file", File)
        .output("out_file", File)
        .output("out_matrix_file", File)
        .param("dof", dof)
}

/// Boundary-based registration refining an initial FLIRT matrix.
#[must_use]
pub fn flirt_bbr(dof: u8) -> ToolSpec {
    flirt(dof)
        .input("wm_seg", File)
        .param("cost_func", "bbr")
        .param("schedule", "${FSLDIR}/etc/flirtsch/bbr.sch")
}

#[must_use]
pub fn invert_xfm() -> ToolSpec {
    fsl("ConvertXFM", "convert_xfm")
        .input("in_file", File)
        .output("out_file", File)
        .param("invert_xfm", true)
}

/// Edge-preserving smoothing.
#[must_use]
pub fn susan(fwhm_mm: f64) -> ToolSpec {
    fsl("SUSAN", "susan")
        .input("in_file", File)
        .input("brightness_threshold", Number)
        .optional("usans", Text)
        .output("smoothed_file", File)
        .param("fwhm", fwhm_mm)
}

/// Probabilistic ICA; `dimensionality` of `None` lets MELODIC estimate it.
#[must_use]
pub fn melodic(dimensionality: Option<i32>, repetition_time: f64) -> ToolSpec {
    let tool = fsl("MELODIC", "melodic")
        .input("in_files", FileList)
        .input("mask", File)
        .output("out_dir", File)
        .param("approach", "symm")
        .param("no_bet", true)
        .param("tr_sec", repetition_time);
    match dimensionality {
        Some(dim) => tool.param("dim", dim),
        None => tool.param("dim", "auto"),
    }
}

/// Brain extraction.
#[must_use]
pub fn bet(frac: f64) -> ToolSpec {
    fsl("BET", "bet")
        .input("in_file", File)
        .output("out_file", File)
        .output("mask_file", File)
        .param("frac", frac)
        .param("mask", true)
}

/// Unwarps a series given a fieldmap in Hz along `unwarp_direction`.
#[must_use]
pub fn fugue(unwarp_direction: &str) -> ToolSpec {
    fsl("FUGUE", "fugue")
        .input("fmap_in_file", File)
        .optional("in_file", File)
        .optional("mask_file", File)
        .optional("dwell_time", Number)
        .output("shift_out_file", File)
        .output("unwarped_file", File)
        .param("unwarp_direction", unwarp_direction)
        .param("save_shift", true)
}

/// Phase unwrapping.
#[must_use]
pub fn prelude() -> ToolSpec {
    fsl("PRELUDE", "prelude")
        .input("phase_file", File)
        .input("magnitude_file", File)
        .optional("mask_file", File)
        .output("unwrapped_phase_file", File)
}

/// Turns a voxel shift map into a displacement field.
#[must_use]
pub fn convert_warp(shift_direction: &str) -> ToolSpec {
    fsl("ConvertWarp", "convertwarp")
        .input("shift_in_file", File)
        .input("reference", File)
        .output("out_file", File)
        .param("shift_direction", shift_direction)
        .param("relwarp", true)
        .param("out_relwarp", true)
}

/// `fslmaths` with a fixed operation string.
#[must_use]
pub fn maths(op_string: &str) -> ToolSpec {
    fsl("ImageMaths", "fslmaths")
        .input("in_file", File)
        .optional("in_file2", File)
        .output("out_file", File)
        .param("op_string", op_string)
}

/// `fslstats` percentile within a mask.
#[must_use]
pub fn image_stats(op_string: &str) -> ToolSpec {
    fsl("ImageStats", "fslstats")
        .input("in_file", File)
        .optional("mask_file", File)
        .output("out_stat", Number)
        .param("op_string", op_string)
}

/// Splits a 4D series into volumes.
#[must_use]
pub fn split() -> ToolSpec {
    fsl("Split", "fslsplit")
        .input("in_file", File)
        .output("out_files", FileList)
        .param("dimension", "t")
}

/// Tissue segmentation.
#[must_use]
pub fn fast() -> ToolSpec {
    fsl("FAST", "fast")
        .input("in_files", File)
        .output("tissue_class_map", File)
        .output("probability_maps", FileList)
        .param("no_bias", true)
        .param("probability_maps", true)
        .param("segments", true)
}

/// Fieldmap preparation from a phase difference map.
#[must_use]
pub fn phasediff_to_fieldmap() -> ToolSpec {
    fsl("PrepareFieldmap", "fsl_prepare_fieldmap")
        .input("in_phase", File)
        .input("in_magnitude", File)
        .optional("delta_te", Number)
        .output("out_fieldmap", File)
        .param("scanner", "SIEMENS")
        .param("nocheck", true)
}

/// Number of volumes in a series.
#[must_use]
pub fn n_volumes() -> ToolSpec {
    fsl("ImageInfo", "fslnvols").input("in_file", File).output("n_volumes", Integer)
}
