//! ICA-AROMA.

use crate::tool::{Package, ToolSpec};
use fmriprep_workflow::PortKind::{File, Integer, Text};

/// Non-aggressive ICA-AROMA classification and denoising.
///
/// With `err_is_warning`, a failed classification produces empty outputs
/// instead of an error.
#[must_use]
pub fn ica_aroma(repetition_time: f64, err_is_warning: bool) -> ToolSpec {
    ToolSpec::external("ICA_AROMA", "ICA_AROMA.py", Package::IcaAroma)
        .input("in_file", File)
        .input("mask", File)
        .input("melodic_dir", File)
        .input("motion_parameters", File)
        .optional("skip_vols", Integer)
        .output("aroma_noise_ics", File)
        .output("nonaggr_denoised_file", File)
        .output("aroma_confounds", File)
        .output("out_dir", Text)
        .param("denoise_type", "nonaggr")
        .param("TR", repetition_time)
        .param("err_on_aroma_warn", !err_is_warning)
        .mem_gb(4.0)
}
