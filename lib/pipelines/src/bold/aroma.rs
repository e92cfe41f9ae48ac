//! ICA-AROMA on the `MNI152NLin6Asym` series.

use crate::memory::MemoryEstimate;
use fmriprep_interfaces::aroma::ica_aroma;
use fmriprep_interfaces::fsl;
use fmriprep_workflow::{Adapter, GraphError, INPUTNODE, Node, OUTPUTNODE, Workflow};

pub const AROMA_WF: &str = "ica_aroma_wf";

pub const AROMA_INPUTS: [&str; 4] = ["bold_std", "bold_mask_std", "movpar_file", "skip_vols"];

pub const AROMA_OUTPUTS: [&str; 4] = [
    "aroma_noise_ics",
    "melodic_mix",
    "nonaggr_denoised_file",
    "aroma_confounds",
];

/// Smoothing kernel applied before the decomposition.
pub const AROMA_FWHM_MM: f64 = 6.0;

/// Builds `ica_aroma_wf`.
///
/// The series is smoothed with SUSAN, decomposed with MELODIC and
/// classified by ICA-AROMA, which also writes the non-aggressively denoised
/// series. With `err_is_warning` a failed classification yields empty
/// outputs instead of failing the run.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_ica_aroma_wf(
    repetition_time: f64,
    melodic_dim: Option<i32>,
    err_is_warning: bool,
    mem: MemoryEstimate,
) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::with_io(AROMA_WF, &AROMA_INPUTS, &AROMA_OUTPUTS).with_description(format!(
        "Automatic removal of motion artifacts using independent component analysis \
         (ICA-AROMA) was performed on the preprocessed BOLD on MNI space time-series \
         after removal of non-steady state volumes and spatial smoothing with an \
         isotropic, Gaussian kernel of {AROMA_FWHM_MM} mm FWHM."
    ));

    workflow.add_nodes([
        Node::new("calc_median_val", fsl::image_stats("-k %s -p 50")),
        Node::new("smooth", fsl::susan(AROMA_FWHM_MM)).with_mem_gb(mem.resampled),
        Node::new("melodic", fsl::melodic(melodic_dim, repetition_time)).with_mem_gb(mem.largemem),
        Node::new("ica_aroma", ica_aroma(repetition_time, err_is_warning)),
    ])?;

    workflow.connect(
        INPUTNODE,
        "calc_median_val",
        &[("bold_std", "in_file"), ("bold_mask_std", "mask_file")],
    )?;
    workflow.connect(INPUTNODE, "smooth", &[("bold_std", "in_file")])?;
    workflow.connect_with(
        "calc_median_val",
        "out_stat",
        "smooth",
        "brightness_threshold",
        Adapter::Named {
            function: "susan_brightness_threshold".to_string(),
        },
    )?;
    workflow.connect("smooth", "melodic", &[("smoothed_file", "in_files")])?;
    workflow.connect(INPUTNODE, "melodic", &[("bold_mask_std", "mask")])?;
    workflow.connect(
        INPUTNODE,
        "ica_aroma",
        &[
            ("bold_std", "in_file"),
            ("bold_mask_std", "mask"),
            ("movpar_file", "motion_parameters"),
            ("skip_vols", "skip_vols"),
        ],
    )?;
    workflow.connect("melodic", "ica_aroma", &[("out_dir", "melodic_dir")])?;

    workflow.connect(
        "ica_aroma",
        OUTPUTNODE,
        &[
            ("aroma_noise_ics", "aroma_noise_ics"),
            ("nonaggr_denoised_file", "nonaggr_denoised_file"),
            ("aroma_confounds", "aroma_confounds"),
        ],
    )?;
    workflow.connect_with(
        "melodic",
        "out_dir",
        OUTPUTNODE,
        "melodic_mix",
        Adapter::Named {
            function: "melodic_mixing_matrix".to_string(),
        },
    )?;
    Ok(workflow)
}
