//! CIFTI grayordinates.

use crate::memory::MemoryEstimate;
use fmriprep_interfaces::utility::generate_cifti;
use fmriprep_workflow::{GraphError, INPUTNODE, Node, OUTPUTNODE, Workflow};

pub const GRAYORDS_WF: &str = "bold_grayords_wf";

/// Builds `bold_grayords_wf`, combining the subcortical volume in
/// `MNI152NLin6Asym` with the `fsaverage5` surface samples.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_bold_grayords_wf(
    density: &str,
    repetition_time: f64,
    mem: MemoryEstimate,
) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::with_io(
        GRAYORDS_WF,
        &["bold_std", "surf_files"],
        &["cifti_bold", "cifti_metadata"],
    )
    .with_description(format!(
        "Grayordinates files containing {density} samples were also generated using the \
         highest-resolution fsaverage as intermediate standardized surface space."
    ));
    workflow.add_node(
        Node::new("gen_cifti", generate_cifti(density, repetition_time)).with_mem_gb(mem.resampled),
    )?;
    workflow.connect(
        INPUTNODE,
        "gen_cifti",
        &[("bold_std", "bold_file"), ("surf_files", "surface_bolds")],
    )?;
    workflow.connect(
        "gen_cifti",
        OUTPUTNODE,
        &[("cifti_bold", "cifti_bold"), ("cifti_metadata", "cifti_metadata")],
    )?;
    Ok(workflow)
}
