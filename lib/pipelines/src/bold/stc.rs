//! Slice-timing correction.

use crate::memory::MemoryEstimate;
use fmriprep_interfaces::afni::tshift;
use fmriprep_interfaces::utility::copy_xform;
use fmriprep_workflow::{GraphError, INPUTNODE, Node, OUTPUTNODE, Workflow};

pub const STC_WF: &str = "bold_stc_wf";

/// Builds `bold_stc_wf`, shifting every slice to the middle of the
/// acquisition window. Non-steady-state volumes are left out of the fit.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_bold_stc_wf(
    repetition_time: f64,
    slice_timing: &[f64],
    mem: MemoryEstimate,
) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::with_io(STC_WF, &["bold_file", "skip_vols"], &["stc_file"])
        .with_description(
            "BOLD runs were slice-time corrected using 3dTshift from AFNI.",
        );

    workflow.add_nodes([
        Node::new("slice_timing_correction", tshift(repetition_time, slice_timing))
            .with_mem_gb(mem.filesize),
        Node::new("copy_xform", copy_xform()).local(),
    ])?;
    workflow.connect(
        INPUTNODE,
        "slice_timing_correction",
        &[("bold_file", "in_file"), ("skip_vols", "ignore")],
    )?;
    workflow.connect("slice_timing_correction", "copy_xform", &[("out_file", "in_file")])?;
    workflow.connect(INPUTNODE, "copy_xform", &[("bold_file", "hdr_file")])?;
    workflow.connect("copy_xform", OUTPUTNODE, &[("out_file", "stc_file")])?;
    Ok(workflow)
}
