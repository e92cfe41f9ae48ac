//! Head-motion estimation.

use crate::memory::{MemoryEstimate, TABLE_MEM_GB};
use fmriprep_interfaces::NormalizeMotionParams;
use fmriprep_interfaces::fsl::mcflirt;
use fmriprep_interfaces::itk::mcflirt_to_itk;
use fmriprep_signals::MotionSource;
use fmriprep_workflow::{GraphError, INPUTNODE, Node, OUTPUTNODE, Workflow};

pub const HMC_WF: &str = "bold_hmc_wf";

/// Builds `bold_hmc_wf`.
///
/// Outputs one ITK file holding the rigid transform of every volume to the
/// reference, and the motion parameters as `X Y Z RotX RotY RotZ`.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_bold_hmc_wf(mem: MemoryEstimate, omp_nthreads: usize) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::with_io(
        HMC_WF,
        &["bold_file", "raw_ref_image"],
        &["xforms", "movpar_file"],
    )
    .with_description(
        "Head-motion parameters with respect to the BOLD reference \
         (transformation matrices, and six corresponding rotation and translation \
         parameters) are estimated before any spatiotemporal filtering using \
         mcflirt (FSL).",
    );

    workflow.add_nodes([
        Node::new("mcflirt", mcflirt()).with_mem_gb(mem.largemem),
        Node::new("fsl2itk", mcflirt_to_itk())
            .with_mem_gb(TABLE_MEM_GB)
            .with_threads(omp_nthreads),
        Node::new(
            "normalize_motion",
            NormalizeMotionParams {
                format: MotionSource::Fsl,
            },
        )
        .local(),
    ])?;

    workflow.connect(
        INPUTNODE,
        "mcflirt",
        &[("raw_ref_image", "ref_file"), ("bold_file", "in_file")],
    )?;
    workflow.connect(
        INPUTNODE,
        "fsl2itk",
        &[("raw_ref_image", "in_source"), ("raw_ref_image", "in_reference")],
    )?;
    workflow.connect("mcflirt", "fsl2itk", &[("mat_file", "in_files")])?;
    workflow.connect("mcflirt", "normalize_motion", &[("par_file", "in_file")])?;
    workflow.connect("fsl2itk", OUTPUTNODE, &[("out_file", "xforms")])?;
    workflow.connect("normalize_motion", OUTPUTNODE, &[("out_file", "movpar_file")])?;
    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_parameters_are_normalized() {
        let mem = MemoryEstimate::new(1.0, 300);
        let graph = init_bold_hmc_wf(mem, 4).expect("build").flatten().expect("valid");
        let (source, _) = graph.source_of(OUTPUTNODE, "movpar_file").expect("edge");
        assert_eq!(source, "normalize_motion");
        assert!((graph.node("mcflirt").expect("node").mem_gb - mem.largemem).abs() < 1e-12);
        assert_eq!(graph.node("fsl2itk").expect("node").n_procs, 4);
    }
}
