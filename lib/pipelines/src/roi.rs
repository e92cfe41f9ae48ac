//! Confound ROIs in BOLD space.
//!
//! Tissue probability maps (CSF, GM, WM) are thresholded and eroded in
//! anatomical space, mapped to the BOLD grid with nearest-neighbour
//! interpolation and clipped against the BOLD brain mask. Every mask that
//! reaches signal extraction or CompCor leaves a `*_msk` node.

use crate::memory::{TPM_MEM_GB, VOLUME_MEM_GB};
use fmriprep_interfaces::confounds::{add_tpms, apply_mask, tpm_to_roi};
use fmriprep_interfaces::ants::apply_transforms_nn;
use fmriprep_signals::RoiParams;
use fmriprep_workflow::{Adapter, GraphError, Node, Workflow};

/// Index of each tissue in the probability map list.
pub const CSF_INDEX: usize = 0;
pub const GM_INDEX: usize = 1;
pub const WM_INDEX: usize = 2;

/// Fields of the node the ROI derivation reads from.
pub const ROI_SOURCE_FIELDS: [&str; 4] = ["t1_tpms", "t1_mask", "t1_bold_xform", "bold_mask"];

/// One derived ROI: the anatomical node, the field of its output that is
/// carried to BOLD space, and the transform and clipping node names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiStage {
    pub roi: &'static str,
    pub roi_port: &'static str,
    pub transform: &'static str,
    pub mask: &'static str,
}

pub const CSF: RoiStage = RoiStage {
    roi: "csf_roi",
    roi_port: "roi_file",
    transform: "csf_tfm",
    mask: "csf_msk",
};

pub const WM: RoiStage = RoiStage {
    roi: "wm_roi",
    roi_port: "roi_file",
    transform: "wm_tfm",
    mask: "wm_msk",
};

pub const ACOMPCOR: RoiStage = RoiStage {
    roi: "acc_roi",
    roi_port: "roi_file",
    transform: "acc_tfm",
    mask: "acc_msk",
};

/// The tCompCor mask is the CSF mask after the anatomical erosion.
pub const TCOMPCOR: RoiStage = RoiStage {
    roi: "csf_roi",
    roi_port: "eroded_mask",
    transform: "tcc_tfm",
    mask: "tcc_msk",
};

pub const STAGES: [RoiStage; 4] = [CSF, WM, ACOMPCOR, TCOMPCOR];

/// Adds ROI derivation to `workflow`, reading [`ROI_SOURCE_FIELDS`] from
/// the member `source`.
///
/// The clipped masks are available on the `out_file` port of each stage's
/// `mask` node.
///
/// # Errors
///
/// Returns a [`GraphError`] if a name is taken or `source` lacks a field.
pub fn add_roi_derivation(workflow: &mut Workflow, source: &str) -> Result<(), GraphError> {
    workflow.add_nodes([
        Node::new("csf_roi", tpm_to_roi(&RoiParams::csf())).with_mem_gb(TPM_MEM_GB),
        Node::new("wm_roi", tpm_to_roi(&RoiParams::wm())).with_mem_gb(TPM_MEM_GB),
        Node::new("acc_tpm", add_tpms(&[CSF_INDEX, WM_INDEX])).with_mem_gb(TPM_MEM_GB),
        Node::new("acc_roi", tpm_to_roi(&RoiParams::acompcor())).with_mem_gb(TPM_MEM_GB),
    ])?;

    workflow.connect_with(source, "t1_tpms", "csf_roi", "in_tpm", Adapter::Select { index: CSF_INDEX })?;
    workflow.connect_with(source, "t1_tpms", "wm_roi", "in_tpm", Adapter::Select { index: WM_INDEX })?;
    workflow.connect(source, "acc_tpm", &[("t1_tpms", "in_files")])?;
    workflow.connect("acc_tpm", "acc_roi", &[("out_file", "in_tpm")])?;
    for roi in ["csf_roi", "wm_roi", "acc_roi"] {
        workflow.connect(source, roi, &[("t1_mask", "in_mask")])?;
    }

    for stage in STAGES {
        workflow.add_nodes([
            Node::new(stage.transform, apply_transforms_nn()).with_mem_gb(VOLUME_MEM_GB),
            Node::new(stage.mask, apply_mask()).with_mem_gb(VOLUME_MEM_GB),
        ])?;
        workflow.connect(stage.roi, stage.transform, &[(stage.roi_port, "input_image")])?;
        workflow.connect(
            source,
            stage.transform,
            &[("bold_mask", "reference_image"), ("t1_bold_xform", "transforms")],
        )?;
        workflow.connect(stage.transform, stage.mask, &[("output_image", "in_file")])?;
        workflow.connect(source, stage.mask, &[("bold_mask", "in_mask")])?;
    }
    Ok(())
}
