//! Co-registration of the BOLD reference to the T1w.
//!
//! With FreeSurfer surfaces the initial affine comes from `mri_coreg` and
//! is refined with `bbregister`; without them FLIRT provides both steps.
//! In both cases `select_transform` decides between the refined and the
//! initial transform and reports the choice as `fallback`.

use crate::memory::MemoryEstimate;
use crate::settings::BoldSettings;
use fmriprep_interfaces::reports::simple_before_after;
use fmriprep_interfaces::{BbrMode, SelectTransform, freesurfer, fsl, itk};
use fmriprep_workflow::{GraphError, INPUTNODE, Node, OUTPUTNODE, Workflow};

pub const REG_WF: &str = "bold_reg_wf";

pub const REG_INPUTS: [&str; 5] = ["ref_bold_brain", "t1_brain", "t1_seg", "subjects_dir", "subject_id"];

pub const REG_OUTPUTS: [&str; 4] = ["itk_bold_to_t1", "itk_t1_to_bold", "fallback", "out_report"];

/// Builds `bold_reg_wf`.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_bold_reg_wf(settings: &BoldSettings, mem: MemoryEstimate) -> Result<Workflow, GraphError> {
    let dof = settings.bold2t1w_dof;
    let bbr = settings.use_bbr != BbrMode::Disabled;
    let description = match (settings.freesurfer, bbr) {
        (true, true) => format!(
            "The BOLD reference was then co-registered to the T1w reference using bbregister \
             (FreeSurfer), which implements boundary-based registration. \
             Co-registration was configured with {dof} degrees of freedom."
        ),
        (true, false) => format!(
            "The BOLD reference was then co-registered to the T1w reference using mri_coreg \
             (FreeSurfer) with {dof} degrees of freedom."
        ),
        (false, true) => format!(
            "The BOLD reference was then co-registered to the T1w reference using FLIRT (FSL) \
             with the boundary-based registration cost-function. \
             Co-registration was configured with {dof} degrees of freedom."
        ),
        (false, false) => format!(
            "The BOLD reference was then co-registered to the T1w reference using FLIRT (FSL) \
             with {dof} degrees of freedom."
        ),
    };
    let mut workflow = Workflow::with_io(REG_WF, &REG_INPUTS, &REG_OUTPUTS).with_description(description);

    workflow.add_node(Node::new("select_transform", SelectTransform::new(settings.use_bbr)).local())?;
    if settings.freesurfer {
        add_bbregister(&mut workflow, dof, bbr, mem)?;
    } else {
        add_flirt_bbr(&mut workflow, dof, bbr, mem)?;
    }

    workflow.add_node(Node::new("reg_report", simple_before_after("RegistrationReport")))?;
    workflow.connect(
        INPUTNODE,
        "reg_report",
        &[("t1_brain", "before"), ("ref_bold_brain", "after"), ("t1_seg", "wm_seg")],
    )?;
    workflow.connect("select_transform", OUTPUTNODE, &[("fallback", "fallback")])?;
    workflow.connect("reg_report", OUTPUTNODE, &[("out_report", "out_report")])?;
    Ok(workflow)
}

fn add_bbregister(workflow: &mut Workflow, dof: u8, bbr: bool, mem: MemoryEstimate) -> Result<(), GraphError> {
    workflow.add_nodes([
        Node::new("mri_coreg", freesurfer::mri_coreg(dof)).with_mem_gb(mem.largemem),
        Node::new("lta_to_itk", freesurfer::lta_convert("itk")).local(),
        Node::new("lta_to_itk_inv", freesurfer::lta_convert("itk").param("invert", true)).local(),
    ])?;
    workflow.connect(
        INPUTNODE,
        "mri_coreg",
        &[
            ("ref_bold_brain", "source_file"),
            ("subjects_dir", "subjects_dir"),
            ("subject_id", "subject_id"),
        ],
    )?;
    workflow.connect("mri_coreg", "select_transform", &[("out_lta_file", "init_xfm")])?;

    if bbr {
        workflow.add_node(Node::new("bbregister", freesurfer::bbregister(dof)).with_mem_gb(mem.largemem))?;
        workflow.connect(
            INPUTNODE,
            "bbregister",
            &[
                ("ref_bold_brain", "source_file"),
                ("subjects_dir", "subjects_dir"),
                ("subject_id", "subject_id"),
            ],
        )?;
        workflow.connect("mri_coreg", "bbregister", &[("out_lta_file", "init_reg_file")])?;
        workflow.connect("bbregister", "select_transform", &[("out_lta_file", "refined_xfm")])?;
    }

    workflow.connect("select_transform", "lta_to_itk", &[("out_xfm", "in_lta")])?;
    workflow.connect("select_transform", "lta_to_itk_inv", &[("out_xfm", "in_lta")])?;
    workflow.connect("lta_to_itk", OUTPUTNODE, &[("out_file", "itk_bold_to_t1")])?;
    workflow.connect("lta_to_itk_inv", OUTPUTNODE, &[("out_file", "itk_t1_to_bold")])?;
    Ok(())
}

fn add_flirt_bbr(workflow: &mut Workflow, dof: u8, bbr: bool, mem: MemoryEstimate) -> Result<(), GraphError> {
    workflow.add_nodes([
        Node::new("flt_bbr_init", fsl::flirt(dof)).with_mem_gb(mem.largemem),
        Node::new("invt_bbr", fsl::invert_xfm()).local(),
        Node::new("fsl2itk_fwd", itk::c3d_affine_tool()).local(),
        Node::new("fsl2itk_inv", itk::c3d_affine_tool()).local(),
    ])?;
    workflow.connect(
        INPUTNODE,
        "flt_bbr_init",
        &[("ref_bold_brain", "in_file"), ("t1_brain", "reference")],
    )?;
    workflow.connect("flt_bbr_init", "select_transform", &[("out_matrix_file", "init_xfm")])?;

    if bbr {
        workflow.add_nodes([
            Node::new("wm_mask", fsl::maths("-thr 3 -bin")),
            Node::new("flt_bbr", fsl::flirt_bbr(dof)).with_mem_gb(mem.largemem),
        ])?;
        workflow.connect(INPUTNODE, "wm_mask", &[("t1_seg", "in_file")])?;
        workflow.connect(
            INPUTNODE,
            "flt_bbr",
            &[("ref_bold_brain", "in_file"), ("t1_brain", "reference")],
        )?;
        workflow.connect("flt_bbr_init", "flt_bbr", &[("out_matrix_file", "in_matrix_file")])?;
        workflow.connect("wm_mask", "flt_bbr", &[("out_file", "wm_seg")])?;
        workflow.connect("flt_bbr", "select_transform", &[("out_matrix_file", "refined_xfm")])?;
    }

    workflow.connect("select_transform", "invt_bbr", &[("out_xfm", "in_file")])?;
    workflow.connect("select_transform", "fsl2itk_fwd", &[("out_xfm", "transform_file")])?;
    workflow.connect(
        INPUTNODE,
        "fsl2itk_fwd",
        &[("t1_brain", "reference_file"), ("ref_bold_brain", "source_file")],
    )?;
    workflow.connect("invt_bbr", "fsl2itk_inv", &[("out_file", "transform_file")])?;
    workflow.connect(
        INPUTNODE,
        "fsl2itk_inv",
        &[("ref_bold_brain", "reference_file"), ("t1_brain", "source_file")],
    )?;
    workflow.connect("fsl2itk_fwd", OUTPUTNODE, &[("itk_transform", "itk_bold_to_t1")])?;
    workflow.connect("fsl2itk_inv", OUTPUTNODE, &[("itk_transform", "itk_t1_to_bold")])?;
    Ok(())
}
