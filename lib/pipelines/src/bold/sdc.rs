//! Susceptibility distortion correction.
//!
//! Every correction workflow ends the same way: the estimated displacement
//! field is applied to the BOLD reference, which is then skull-stripped
//! again. Their outputnodes share the [`SDC_OUTPUTS`] fields so the run
//! workflow can consume any of them.

use crate::memory::MemoryEstimate;
use fmriprep_core::{Fieldmap, PhaseEncodingDirection};
use fmriprep_interfaces::utility::{copy_xform, estimate_reference_image, field_enhance, merge_series};
use fmriprep_interfaces::{afni, ants, fsl, itk};
use fmriprep_workflow::{GraphError, INPUTNODE, Node, OUTPUTNODE, Workflow};
use serde_json::json;
use std::path::{Path, PathBuf};

pub const SDC_OUTPUTS: [&str; 4] = ["out_warp", "out_reference", "out_reference_brain", "out_mask"];

/// Fields of the estimation workflows that feed `sdc_unwarp_wf`.
pub const FMAP_OUTPUTS: [&str; 3] = ["fmap", "fmap_ref", "fmap_mask"];

pub const PEPOLAR_WF: &str = "pepolar_unwarp_wf";
pub const PHDIFF_WF: &str = "phdiff_wf";
pub const FMAP_WF: &str = "fmap_wf";
pub const UNWARP_WF: &str = "sdc_unwarp_wf";
pub const SYN_WF: &str = "syn_sdc_wf";

/// FSL notation of a phase-encoding direction (`y-`).
#[must_use]
pub fn fsl_direction(pe: Option<PhaseEncodingDirection>) -> String {
    pe.map_or_else(
        || "y".to_string(),
        |pe| {
            let axis = ["x", "y", "z"][usize::from(pe.axis.min(2))];
            format!("{axis}{}", if pe.reversed { "-" } else { "" })
        },
    )
}

/// Applies `warp` to the reference and masks the result.
fn add_unwarped_reference(workflow: &mut Workflow, warp: (&str, &str)) -> Result<(), GraphError> {
    workflow.add_nodes([
        Node::new("unwarp_reference", ants::apply_transforms("LanczosWindowedSinc")),
        Node::new("unwarp_mask", afni::automask()),
        Node::new("unwarp_brain", fsl::maths("-mas")),
    ])?;
    workflow.connect(
        INPUTNODE,
        "unwarp_reference",
        &[("in_reference", "input_image"), ("in_reference", "reference_image")],
    )?;
    workflow.connect(warp.0, "unwarp_reference", &[(warp.1, "transforms")])?;
    workflow.connect("unwarp_reference", "unwarp_mask", &[("output_image", "in_file")])?;
    workflow.connect("unwarp_reference", "unwarp_brain", &[("output_image", "in_file")])?;
    workflow.connect("unwarp_mask", "unwarp_brain", &[("out_file", "in_file2")])?;

    workflow.connect(warp.0, OUTPUTNODE, &[(warp.1, "out_warp")])?;
    workflow.connect("unwarp_reference", OUTPUTNODE, &[("output_image", "out_reference")])?;
    workflow.connect("unwarp_brain", OUTPUTNODE, &[("out_file", "out_reference_brain")])?;
    workflow.connect("unwarp_mask", OUTPUTNODE, &[("out_file", "out_mask")])?;
    Ok(())
}

/// Builds `pepolar_unwarp_wf` from EPI references acquired with the
/// opposite phase-encoding direction.
///
/// # Errors
///
/// Returns [`GraphError::RequiredInputMissing`] when `epi_files` is empty.
pub fn init_pepolar_unwarp_wf(epi_files: &[PathBuf], omp_nthreads: usize) -> Result<Workflow, GraphError> {
    let Some(first) = epi_files.first() else {
        return Err(GraphError::RequiredInputMissing {
            node: format!("{PEPOLAR_WF}.merge_epis"),
            port: "in_files".to_string(),
        });
    };
    let mut workflow = Workflow::with_io(
        PEPOLAR_WF,
        &["in_reference", "in_reference_brain", "in_mask"],
        &SDC_OUTPUTS,
    )
    .with_description(
        "A deformation field to correct for susceptibility distortions was estimated \
         based on two echo-planar imaging references with opposing phase-encoding \
         directions, using 3dQwarp (AFNI).",
    );

    let paths: Vec<String> = epi_files.iter().map(|p| p.display().to_string()).collect();
    workflow.add_nodes([
        Node::new("merge_epis", merge_series(true))
            .with_input("in_files", json!(paths))
            .with_input("header_source", first.display().to_string()),
        Node::new("epi_reference", estimate_reference_image()),
        Node::new("qwarp", afni::qwarp()).with_threads(omp_nthreads),
        Node::new("cphdr_warp", copy_xform()).local(),
    ])?;
    workflow.connect("merge_epis", "epi_reference", &[("out_file", "in_file")])?;
    workflow.connect("epi_reference", "qwarp", &[("ref_image", "in_file")])?;
    workflow.connect(INPUTNODE, "qwarp", &[("in_reference_brain", "base_file")])?;
    workflow.connect("qwarp", "cphdr_warp", &[("source_warp", "in_file")])?;
    workflow.connect(INPUTNODE, "cphdr_warp", &[("in_reference", "hdr_file")])?;

    add_unwarped_reference(&mut workflow, ("cphdr_warp", "out_file"))?;
    Ok(workflow)
}

/// Magnitude preparation shared by the fieldmap estimation workflows.
fn add_magnitude(workflow: &mut Workflow, magnitude: &Path) -> Result<(), GraphError> {
    workflow.add_nodes([
        Node::new("n4_magnitude", ants::n4())
            .with_input("input_image", magnitude.display().to_string()),
        Node::new("bet_magnitude", fsl::bet(0.6)),
    ])?;
    workflow.connect("n4_magnitude", "bet_magnitude", &[("output_image", "in_file")])?;
    workflow.connect("n4_magnitude", OUTPUTNODE, &[("output_image", "fmap_ref")])?;
    workflow.connect("bet_magnitude", OUTPUTNODE, &[("mask_file", "fmap_mask")])?;
    Ok(())
}

/// Builds `phdiff_wf`: unwraps the phase difference and converts it to a
/// fieldmap in Hz.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_phdiff_wf(phasediff: &Path, magnitude: &Path, bspline: bool, demean: bool) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::with_io(PHDIFF_WF, &[] as &[&str], &FMAP_OUTPUTS).with_description(
        "A deformation field to correct for susceptibility distortions was estimated \
         based on a field map that was co-registered to the BOLD reference, \
         using a phase-difference map.",
    );
    add_magnitude(&mut workflow, magnitude)?;
    workflow.add_nodes([
        Node::new("prelude", fsl::prelude()).with_input("phase_file", phasediff.display().to_string()),
        Node::new("compfmap", fsl::phasediff_to_fieldmap()),
        Node::new("fmap_postproc", field_enhance(bspline, demean)),
    ])?;
    workflow.connect(
        "n4_magnitude",
        "prelude",
        &[("output_image", "magnitude_file")],
    )?;
    workflow.connect("bet_magnitude", "prelude", &[("mask_file", "mask_file")])?;
    workflow.connect("prelude", "compfmap", &[("unwrapped_phase_file", "in_phase")])?;
    workflow.connect("n4_magnitude", "compfmap", &[("output_image", "in_magnitude")])?;
    workflow.connect("compfmap", "fmap_postproc", &[("out_fieldmap", "in_file")])?;
    workflow.connect("bet_magnitude", "fmap_postproc", &[("mask_file", "in_mask")])?;
    workflow.connect("fmap_postproc", OUTPUTNODE, &[("out_file", "fmap")])?;
    Ok(workflow)
}

/// Builds `fmap_wf` for a fieldmap measured directly in Hz.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_fmap_wf(fieldmap: &Path, magnitude: &Path, bspline: bool, demean: bool) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::with_io(FMAP_WF, &[] as &[&str], &FMAP_OUTPUTS).with_description(
        "A deformation field to correct for susceptibility distortions was estimated \
         based on a field map that was co-registered to the BOLD reference.",
    );
    add_magnitude(&mut workflow, magnitude)?;
    workflow.add_node(
        Node::new("fmap_postproc", field_enhance(bspline, demean))
            .with_input("in_file", fieldmap.display().to_string()),
    )?;
    workflow.connect("bet_magnitude", "fmap_postproc", &[("mask_file", "in_mask")])?;
    workflow.connect("fmap_postproc", OUTPUTNODE, &[("out_file", "fmap")])?;
    Ok(workflow)
}

/// Builds `sdc_unwarp_wf`: aligns a fieldmap to the BOLD reference and
/// turns it into a displacement field along the phase-encoding axis.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_sdc_unwarp_wf(
    pe: Option<PhaseEncodingDirection>,
    mem: MemoryEstimate,
    omp_nthreads: usize,
) -> Result<Workflow, GraphError> {
    let mut inputs = vec!["in_reference", "in_reference_brain", "in_mask"];
    inputs.extend(FMAP_OUTPUTS);
    let mut workflow = Workflow::with_io(UNWARP_WF, inputs.as_slice(), &SDC_OUTPUTS);
    let direction = fsl_direction(pe);

    workflow.add_nodes([
        Node::new("fmap2ref_reg", ants::registration("fmap-any_registration.json"))
            .with_mem_gb(mem.largemem)
            .with_threads(omp_nthreads),
        Node::new("fmap2ref_apply", ants::apply_transforms("BSpline")).with_mem_gb(mem.resampled),
        Node::new("vsm", fsl::fugue(&direction)),
        Node::new("vsm2dfm", fsl::convert_warp(&direction)),
    ])?;
    workflow.connect(
        INPUTNODE,
        "fmap2ref_reg",
        &[
            ("in_reference_brain", "fixed_image"),
            ("fmap_ref", "moving_image"),
            ("fmap_mask", "moving_image_masks"),
        ],
    )?;
    workflow.connect(
        INPUTNODE,
        "fmap2ref_apply",
        &[("fmap", "input_image"), ("in_reference", "reference_image")],
    )?;
    workflow.connect("fmap2ref_reg", "fmap2ref_apply", &[("forward_transforms", "transforms")])?;
    workflow.connect("fmap2ref_apply", "vsm", &[("output_image", "fmap_in_file")])?;
    workflow.connect(INPUTNODE, "vsm", &[("in_mask", "mask_file")])?;
    workflow.connect("vsm", "vsm2dfm", &[("shift_out_file", "shift_in_file")])?;
    workflow.connect(INPUTNODE, "vsm2dfm", &[("in_reference", "reference")])?;

    add_unwarped_reference(&mut workflow, ("vsm2dfm", "out_file"))?;
    Ok(workflow)
}

/// Builds the estimation workflow of `fieldmap` and, for Hz fieldmaps,
/// `sdc_unwarp_wf` inside `workflow`. Returns the member exposing
/// [`SDC_OUTPUTS`], whose `in_reference*` and `in_mask` inputs are left for
/// the caller to feed.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn add_fieldmap_correction(
    workflow: &mut Workflow,
    fieldmap: &Fieldmap,
    pe: Option<PhaseEncodingDirection>,
    bspline: bool,
    demean: bool,
    mem: MemoryEstimate,
    omp_nthreads: usize,
) -> Result<&'static str, GraphError> {
    let estimate = match fieldmap {
        Fieldmap::Epi { epi_files } => {
            workflow.add_workflow(init_pepolar_unwarp_wf(epi_files, omp_nthreads)?)?;
            return Ok(PEPOLAR_WF);
        }
        Fieldmap::Direct { fieldmap, magnitude } => init_fmap_wf(fieldmap, magnitude, bspline, demean)?,
        Fieldmap::Phasediff {
            phasediff,
            magnitude1,
            ..
        } => init_phdiff_wf(phasediff, magnitude1, bspline, demean)?,
    };
    let estimate_name = estimate.name().to_string();
    workflow.add_workflow(estimate)?;
    workflow.add_workflow(init_sdc_unwarp_wf(pe, mem, omp_nthreads)?)?;
    workflow.connect(
        &estimate_name,
        UNWARP_WF,
        &FMAP_OUTPUTS.map(|field| (field, field)),
    )?;
    Ok(UNWARP_WF)
}

/// Builds `syn_sdc_wf`: fieldmap-less correction by nonlinear registration
/// of the BOLD reference to the intensity-inverted T1w, restricted to the
/// phase-encoding axis.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_syn_sdc_wf(
    pe: PhaseEncodingDirection,
    mem: MemoryEstimate,
    omp_nthreads: usize,
) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::with_io(
        SYN_WF,
        &["in_reference", "in_reference_brain", "in_mask", "t1_brain"],
        &SDC_OUTPUTS,
    )
    .with_description(
        "A deformation field to correct for susceptibility distortions was estimated \
         by co-registering the BOLD reference to the same-subject T1w reference with \
         its intensity inverted, restricted to the phase-encoding direction.",
    );

    workflow.add_nodes([
        Node::new("invert_t1w", fsl::maths("-mul -1 -add 1")),
        Node::new("ref_2_t1", fsl::flirt(6)),
        Node::new("t1_2_ref", fsl::invert_xfm()).local(),
        Node::new("fsl2itk", itk::c3d_affine_tool()).local(),
        Node::new("transform_t1_to_ref", ants::apply_transforms("Linear")),
        Node::new("syn", ants::syn_sdc(usize::from(pe.axis)))
            .with_mem_gb(mem.largemem)
            .with_threads(omp_nthreads),
    ])?;
    workflow.connect(INPUTNODE, "invert_t1w", &[("t1_brain", "in_file")])?;
    workflow.connect(INPUTNODE, "ref_2_t1", &[("in_reference_brain", "in_file")])?;
    workflow.connect("invert_t1w", "ref_2_t1", &[("out_file", "reference")])?;
    workflow.connect("ref_2_t1", "t1_2_ref", &[("out_matrix_file", "in_file")])?;
    workflow.connect("t1_2_ref", "fsl2itk", &[("out_file", "transform_file")])?;
    workflow.connect(INPUTNODE, "fsl2itk", &[("in_reference", "reference_file")])?;
    workflow.connect("invert_t1w", "fsl2itk", &[("out_file", "source_file")])?;
    workflow.connect("invert_t1w", "transform_t1_to_ref", &[("out_file", "input_image")])?;
    workflow.connect(INPUTNODE, "transform_t1_to_ref", &[("in_reference", "reference_image")])?;
    workflow.connect("fsl2itk", "transform_t1_to_ref", &[("itk_transform", "transforms")])?;
    workflow.connect("transform_t1_to_ref", "syn", &[("output_image", "fixed_image")])?;
    workflow.connect(
        INPUTNODE,
        "syn",
        &[("in_reference_brain", "moving_image"), ("in_mask", "moving_image_masks")],
    )?;

    add_unwarped_reference(&mut workflow, ("syn", "forward_transforms"))?;
    Ok(workflow)
}
