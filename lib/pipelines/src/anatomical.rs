//! Anatomical preprocessing as seen by the functional workflows.
//!
//! Only the `outputnode` of `anat_preproc_wf` is a contract: the run
//! workflows read the T1w reference, brain mask, tissue segmentation and
//! probability maps, the T1w to template transforms (one per template, in
//! the order of [`SpatialReferences::templates`]) and, with FreeSurfer,
//! the subject directory and the T1w to `fsnative` registration.

use crate::bold::resampling::template_reference;
use fmriprep_core::SpatialReferences;
use fmriprep_interfaces::reports::segmentation_report;
use fmriprep_interfaces::{DerivativesDataSink, Merge, ants, freesurfer, fsl};
use fmriprep_workflow::{Adapter, GraphError, INPUTNODE, Node, OUTPUTNODE, Workflow};
use std::path::Path;

pub const ANAT_WF: &str = "anat_preproc_wf";

pub const ANAT_INPUTS: [&str; 3] = ["t1w", "subjects_dir", "subject_id"];

/// Fields produced whatever the configuration.
pub const ANAT_OUTPUTS: [&str; 5] = ["t1_preproc", "t1_brain", "t1_mask", "t1_seg", "t1_tpms"];

/// Fields produced when templates are requested.
pub const TEMPLATE_OUTPUTS: [&str; 2] = ["t1_to_template_forward", "t1_to_template_reverse"];

/// Fields produced with FreeSurfer.
pub const FREESURFER_OUTPUTS: [&str; 3] = ["subjects_dir", "subject_id", "t1_to_fsnative_forward"];

/// FAST probability maps, in output order.
const TISSUE_LABELS: [&str; 3] = ["CSF", "GM", "WM"];

/// Builds `anat_preproc_wf`.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_anat_preproc_wf(
    spaces: &SpatialReferences,
    freesurfer: bool,
    output_dir: &Path,
    reportlets_dir: &Path,
    source_file: &Path,
    omp_nthreads: usize,
) -> Result<Workflow, GraphError> {
    let templates = spaces.templates();
    let mut outputs = ANAT_OUTPUTS.to_vec();
    if !templates.is_empty() {
        outputs.extend(TEMPLATE_OUTPUTS);
    }
    if freesurfer {
        outputs.extend(FREESURFER_OUTPUTS);
    }
    let mut workflow = Workflow::with_io(ANAT_WF, &ANAT_INPUTS, outputs.as_slice()).with_description(
        "The T1-weighted image was corrected for intensity non-uniformity with N4BiasFieldCorrection, \
         skull-stripped, and segmented into cerebrospinal fluid, white matter and gray matter \
         with FAST.",
    );
    let source = source_file.display().to_string();

    workflow.add_nodes([
        Node::new("t1_n4", ants::n4()).with_threads(omp_nthreads),
        Node::new("skull_strip", fsl::bet(0.5)),
        Node::new("t1_seg", fsl::fast()).with_mem_gb(3.0),
        Node::new("seg_report", segmentation_report()),
        Node::new("ds_report_seg", DerivativesDataSink::figures(reportlets_dir).with_suffix("dseg"))
            .with_input("source_file", source.clone())
            .local(),
    ])?;
    workflow.connect_with(INPUTNODE, "t1w", "t1_n4", "input_image", Adapter::First)?;
    workflow.connect("t1_n4", "skull_strip", &[("output_image", "in_file")])?;
    workflow.connect("skull_strip", "t1_seg", &[("out_file", "in_files")])?;
    workflow.connect("t1_n4", "seg_report", &[("output_image", "in_file")])?;
    workflow.connect("t1_seg", "seg_report", &[("tissue_class_map", "in_seg")])?;
    workflow.connect("skull_strip", "seg_report", &[("mask_file", "in_mask")])?;
    workflow.connect("seg_report", "ds_report_seg", &[("out_report", "in_file")])?;

    workflow.connect("t1_n4", OUTPUTNODE, &[("output_image", "t1_preproc")])?;
    workflow.connect(
        "skull_strip",
        OUTPUTNODE,
        &[("out_file", "t1_brain"), ("mask_file", "t1_mask")],
    )?;
    workflow.connect(
        "t1_seg",
        OUTPUTNODE,
        &[("tissue_class_map", "t1_seg"), ("probability_maps", "t1_tpms")],
    )?;

    let derivatives = [
        (
            "ds_t1_preproc",
            DerivativesDataSink::new(output_dir, "anat").with_desc("preproc").with_suffix("T1w"),
            ("t1_n4", "output_image"),
        ),
        (
            "ds_t1_mask",
            DerivativesDataSink::new(output_dir, "anat").with_desc("brain").with_suffix("mask"),
            ("skull_strip", "mask_file"),
        ),
        (
            "ds_t1_seg",
            DerivativesDataSink::new(output_dir, "anat").with_suffix("dseg"),
            ("t1_seg", "tissue_class_map"),
        ),
        (
            "ds_t1_tpms",
            DerivativesDataSink::new(output_dir, "anat")
                .with_suffix("probseg")
                .per_item("label", &TISSUE_LABELS),
            ("t1_seg", "probability_maps"),
        ),
    ];
    for (name, sink, (node, port)) in derivatives {
        workflow.add_node(Node::new(name, sink).with_input("source_file", source.clone()).local())?;
        workflow.connect(node, name, &[(port, "in_file")])?;
    }

    if !templates.is_empty() {
        let n = templates.len();
        workflow.add_nodes([
            Node::new("merge_forward", Merge::new(n)).local(),
            Node::new("merge_reverse", Merge::new(n)).local(),
        ])?;
        for (i, reference) in templates.iter().enumerate() {
            let tag = reference.space.tag();
            let norm = format!("anat_norm_{tag}");
            let slot = format!("in{}", i + 1);
            workflow.add_node(
                Node::new(norm.as_str(), ants::registration("t1w-mni_registration.json"))
                    .with_input("fixed_image", template_reference(&reference.space))
                    .with_mem_gb(2.0)
                    .with_threads(omp_nthreads),
            )?;
            workflow.connect("skull_strip", &norm, &[("out_file", "moving_image")])?;
            workflow.connect(&norm, "merge_forward", &[("composite_transform", slot.as_str())])?;
            workflow.connect(&norm, "merge_reverse", &[("inverse_composite_transform", slot.as_str())])?;

            if reference.output {
                let sink = format!("ds_t1_template_{tag}");
                workflow.add_node(
                    Node::new(
                        sink.as_str(),
                        DerivativesDataSink::new(output_dir, "anat")
                            .with_entity("from", "T1w")
                            .with_entity("to", reference.space.name())
                            .with_entity("mode", "image")
                            .with_suffix("xfm")
                            .with_extension(".h5"),
                    )
                    .with_input("source_file", source.clone())
                    .local(),
                )?;
                workflow.connect(&norm, &sink, &[("composite_transform", "in_file")])?;
            }
        }
        workflow.connect("merge_forward", OUTPUTNODE, &[("out", "t1_to_template_forward")])?;
        workflow.connect("merge_reverse", OUTPUTNODE, &[("out", "t1_to_template_reverse")])?;
    }

    if freesurfer {
        workflow.add_nodes([
            Node::new("autorecon", freesurfer::recon_all())
                .with_mem_gb(5.0)
                .with_threads(omp_nthreads),
            Node::new("t1_2_fsnative", freesurfer::mri_coreg(6)),
        ])?;
        workflow.connect(
            INPUTNODE,
            "autorecon",
            &[
                ("t1w", "T1_files"),
                ("subjects_dir", "subjects_dir"),
                ("subject_id", "subject_id"),
            ],
        )?;
        workflow.connect("t1_n4", "t1_2_fsnative", &[("output_image", "source_file")])?;
        workflow.connect(
            "autorecon",
            "t1_2_fsnative",
            &[("subjects_dir", "subjects_dir"), ("subject_id", "subject_id")],
        )?;
        workflow.connect(
            "autorecon",
            OUTPUTNODE,
            &[("subjects_dir", "subjects_dir"), ("subject_id", "subject_id")],
        )?;
        workflow.connect("t1_2_fsnative", OUTPUTNODE, &[("out_lta_file", "t1_to_fsnative_forward")])?;
    }

    Ok(workflow)
}
