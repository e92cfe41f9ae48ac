//! One-shot resampling of the BOLD series.
//!
//! Each target space gets a single interpolation step per volume: the
//! head-motion transform, the optional susceptibility warp, the BOLD to
//! T1w affine and (for templates) the T1w to template warp are composed
//! into one chain applied to the split series.

use crate::memory::{
    MemoryEstimate, SAMPLING_REFERENCE_MEM_GB, TEMPLATE_MASK_MEM_GB, VOLUME_MEM_GB,
};
use fmriprep_core::{Reference, Space};
use fmriprep_interfaces::ants::{apply_transforms_nn, multi_apply_transforms};
use fmriprep_interfaces::utility::{estimate_reference_image, generate_sampling_reference, merge_series};
use fmriprep_interfaces::{KeySelect, Merge};
use fmriprep_workflow::{GraphError, INPUTNODE, Node, OUTPUTNODE, Workflow};
use std::fmt::Write as _;

pub const NATIVE_WF: &str = "bold_bold_trans_wf";
pub const T1_WF: &str = "bold_t1_trans_wf";
pub const STD_WF: &str = "bold_std_trans_wf";

pub const NATIVE_INPUTS: [&str; 5] = ["bold_split", "fieldwarp", "hmc_xforms", "bold_ref", "bold_mask"];
pub const NATIVE_OUTPUTS: [&str; 3] = ["bold", "bold_ref", "bold_mask"];

pub const T1_INPUTS: [&str; 7] = [
    "bold_split",
    "fieldwarp",
    "hmc_xforms",
    "itk_bold_to_t1",
    "t1_brain",
    "ref_bold_brain",
    "ref_bold_mask",
];
pub const T1_OUTPUTS: [&str; 3] = ["bold_t1", "bold_t1_ref", "bold_mask_t1"];

pub const STD_INPUTS: [&str; 6] = [
    "anat2std_xfm",
    "bold_split",
    "fieldwarp",
    "hmc_xforms",
    "itk_bold_to_t1",
    "bold_mask",
];
pub const STD_OUTPUTS: [&str; 4] = ["bold_std", "bold_std_ref", "bold_mask_std", "templates"];

/// Brain-extracted reference of a template, relative to the template cache.
#[must_use]
pub fn template_reference(space: &Space) -> String {
    let name = space.name();
    let mut file = format!("tpl-{name}/tpl-{name}");
    for (key, value) in space.extra_entities() {
        let _ = write!(file, "_{key}-{value}");
    }
    file.push_str("_desc-brain_T1w.nii.gz");
    file
}

/// Adds the transform list, the per-volume resampler, the merge and the
/// reference of the result, all suffixed with `suffix`.
///
/// `chain` lists the transform sources in application order (outermost
/// first); `None` entries leave their slot empty.
fn add_resampler(
    workflow: &mut Workflow,
    suffix: &str,
    chain: &[Option<(&str, &str)>],
    reference: (&str, &str),
    mem: MemoryEstimate,
    compress: bool,
) -> Result<(), GraphError> {
    let merge_xforms = format!("merge_xforms{suffix}");
    let transform = format!("bold_transform{suffix}");
    let merge = format!("merge{suffix}");
    let final_ref = format!("gen_final_ref{suffix}");

    workflow.add_nodes([
        Node::new(merge_xforms.as_str(), Merge::new(chain.len())).local(),
        Node::new(transform.as_str(), multi_apply_transforms()).with_mem_gb(mem.resampled),
        Node::new(merge.as_str(), merge_series(compress)).with_mem_gb(mem.resampled),
        Node::new(final_ref.as_str(), estimate_reference_image()).with_mem_gb(mem.resampled),
    ])?;
    for (slot, source) in chain.iter().enumerate() {
        if let Some((node, port)) = *source {
            workflow.connect(node, &merge_xforms, &[(port, format!("in{}", slot + 1).as_str())])?;
        }
    }
    workflow.connect(INPUTNODE, &transform, &[("bold_split", "input_image")])?;
    workflow.connect(reference.0, &transform, &[(reference.1, "reference_image")])?;
    workflow.connect(&merge_xforms, &transform, &[("out", "transforms")])?;
    workflow.connect(&transform, &merge, &[("out_files", "in_files")])?;
    workflow.connect(reference.0, &merge, &[(reference.1, "header_source")])?;
    workflow.connect(&merge, &final_ref, &[("out_file", "in_file")])?;
    Ok(())
}

/// Builds `bold_bold_trans_wf`: the series corrected for head motion and
/// susceptibility distortions in its own space.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_bold_preproc_trans_wf(
    mem: MemoryEstimate,
    use_fieldwarp: bool,
    low_mem: bool,
) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::with_io(NATIVE_WF, &NATIVE_INPUTS, &NATIVE_OUTPUTS);
    let fieldwarp = use_fieldwarp.then_some((INPUTNODE, "fieldwarp"));
    add_resampler(
        &mut workflow,
        "",
        &[fieldwarp, Some((INPUTNODE, "hmc_xforms"))],
        (INPUTNODE, "bold_ref"),
        mem,
        !low_mem,
    )?;
    workflow.connect("merge", OUTPUTNODE, &[("out_file", "bold")])?;
    workflow.connect("gen_final_ref", OUTPUTNODE, &[("ref_image", "bold_ref")])?;
    workflow.connect(INPUTNODE, OUTPUTNODE, &[("bold_mask", "bold_mask")])?;
    Ok(workflow)
}

/// Builds `bold_t1_trans_wf`: the series on a T1w-aligned grid with the
/// BOLD resolution.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_bold_t1_trans_wf(
    mem: MemoryEstimate,
    use_fieldwarp: bool,
    low_mem: bool,
) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::with_io(T1_WF, &T1_INPUTS, &T1_OUTPUTS);
    workflow.add_nodes([
        Node::new("gen_ref", generate_sampling_reference()).with_mem_gb(SAMPLING_REFERENCE_MEM_GB),
        Node::new("mask_t1w_tfm", apply_transforms_nn()).with_mem_gb(VOLUME_MEM_GB),
    ])?;
    workflow.connect(
        INPUTNODE,
        "gen_ref",
        &[
            ("ref_bold_brain", "moving_image"),
            ("t1_brain", "fixed_image"),
        ],
    )?;
    workflow.connect(
        INPUTNODE,
        "mask_t1w_tfm",
        &[("ref_bold_mask", "input_image"), ("itk_bold_to_t1", "transforms")],
    )?;
    workflow.connect("gen_ref", "mask_t1w_tfm", &[("out_file", "reference_image")])?;

    let fieldwarp = use_fieldwarp.then_some((INPUTNODE, "fieldwarp"));
    add_resampler(
        &mut workflow,
        "",
        &[
            Some((INPUTNODE, "itk_bold_to_t1")),
            fieldwarp,
            Some((INPUTNODE, "hmc_xforms")),
        ],
        ("gen_ref", "out_file"),
        mem,
        !low_mem,
    )?;
    workflow.connect("merge", OUTPUTNODE, &[("out_file", "bold_t1")])?;
    workflow.connect("gen_final_ref", OUTPUTNODE, &[("ref_image", "bold_t1_ref")])?;
    workflow.connect("mask_t1w_tfm", OUTPUTNODE, &[("output_image", "bold_mask_t1")])?;
    Ok(workflow)
}

/// Builds `bold_std_trans_wf` with one resampler per template reference.
///
/// `anat2std_xfm` holds one T1w to template transform per entry of
/// `templates`, in the same order. The list outputs follow that order and
/// `templates` carries the canonical names.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_bold_std_trans_wf(
    templates: &[&Reference],
    mem: MemoryEstimate,
    use_fieldwarp: bool,
    low_mem: bool,
) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::with_io(STD_WF, &STD_INPUTS, &STD_OUTPUTS).with_description(format!(
        "The BOLD time-series were resampled into standard space, generating the following \
         spatially-normalized, preprocessed BOLD runs: {}. All resamplings were performed \
         with a single interpolation step by composing all the pertinent transformations.",
        templates
            .iter()
            .map(|r| r.space.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    let keys: Vec<String> = templates.iter().map(|r| r.space.to_string()).collect();

    let n = templates.len();
    workflow.add_nodes([
        Node::new("join_bold", Merge::new(n)).local(),
        Node::new("join_ref", Merge::new(n)).local(),
        Node::new("join_mask", Merge::new(n)).local(),
    ])?;

    for (i, reference) in templates.iter().enumerate() {
        let tag = reference.space.tag();
        let suffix = format!("_{tag}");
        let select = format!("select_std{suffix}");
        let gen_ref = format!("gen_ref{suffix}");
        let mask_xforms = format!("mask_merge_tfms{suffix}");
        let mask_tfm = format!("mask_std_tfm{suffix}");
        let slot = format!("in{}", i + 1);

        workflow.add_nodes([
            Node::new(select.as_str(), KeySelect::new(&keys))
                .with_input("key", reference.space.to_string())
                .local(),
            Node::new(gen_ref.as_str(), generate_sampling_reference())
                .with_input("fixed_image", template_reference(&reference.space))
                .with_mem_gb(SAMPLING_REFERENCE_MEM_GB),
            Node::new(mask_xforms.as_str(), Merge::new(2)).local(),
            Node::new(mask_tfm.as_str(), apply_transforms_nn()).with_mem_gb(TEMPLATE_MASK_MEM_GB),
        ])?;
        workflow.connect(INPUTNODE, &select, &[("anat2std_xfm", "values")])?;
        workflow.connect(INPUTNODE, &gen_ref, &[("bold_mask", "moving_image")])?;
        workflow.connect(&select, &mask_xforms, &[("value", "in1")])?;
        workflow.connect(INPUTNODE, &mask_xforms, &[("itk_bold_to_t1", "in2")])?;
        workflow.connect(INPUTNODE, &mask_tfm, &[("bold_mask", "input_image")])?;
        workflow.connect(&gen_ref, &mask_tfm, &[("out_file", "reference_image")])?;
        workflow.connect(&mask_xforms, &mask_tfm, &[("out", "transforms")])?;

        let fieldwarp = use_fieldwarp.then_some((INPUTNODE, "fieldwarp"));
        add_resampler(
            &mut workflow,
            &suffix,
            &[
                Some((select.as_str(), "value")),
                Some((INPUTNODE, "itk_bold_to_t1")),
                fieldwarp,
                Some((INPUTNODE, "hmc_xforms")),
            ],
            (gen_ref.as_str(), "out_file"),
            mem,
            !low_mem,
        )?;
        workflow.connect(&format!("merge{suffix}"), "join_bold", &[("out_file", slot.as_str())])?;
        workflow.connect(
            &format!("gen_final_ref{suffix}"),
            "join_ref",
            &[("ref_image", slot.as_str())],
        )?;
        workflow.connect(&mask_tfm, "join_mask", &[("output_image", slot.as_str())])?;
    }

    workflow.connect("join_bold", OUTPUTNODE, &[("out", "bold_std")])?;
    workflow.connect("join_ref", OUTPUTNODE, &[("out", "bold_std_ref")])?;
    workflow.connect("join_mask", OUTPUTNODE, &[("out", "bold_mask_std")])?;
    workflow.set_input(OUTPUTNODE, "templates", serde_json::json!(keys))?;
    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmriprep_core::SpatialReferences;

    #[test]
    fn template_reference_carries_modifiers() {
        assert_eq!(
            template_reference(&Space::template_res("MNI152NLin6Asym", "2")),
            "tpl-MNI152NLin6Asym/tpl-MNI152NLin6Asym_res-2_desc-brain_T1w.nii.gz"
        );
    }

    #[test]
    fn template_chain_is_composed_in_order() {
        let spaces = SpatialReferences::parse("MNI152NLin2009cAsym MNI152NLin6Asym:res-2").expect("spaces");
        let templates = spaces.templates();
        let graph = init_bold_std_trans_wf(&templates, MemoryEstimate::new(0.5, 100), true, false)
            .expect("build")
            .flatten()
            .expect("valid");

        let merge = "merge_xforms_MNI152NLin2009cAsym";
        let sources: Vec<(String, String)> = ["in1", "in2", "in3", "in4"]
            .iter()
            .map(|port| {
                let (node, edge) = graph.source_of(merge, port).expect("slot fed");
                (node.to_string(), edge.source_port.clone())
            })
            .collect();
        assert_eq!(sources[0], ("select_std_MNI152NLin2009cAsym".to_string(), "value".to_string()));
        assert_eq!(sources[1].1, "itk_bold_to_t1");
        assert_eq!(sources[2].1, "fieldwarp");
        assert_eq!(sources[3].1, "hmc_xforms");

        assert!(graph.contains("bold_transform_MNI152NLin6Asym_res2"));
        let (source, _) = graph.source_of("join_bold", "in2").expect("second template");
        assert_eq!(source, "merge_MNI152NLin6Asym_res2");
    }

    #[test]
    fn fieldwarp_slot_stays_empty_without_correction() {
        let graph = init_bold_t1_trans_wf(MemoryEstimate::new(0.5, 100), false, true)
            .expect("build")
            .flatten()
            .expect("valid");
        assert!(graph.source_of("merge_xforms", "in2").is_none());
        assert!(graph.source_of("merge_xforms", "in3").is_some());
        assert_eq!(graph.node("merge").expect("merge").interface.parameters()["compress"], false);
    }

    #[test]
    fn resamplers_use_the_resampled_budget() {
        let mem = MemoryEstimate::new(0.5, 100);
        let graph = init_bold_preproc_trans_wf(mem, true, false)
            .expect("build")
            .flatten()
            .expect("valid");
        let annotated = graph.node("bold_transform").expect("node").mem_gb;
        assert!((annotated - mem.resampled).abs() < 1e-12);
    }
}
