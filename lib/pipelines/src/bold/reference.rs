//! Reference volume of a BOLD series.

use crate::memory::{MemoryEstimate, VOLUME_MEM_GB};
use fmriprep_interfaces::ants::n4;
use fmriprep_interfaces::utility::{estimate_reference_image, validate_image};
use fmriprep_interfaces::{afni, fsl};
use fmriprep_workflow::{GraphError, INPUTNODE, Node, OUTPUTNODE, Workflow};
use serde_json::json;

pub const REFERENCE_WF: &str = "bold_reference_wf";

pub const REFERENCE_OUTPUTS: [&str; 8] = [
    "bold_file",
    "raw_ref_image",
    "skip_vols",
    "algo_dummy_scans",
    "ref_image",
    "ref_image_brain",
    "bold_mask",
    "validation_report",
];

/// Builds `bold_reference_wf`.
///
/// The series is validated, the non-steady-state volumes (or the median
/// of the whole series when there are none) form the raw reference, which
/// is then bias-corrected and skull-stripped. `skip_vols` is the user's
/// dummy scan count when given and the detected count otherwise.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_bold_reference_wf(
    dummy_scans: Option<usize>,
    mem: MemoryEstimate,
) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::with_io(REFERENCE_WF, &["bold_file"], &REFERENCE_OUTPUTS);

    // Only validation and averaging read the whole series.
    workflow.add_nodes([
        Node::new("validate", validate_image()).with_mem_gb(mem.filesize),
        Node::new("gen_ref", estimate_reference_image()).with_mem_gb(mem.filesize),
        Node::new("n4_correct", n4()).with_mem_gb(VOLUME_MEM_GB),
        Node::new("skullstrip_first_pass", fsl::bet(0.2)).with_mem_gb(VOLUME_MEM_GB),
        Node::new("unifize", afni::unifize()).with_mem_gb(VOLUME_MEM_GB),
        Node::new("skullstrip_second_pass", afni::automask()).with_mem_gb(VOLUME_MEM_GB),
        Node::new("combine_masks", fsl::maths("-mul")).with_mem_gb(VOLUME_MEM_GB),
        Node::new("apply_mask", fsl::maths("-mas")).with_mem_gb(VOLUME_MEM_GB),
    ])?;

    workflow.connect(INPUTNODE, "validate", &[("bold_file", "in_file")])?;
    workflow.connect("validate", "gen_ref", &[("out_file", "in_file")])?;
    workflow.connect("gen_ref", "n4_correct", &[("ref_image", "input_image")])?;
    workflow.connect("n4_correct", "skullstrip_first_pass", &[("output_image", "in_file")])?;
    workflow.connect("n4_correct", "unifize", &[("output_image", "in_file")])?;
    workflow.connect("unifize", "skullstrip_second_pass", &[("out_file", "in_file")])?;
    workflow.connect("skullstrip_first_pass", "combine_masks", &[("mask_file", "in_file")])?;
    workflow.connect("skullstrip_second_pass", "combine_masks", &[("out_file", "in_file2")])?;
    workflow.connect("n4_correct", "apply_mask", &[("output_image", "in_file")])?;
    workflow.connect("combine_masks", "apply_mask", &[("out_file", "in_file2")])?;

    workflow.connect(
        "validate",
        OUTPUTNODE,
        &[("out_file", "bold_file"), ("out_report", "validation_report")],
    )?;
    workflow.connect(
        "gen_ref",
        OUTPUTNODE,
        &[
            ("ref_image", "raw_ref_image"),
            ("n_volumes_to_discard", "algo_dummy_scans"),
        ],
    )?;
    match dummy_scans {
        Some(count) => workflow.set_input(OUTPUTNODE, "skip_vols", json!(count))?,
        None => workflow.connect("gen_ref", OUTPUTNODE, &[("n_volumes_to_discard", "skip_vols")])?,
    }
    workflow.connect("n4_correct", OUTPUTNODE, &[("output_image", "ref_image")])?;
    workflow.connect("apply_mask", OUTPUTNODE, &[("out_file", "ref_image_brain")])?;
    workflow.connect("combine_masks", OUTPUTNODE, &[("out_file", "bold_mask")])?;
    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem() -> MemoryEstimate {
        MemoryEstimate::new(0.6, 200)
    }

    #[test]
    fn detected_dummies_feed_skip_vols() {
        let graph = init_bold_reference_wf(None, mem()).expect("build").flatten().expect("valid");
        let (source, _) = graph.source_of(OUTPUTNODE, "skip_vols").expect("edge");
        assert_eq!(source, "gen_ref");
    }

    #[test]
    fn declared_dummies_override_detection() {
        let graph = init_bold_reference_wf(Some(3), mem()).expect("build").flatten().expect("valid");
        assert!(graph.source_of(OUTPUTNODE, "skip_vols").is_none());
        assert_eq!(graph.node(OUTPUTNODE).expect("outputnode").inputs["skip_vols"], 3);
        assert!(graph.source_of(OUTPUTNODE, "algo_dummy_scans").is_some());
    }

    #[test]
    fn every_node_carries_a_budget() {
        let graph = init_bold_reference_wf(None, mem()).expect("build").flatten().expect("valid");
        for name in ["validate", "gen_ref"] {
            let node = graph.node(name).expect("node");
            assert!((node.mem_gb - 0.6).abs() < 1e-12, "{name}");
        }
        for name in ["n4_correct", "unifize", "combine_masks", "apply_mask"] {
            let node = graph.node(name).expect("node");
            assert!((node.mem_gb - VOLUME_MEM_GB).abs() < 1e-12, "{name}");
        }
    }
}
