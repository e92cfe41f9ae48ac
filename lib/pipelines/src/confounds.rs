//! Nuisance regressors of one BOLD run.
//!
//! The regressor core (motion, FD, DVARS, region means, non-steady-state
//! indicators and both CompCor variants) only contains in-process
//! operations and can be added to any workflow that provides the series,
//! its brain mask, the motion parameters and four BOLD-space masks. The
//! full confounds workflow derives those masks from the anatomical tissue
//! maps and adds the reportlets.

use crate::memory::{MemoryEstimate, TABLE_MEM_GB};
use crate::roi::{self, ACOMPCOR, CSF, TCOMPCOR, WM};
use fmriprep_interfaces::reports::{compcor_variance_plot, confounds_correlation_plot, rois_plot};
use fmriprep_interfaces::{
    AddTsvHeader, CompCorNode, CompCorWarning, ComputeDvars, DerivativesDataSink,
    FramewiseDisplacement, GatherConfounds, Merge, NonSteadyStateDetector, SignalExtraction,
};
use fmriprep_workflow::retry::DEGRADED_PORT;
use fmriprep_workflow::{FailureMode, GraphError, INPUTNODE, Node, OUTPUTNODE, RetryPolicy, Workflow};
use std::path::Path;

/// Name of the confounds workflow inside a run workflow.
pub const CONFOUNDS_WF: &str = "bold_confounds_wf";

pub const CONFOUNDS_INPUTS: [&str; 7] = [
    "bold",
    "bold_mask",
    "bold_ref",
    "movpar_file",
    "t1_mask",
    "t1_tpms",
    "t1_bold_xform",
];

pub const CONFOUNDS_OUTPUTS: [&str; 3] = ["confounds_file", "confounds_metadata", "compcor_degraded"];

/// Region labels, in the order of the masks fed to signal extraction.
pub const SIGNAL_LABELS: [&str; 3] = ["CSF", "WhiteMatter", "GlobalSignal"];

/// A member output: node name and port.
pub type PortRef<'a> = (&'a str, &'a str);

/// Where the four BOLD-space masks come from.
#[derive(Debug, Clone, Copy)]
pub struct ConfoundMasks<'a> {
    pub csf: PortRef<'a>,
    pub wm: PortRef<'a>,
    pub tcompcor: PortRef<'a>,
    pub acompcor: PortRef<'a>,
}

impl ConfoundMasks<'static> {
    /// The clipped masks produced by [`roi::add_roi_derivation`].
    #[must_use]
    pub fn derived() -> Self {
        Self {
            csf: (CSF.mask, "out_file"),
            wm: (WM.mask, "out_file"),
            tcompcor: (TCOMPCOR.mask, "out_file"),
            acompcor: (ACOMPCOR.mask, "out_file"),
        }
    }
}

/// Adds the in-process regressor operations to `workflow`.
///
/// `source` must provide `bold`, `bold_mask` and `movpar_file`. The
/// gathered table leaves the `concat` node.
///
/// # Errors
///
/// Returns a [`GraphError`] if a name is taken or a port is missing.
pub fn add_confound_regressors(
    workflow: &mut Workflow,
    source: &str,
    masks: ConfoundMasks<'_>,
    mem: MemoryEstimate,
    repetition_time: f64,
    failure_mode: FailureMode,
) -> Result<(), GraphError> {
    let retry = RetryPolicy::with_failure_mode(failure_mode);
    workflow.add_nodes([
        Node::new("merge_rois", Merge::new(3)).local(),
        Node::new("signals", SignalExtraction::new(&SIGNAL_LABELS)).with_mem_gb(mem.largemem),
        Node::new("dvars", ComputeDvars).with_mem_gb(mem.largemem),
        Node::new("fdisp", FramewiseDisplacement::default()).with_mem_gb(TABLE_MEM_GB),
        Node::new("non_steady_state", NonSteadyStateDetector).with_mem_gb(mem.filesize),
        Node::new("tcompcor", CompCorNode::temporal(repetition_time))
            .with_mem_gb(mem.largemem)
            .with_retry(retry),
        Node::new("acompcor", CompCorNode::anatomical(repetition_time))
            .with_mem_gb(mem.largemem)
            .with_retry(retry),
        Node::new("add_motion_headers", AddTsvHeader::motion()).local(),
        Node::new("concat", GatherConfounds).with_mem_gb(TABLE_MEM_GB).local(),
        Node::new("compcor_warning", CompCorWarning).local(),
    ])?;

    workflow.connect(masks.csf.0, "merge_rois", &[(masks.csf.1, "in1")])?;
    workflow.connect(masks.wm.0, "merge_rois", &[(masks.wm.1, "in2")])?;
    workflow.connect(source, "merge_rois", &[("bold_mask", "in3")])?;
    workflow.connect(source, "signals", &[("bold", "in_file")])?;
    workflow.connect("merge_rois", "signals", &[("out", "label_files")])?;

    workflow.connect(source, "dvars", &[("bold", "in_file"), ("bold_mask", "in_mask")])?;
    workflow.connect(source, "fdisp", &[("movpar_file", "in_file")])?;
    workflow.connect(source, "add_motion_headers", &[("movpar_file", "in_file")])?;
    workflow.connect(source, "non_steady_state", &[("bold", "in_file")])?;

    for (node, mask) in [("tcompcor", masks.tcompcor), ("acompcor", masks.acompcor)] {
        workflow.connect(source, node, &[("bold", "realigned_file")])?;
        workflow.connect(mask.0, node, &[(mask.1, "mask_files")])?;
        workflow.connect(
            "non_steady_state",
            node,
            &[("n_volumes_to_discard", "ignore_initial_volumes")],
        )?;
    }
    workflow.connect("tcompcor", "compcor_warning", &[(DEGRADED_PORT, "tcompcor_degraded")])?;
    workflow.connect("acompcor", "compcor_warning", &[(DEGRADED_PORT, "acompcor_degraded")])?;

    workflow.connect("add_motion_headers", "concat", &[("out_file", "motion")])?;
    workflow.connect("fdisp", "concat", &[("out_file", "fd")])?;
    workflow.connect("dvars", "concat", &[("out_all", "dvars")])?;
    workflow.connect("signals", "concat", &[("out_file", "signals")])?;
    workflow.connect(
        "tcompcor",
        "concat",
        &[
            ("pre_filter_file", "cos_basis"),
            ("components_file", "tcompcor"),
            ("variance_explained", "tcompcor_variance"),
        ],
    )?;
    workflow.connect(
        "acompcor",
        "concat",
        &[("components_file", "acompcor"), ("variance_explained", "acompcor_variance")],
    )?;
    workflow.connect("non_steady_state", "concat", &[("n_volumes_to_discard", "nss")])?;
    Ok(())
}

/// Builds `bold_confounds_wf`.
///
/// Reportlets are named after `source_file`, the original BOLD series.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_bold_confs_wf(
    mem: MemoryEstimate,
    repetition_time: f64,
    failure_mode: FailureMode,
    reportlets_dir: &Path,
    source_file: &Path,
) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::with_io(CONFOUNDS_WF, &CONFOUNDS_INPUTS, &CONFOUNDS_OUTPUTS)
        .with_description(
            "Several confounding time-series were calculated based on the preprocessed BOLD: \
             framewise displacement, DVARS and three region-wise global signals, plus \
             temporal and anatomical CompCor components.",
        );

    roi::add_roi_derivation(&mut workflow, INPUTNODE)?;
    add_confound_regressors(
        &mut workflow,
        INPUTNODE,
        ConfoundMasks::derived(),
        mem,
        repetition_time,
        failure_mode,
    )?;

    let source = source_file.display().to_string();
    let report_sink = |name: &str, desc: &str| {
        Node::new(
            name,
            DerivativesDataSink::figures(reportlets_dir).with_desc(desc),
        )
        .with_input("source_file", source.clone())
        .local()
    };
    workflow.add_nodes([
        Node::new("mrg_compcor", Merge::new(2)).local(),
        Node::new("rois_plot", rois_plot(&["b", "magenta"])).with_mem_gb(mem.resampled),
        Node::new("mrg_cc_metadata", Merge::new(2)).local(),
        Node::new("compcor_plot", compcor_variance_plot()),
        Node::new("conf_corr_plot", confounds_correlation_plot()),
        report_sink("ds_report_bold_rois", "rois"),
        report_sink("ds_report_compcor", "compcorvar"),
        report_sink("ds_report_conf_corr", "confoundcorr"),
        Node::new(
            "ds_report_compcor_warning",
            DerivativesDataSink::figures(reportlets_dir)
                .with_desc("compcorwarning")
                .with_extension(".html"),
        )
        .with_input("source_file", source.clone())
        .local(),
    ])?;

    workflow.connect(TCOMPCOR.mask, "mrg_compcor", &[("out_file", "in1")])?;
    workflow.connect(ACOMPCOR.mask, "mrg_compcor", &[("out_file", "in2")])?;
    workflow.connect(INPUTNODE, "rois_plot", &[("bold_ref", "in_file"), ("bold_mask", "in_mask")])?;
    workflow.connect("mrg_compcor", "rois_plot", &[("out", "in_rois")])?;
    workflow.connect("rois_plot", "ds_report_bold_rois", &[("out_report", "in_file")])?;

    workflow.connect("tcompcor", "mrg_cc_metadata", &[("variance_explained", "in1")])?;
    workflow.connect("acompcor", "mrg_cc_metadata", &[("variance_explained", "in2")])?;
    workflow.connect("mrg_cc_metadata", "compcor_plot", &[("out", "metadata_files")])?;
    workflow.connect("compcor_plot", "ds_report_compcor", &[("out_report", "in_file")])?;

    workflow.connect("concat", "conf_corr_plot", &[("confounds_file", "confounds_file")])?;
    workflow.connect("conf_corr_plot", "ds_report_conf_corr", &[("out_report", "in_file")])?;
    workflow.connect("compcor_warning", "ds_report_compcor_warning", &[("out_report", "in_file")])?;

    workflow.connect(
        "concat",
        OUTPUTNODE,
        &[
            ("confounds_file", "confounds_file"),
            ("confounds_metadata", "confounds_metadata"),
        ],
    )?;
    workflow.connect("compcor_warning", OUTPUTNODE, &[("degraded", "compcor_degraded")])?;
    Ok(workflow)
}
