//! Derivatives written for one BOLD run.

use fmriprep_core::spaces::AROMA_TEMPLATE;
use fmriprep_core::{Reference, Space};
use fmriprep_interfaces::DerivativesDataSink;
use fmriprep_workflow::{Adapter, GraphError, INPUTNODE, Node, Workflow};
use std::path::Path;

pub const DERIVATIVES_WF: &str = "func_derivatives_wf";

pub const DERIVATIVES_INPUTS: [&str; 13] = [
    "bold_t1",
    "bold_t1_ref",
    "bold_mask_t1",
    "bold_std",
    "bold_std_ref",
    "bold_mask_std",
    "bold_cifti",
    "cifti_metadata",
    "confounds",
    "confounds_metadata",
    "aroma_noise_ics",
    "melodic_mix",
    "nonaggr_denoised_file",
];

/// Which derivatives a run produces.
#[derive(Debug, Clone, Copy)]
pub struct DerivativeOutputs<'a> {
    /// Write the T1w-space series.
    pub anatomical: bool,
    /// Every template the run is resampled to, in the order of the
    /// `bold_std*` lists. Only output references are written.
    pub templates: &'a [&'a Reference],
    /// Grayordinates density.
    pub cifti: Option<&'a str>,
    pub aroma: bool,
}

struct Sinks<'a> {
    workflow: &'a mut Workflow,
    output_dir: &'a Path,
    source: String,
}

impl Sinks<'_> {
    fn func(&self) -> DerivativesDataSink {
        DerivativesDataSink::new(self.output_dir, "func")
    }

    fn add(&mut self, name: &str, sink: DerivativesDataSink, field: &str) -> Result<(), GraphError> {
        self.workflow.add_node(
            Node::new(name, sink)
                .with_input("source_file", self.source.clone())
                .local(),
        )?;
        self.workflow.connect(INPUTNODE, name, &[(field, "in_file")])
    }

    fn add_selected(
        &mut self,
        name: &str,
        sink: DerivativesDataSink,
        field: &str,
        index: usize,
    ) -> Result<(), GraphError> {
        self.workflow.add_node(
            Node::new(name, sink)
                .with_input("source_file", self.source.clone())
                .local(),
        )?;
        self.workflow
            .connect_with(INPUTNODE, field, name, "in_file", Adapter::Select { index })
    }
}

/// Builds `func_derivatives_wf`.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_func_derivatives_wf(
    outputs: &DerivativeOutputs<'_>,
    output_dir: &Path,
    source_file: &Path,
) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::with_io(DERIVATIVES_WF, &DERIVATIVES_INPUTS, &[] as &[&str]);
    let mut sinks = Sinks {
        workflow: &mut workflow,
        output_dir,
        source: source_file.display().to_string(),
    };

    let confounds = sinks.func().with_desc("confounds").with_suffix("regressors");
    sinks.add("ds_confounds", confounds.clone().with_extension(".tsv"), "confounds")?;
    sinks.add(
        "ds_confounds_metadata",
        confounds.with_extension(".json"),
        "confounds_metadata",
    )?;

    if outputs.anatomical {
        let t1w = sinks.func().with_space(&Space::Anatomical);
        sinks.add("ds_bold_t1", t1w.clone().with_desc("preproc"), "bold_t1")?;
        sinks.add("ds_bold_t1_ref", t1w.clone().with_suffix("boldref"), "bold_t1_ref")?;
        sinks.add(
            "ds_bold_mask_t1",
            t1w.with_desc("brain").with_suffix("mask"),
            "bold_mask_t1",
        )?;
    }

    for (index, reference) in outputs.templates.iter().enumerate() {
        if !reference.output {
            continue;
        }
        let tag = reference.space.tag();
        let std = sinks.func().with_space(&reference.space);
        sinks.add_selected(
            &format!("ds_bold_std_{tag}"),
            std.clone().with_desc("preproc"),
            "bold_std",
            index,
        )?;
        sinks.add_selected(
            &format!("ds_bold_std_ref_{tag}"),
            std.clone().with_suffix("boldref"),
            "bold_std_ref",
            index,
        )?;
        sinks.add_selected(
            &format!("ds_bold_mask_std_{tag}"),
            std.with_desc("brain").with_suffix("mask"),
            "bold_mask_std",
            index,
        )?;
    }

    if let Some(density) = outputs.cifti {
        let cifti = sinks.func().with_space(&Space::Grayordinates {
            density: density.to_string(),
        });
        sinks.add(
            "ds_bold_cifti",
            cifti.clone().with_extension(".dtseries.nii"),
            "bold_cifti",
        )?;
        sinks.add(
            "ds_cifti_metadata",
            cifti.with_extension(".dtseries.json"),
            "cifti_metadata",
        )?;
    }

    if outputs.aroma {
        sinks.add(
            "ds_aroma_noise_ics",
            sinks.func().with_suffix("AROMAnoiseICs").with_extension(".csv"),
            "aroma_noise_ics",
        )?;
        sinks.add(
            "ds_melodic_mix",
            sinks
                .func()
                .with_desc("MELODIC")
                .with_suffix("mixing")
                .with_extension(".tsv"),
            "melodic_mix",
        )?;
        sinks.add(
            "ds_aroma_std",
            sinks
                .func()
                .with_space(&Space::template_res(AROMA_TEMPLATE, "2"))
                .with_desc("smoothAROMAnonaggr"),
            "nonaggr_denoised_file",
        )?;
    }
    Ok(workflow)
}
