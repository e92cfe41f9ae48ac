//! Subject and top-level workflows.

use crate::anatomical::{ANAT_WF, init_anat_preproc_wf};
use crate::bold::{RUN_INPUTS, init_func_preproc_wf};
use crate::error::BuildError;
use crate::settings::BoldSettings;
use chrono::Utc;
use fmriprep_config::Config;
use fmriprep_core::BidsLayout;
use fmriprep_interfaces::{
    AboutSummary, BidsDataGrabber, BidsInfo, DerivativesDataSink, SubjectFiles, SubjectSummary,
};
use fmriprep_workflow::{Node, Workflow};
use std::path::PathBuf;
use tracing::{debug, info};

pub const FMRIPREP_WF: &str = "fmriprep_wf";

/// Switches of the subject workflow on top of the per-run ones.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectSettings {
    pub bold: BoldSettings,
    /// Process anatomy only; subjects without BOLD runs are accepted.
    pub anat_only: bool,
    /// FreeSurfer subjects directory.
    pub subjects_dir: PathBuf,
    pub version: String,
    /// Command line shown in the about reportlet.
    pub command: String,
}

impl SubjectSettings {
    #[must_use]
    pub fn new(bold: BoldSettings) -> Self {
        Self {
            subjects_dir: bold.output_dir.join("freesurfer"),
            bold,
            anat_only: false,
            version: env!("CARGO_PKG_VERSION").to_string(),
            command: String::new(),
        }
    }

    /// Reads the settings from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Spaces`] when the requested spaces are unusable.
    pub fn from_config(config: &Config, command: impl Into<String>) -> Result<Self, BuildError> {
        Ok(Self {
            bold: BoldSettings::from_config(config)?,
            anat_only: config.workflow.anat_only,
            subjects_dir: config.execution.subjects_dir(),
            version: config.environment.version.clone(),
            command: command.into(),
        })
    }
}

/// Labels of the subjects to process.
///
/// # Errors
///
/// Returns [`BuildError::NoSubjects`] listing the requested labels missing
/// from the dataset, or every requested label when nothing is left.
pub fn select_subjects(layout: &dyn BidsLayout, requested: &[String]) -> Result<Vec<String>, BuildError> {
    let available = layout.subjects()?;
    if requested.is_empty() {
        if available.is_empty() {
            return Err(BuildError::NoSubjects { requested: Vec::new() });
        }
        return Ok(available);
    }

    let missing: Vec<String> = requested
        .iter()
        .filter(|label| !available.contains(label))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(BuildError::NoSubjects { requested: missing });
    }
    let mut selected = requested.to_vec();
    selected.sort();
    selected.dedup();
    Ok(selected)
}

/// Builds `single_subject_<label>_wf`.
///
/// # Errors
///
/// Returns [`BuildError::NoAnatomical`] without T1w images,
/// [`BuildError::NoBold`] without BOLD runs unless `anat_only` is set, and
/// the errors of the run builder.
pub fn init_single_subject_wf(
    layout: &dyn BidsLayout,
    subject: &str,
    settings: &SubjectSettings,
) -> Result<Workflow, BuildError> {
    let t1w = layout.t1w(subject)?;
    let Some(first_t1w) = t1w.first().cloned() else {
        return Err(BuildError::NoAnatomical {
            subject: subject.to_string(),
        });
    };
    let runs = layout.bold_runs(subject)?;
    if runs.is_empty() && !settings.anat_only {
        return Err(BuildError::NoBold {
            subject: subject.to_string(),
        });
    }

    let bold = &settings.bold;
    let spaces = bold.resolved_spaces();
    let name = format!("single_subject_{subject}_wf");
    info!(subject, runs = runs.len(), anat_only = settings.anat_only, "building subject workflow");

    let mut workflow = Workflow::new(name.as_str()).with_description(format!(
        "Results included in this manuscript come from preprocessing performed using \
         fMRIPrep {}.",
        settings.version
    ));

    let files = SubjectFiles {
        t1w: t1w.clone(),
        t2w: Vec::new(),
        bold: if settings.anat_only {
            Vec::new()
        } else {
            runs.iter().map(|run| run.path.clone()).collect()
        },
    };
    let (std_spaces, nstd_spaces): (Vec<_>, Vec<_>) = spaces
        .outputs()
        .partition(|space| space.is_template());
    let summary = SubjectSummary {
        subject_id: subject.to_string(),
        std_spaces: std_spaces.iter().map(ToString::to_string).collect(),
        nstd_spaces: nstd_spaces.iter().map(ToString::to_string).collect(),
        freesurfer: bold.freesurfer,
    };
    let about = AboutSummary {
        version: settings.version.clone(),
        command: settings.command.clone(),
        date: Utc::now().to_rfc3339(),
    };
    let source = first_t1w.display().to_string();
    let html_sink = |node: &str, desc: &str| {
        Node::new(
            node,
            DerivativesDataSink::figures(&bold.reportlets_dir)
                .with_desc(desc)
                .with_extension(".html"),
        )
        .with_input("source_file", source.clone())
        .local()
    };

    workflow.add_nodes([
        Node::new("bidssrc", BidsDataGrabber::new(files, settings.anat_only)).local(),
        Node::new("bids_info", BidsInfo).local(),
        Node::new("summary", summary).local(),
        Node::new("about", about).local(),
        html_sink("ds_report_summary", "summary"),
        html_sink("ds_report_about", "about"),
    ])?;
    workflow.connect("bidssrc", "bids_info", &[("t1w", "in_file")])?;
    workflow.connect("bidssrc", "summary", &[("t1w", "t1w"), ("t2w", "t2w"), ("bold", "bold")])?;
    if bold.freesurfer {
        workflow.set_input("summary", "subjects_dir", settings.subjects_dir.display().to_string())?;
    }
    workflow.connect("summary", "ds_report_summary", &[("out_report", "in_file")])?;
    workflow.connect("about", "ds_report_about", &[("out_report", "in_file")])?;

    let anat = init_anat_preproc_wf(
        &spaces,
        bold.freesurfer,
        &bold.output_dir,
        &bold.reportlets_dir,
        &first_t1w,
        bold.omp_nthreads,
    )?;
    let shared: Vec<String> = anat
        .output_fields()
        .into_iter()
        .filter(|field| RUN_INPUTS.contains(&field.as_str()))
        .collect();
    workflow.add_workflow(anat)?;
    workflow.connect("bidssrc", ANAT_WF, &[("t1w", "t1w")])?;
    workflow.set_input(ANAT_WF, "subjects_dir", settings.subjects_dir.display().to_string())?;
    workflow.set_input(ANAT_WF, "subject_id", format!("sub-{subject}"))?;

    if settings.anat_only {
        return Ok(workflow);
    }

    let ports: Vec<(&str, &str)> = shared.iter().map(|f| (f.as_str(), f.as_str())).collect();
    for run in &runs {
        let fieldmaps = layout.fieldmaps(run)?;
        let func = init_func_preproc_wf(run, &fieldmaps, bold)?;
        let func_name = func.name().to_string();
        debug!(subject, workflow = %func_name, fieldmaps = fieldmaps.len(), "adding BOLD workflow");
        workflow.add_workflow(func)?;
        workflow.connect(ANAT_WF, &func_name, &ports)?;
    }
    Ok(workflow)
}

/// Builds `fmriprep_wf` with one subject workflow per selected participant.
///
/// # Errors
///
/// Returns the first subject's build error.
pub fn init_fmriprep_wf(
    layout: &dyn BidsLayout,
    requested: &[String],
    settings: &SubjectSettings,
) -> Result<Workflow, BuildError> {
    let mut workflow = Workflow::new(FMRIPREP_WF);
    for subject in select_subjects(layout, requested)? {
        workflow.add_workflow(init_single_subject_wf(layout, &subject, settings)?)?;
    }
    Ok(workflow)
}
