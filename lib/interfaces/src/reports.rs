//! Report fragments.
//!
//! Plots are drawn by the executor. The HTML summaries are small enough
//! to render in-process from the parameters the builder already knows.

use crate::io::{OUT_DIR, output_dir, path_value, write_text};
use crate::tool::ToolSpec;
use fmriprep_workflow::PortKind::{Any, Boolean, File, FileList, Integer, Text};
use fmriprep_workflow::{InputPort, Interface, OutputPort, PortValues, RunError};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::fmt::Write as _;
use tracing::warn;

const OUT_REPORT: &str = "out_report";

/// Overlay of ROI contours on the reference image.
#[must_use]
pub fn rois_plot(colors: &[&str]) -> ToolSpec {
    ToolSpec::builtin("ROIsPlot")
        .input("in_file", File)
        .input("in_rois", FileList)
        .input("in_mask", File)
        .output(OUT_REPORT, File)
        .param("colors", colors.iter().map(ToString::to_string).collect::<Vec<_>>())
        .param("generate_report", true)
}

/// Cumulative variance explained by CompCor components.
#[must_use]
pub fn compcor_variance_plot() -> ToolSpec {
    ToolSpec::builtin("CompCorVariancePlot")
        .input("metadata_files", FileList)
        .output(OUT_REPORT, File)
        .param("metadata_sources", vec!["tCompCor", "aCompCor"])
        .param("variance_thresholds", vec![0.5, 0.7, 0.9])
}

/// Correlation heatmap of the confounds table.
#[must_use]
pub fn confounds_correlation_plot() -> ToolSpec {
    ToolSpec::builtin("ConfoundsCorrelationPlot")
        .input("confounds_file", File)
        .output(OUT_REPORT, File)
        .param("reference_column", "GlobalSignal")
        .param("max_dim", 70)
}

/// Flicker report comparing two images.
#[must_use]
pub fn simple_before_after(name: &str) -> ToolSpec {
    ToolSpec::builtin(name)
        .input("before", File)
        .input("after", File)
        .optional("wm_seg", File)
        .output(OUT_REPORT, File)
        .param("before_label", "before")
        .param("after_label", "after")
}

/// Before/after report for a distortion correction method.
#[must_use]
pub fn sdc_report(method: &str) -> ToolSpec {
    simple_before_after("SDCReport")
        .param("method", method)
        .param("before_label", "distorted")
        .param("after_label", "corrected")
}

/// Side-by-side comparison of fieldmap-based and fieldmap-less correction.
#[must_use]
pub fn syn_comparison_report() -> ToolSpec {
    ToolSpec::builtin("SyNComparisonReport")
        .input("before", File)
        .input("after", File)
        .input("wm_seg", File)
        .output(OUT_REPORT, File)
        .param("before_label", "fieldmap")
        .param("after_label", "fieldmap-less")
}

/// Segmentation contours on the T1w reference.
#[must_use]
pub fn segmentation_report() -> ToolSpec {
    ToolSpec::builtin("SegmentationReport")
        .input("in_file", File)
        .input("in_seg", File)
        .input("in_mask", File)
        .output(OUT_REPORT, File)
}

fn write_report(inputs: &PortValues, file_name: &str, body: &str) -> Result<PortValues, RunError> {
    let path = output_dir(inputs, "").join(file_name);
    write_text(&path, body)?;
    let mut outputs = PortValues::new();
    outputs.insert(OUT_REPORT.to_string(), path_value(&path));
    Ok(outputs)
}

fn definition_list(title: &str, rows: &[(&str, String)]) -> String {
    let mut html = format!("<h3 class=\"elem-title\">{title}</h3>\n<ul class=\"elem-desc\">\n");
    for (label, value) in rows {
        let _ = writeln!(html, "\t<li>{label}: {value}</li>");
    }
    html.push_str("</ul>\n");
    html
}

/// Per-run summary of the choices made when building the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalSummary {
    pub slice_timing: bool,
    /// Distortion correction method, `None` if disabled.
    pub distortion_correction: Option<String>,
    /// `FreeSurfer` or `FSL`.
    pub registration: String,
    pub registration_dof: u8,
    pub pe_direction: Option<String>,
    pub repetition_time: f64,
    /// User-supplied count of non-steady-state volumes.
    pub dummy_scans: Option<usize>,
}

impl FunctionalSummary {
    fn registration_text(&self, fallback: Option<bool>) -> String {
        let freesurfer = self.registration == "FreeSurfer";
        let method = match (freesurfer, fallback) {
            (true, Some(true)) => "mri_coreg (FreeSurfer)",
            (true, _) => "bbregister (boundary-based registration, BBR)",
            (false, Some(true)) => "FLIRT (FSL)",
            (false, _) => "FLIRT with boundary-based registration (BBR) (FSL)",
        };
        format!("{method} - {} dof", self.registration_dof)
    }
}

impl Interface for FunctionalSummary {
    fn name(&self) -> &str {
        "FunctionalSummary"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![
            InputPort::optional("fallback", Boolean),
            InputPort::optional("algo_dummy_scans", Integer),
            InputPort::optional("confounds_file", File),
        ]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![OutputPort::new(OUT_REPORT, File)]
    }

    fn parameters(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let fallback = inputs.get("fallback").and_then(JsonValue::as_bool);
        let algo = inputs.get("algo_dummy_scans").and_then(JsonValue::as_u64);
        let dummies = match (self.dummy_scans, algo) {
            (Some(given), Some(found)) if given as u64 != found => {
                warn!(given, found, "dummy scan count differs from the detected count");
                format!("{given} (detected: {found})")
            }
            (Some(given), _) => given.to_string(),
            (None, Some(found)) => format!("{found} (detected)"),
            (None, None) => "none".to_string(),
        };
        let rows = [
            ("Repetition time (TR)", format!("{:.2}s", self.repetition_time)),
            (
                "Phase-encoding (PE) direction",
                self.pe_direction.clone().unwrap_or_else(|| "MISSING".to_string()),
            ),
            (
                "Slice timing correction",
                if self.slice_timing { "Applied" } else { "Not applied" }.to_string(),
            ),
            (
                "Susceptibility distortion correction",
                self.distortion_correction
                    .clone()
                    .unwrap_or_else(|| "None".to_string()),
            ),
            ("Registration", self.registration_text(fallback)),
            ("Non-steady-state volumes", dummies),
        ];
        write_report(inputs, "report_functional.html", &definition_list("Summary", &rows))
    }
}

/// Per-subject summary of inputs and output spaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSummary {
    pub subject_id: String,
    pub std_spaces: Vec<String>,
    pub nstd_spaces: Vec<String>,
    pub freesurfer: bool,
}

impl Interface for SubjectSummary {
    fn name(&self) -> &str {
        "SubjectSummary"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![
            InputPort::required("t1w", FileList),
            InputPort::optional("t2w", FileList),
            InputPort::optional("bold", FileList),
            InputPort::optional("subjects_dir", Text),
        ]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![
            OutputPort::new(OUT_REPORT, File),
            OutputPort::new("subject_id", Text),
        ]
    }

    fn parameters(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let count = |port: &str| match inputs.get(port) {
            Some(JsonValue::Array(items)) => items.len(),
            Some(JsonValue::String(_)) => 1,
            _ => 0,
        };
        let reconstruction = if self.freesurfer {
            inputs
                .get("subjects_dir")
                .and_then(JsonValue::as_str)
                .map_or_else(|| "Run by FreeSurfer".to_string(), |dir| format!("Run by FreeSurfer (subjects directory: {dir})"))
        } else {
            "Not run".to_string()
        };
        let rows = [
            ("Subject ID", self.subject_id.clone()),
            ("Structural images", format!("{} T1-weighted", count("t1w"))),
            ("Functional series", count("bold").to_string()),
            ("Standard output spaces", self.std_spaces.join(", ")),
            ("Non-standard output spaces", self.nstd_spaces.join(", ")),
            ("FreeSurfer reconstruction", reconstruction),
        ];
        let mut outputs =
            write_report(inputs, "report_summary.html", &definition_list("Summary", &rows))?;
        outputs.insert("subject_id".to_string(), json!(self.subject_id));
        Ok(outputs)
    }
}

/// Version and command line of the invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AboutSummary {
    pub version: String,
    pub command: String,
    pub date: String,
}

impl Interface for AboutSummary {
    fn name(&self) -> &str {
        "AboutSummary"
    }

    fn inputs(&self) -> Vec<InputPort> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![OutputPort::new(OUT_REPORT, File)]
    }

    fn parameters(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let rows = [
            ("fMRIPrep version", self.version.clone()),
            ("fMRIPrep command", format!("<code>{}</code>", self.command)),
            ("Date preprocessed", self.date.clone()),
        ];
        write_report(inputs, "report_about.html", &definition_list("About", &rows))
    }
}

/// Warns in the report when a CompCor step gave up and returned sentinels.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompCorWarning;

impl Interface for CompCorWarning {
    fn name(&self) -> &str {
        "CompCorWarning"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![
            InputPort::optional("tcompcor_degraded", Boolean),
            InputPort::optional("acompcor_degraded", Boolean),
            InputPort::optional(OUT_DIR, Text),
        ]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![
            OutputPort::new(OUT_REPORT, File),
            OutputPort::new("degraded", Any),
        ]
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let degraded: Vec<&str> = [("tcompcor_degraded", "tCompCor"), ("acompcor_degraded", "aCompCor")]
            .into_iter()
            .filter(|(port, _)| inputs.get(*port).and_then(JsonValue::as_bool) == Some(true))
            .map(|(_, label)| label)
            .collect();

        let body = if degraded.is_empty() {
            String::new()
        } else {
            format!(
                "<div class=\"warning\">{} could not be computed; the columns hold n/a. \
                 The mask may be empty or too small.</div>\n",
                degraded.join(" and ")
            )
        };
        let mut outputs = write_report(inputs, "report_compcor_warning.html", &body)?;
        outputs.insert("degraded".to_string(), json!(degraded));
        Ok(outputs)
    }
}
