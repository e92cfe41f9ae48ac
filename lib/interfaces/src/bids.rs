//! Dataset access and derivative writing.

use crate::io::{invalid, path_input, path_value};
use fmriprep_core::bids::DERIVATIVES_FOLDER;
use fmriprep_core::{BidsName, Space, derivatives_dir};
use fmriprep_workflow::PortKind::{Any, File, FileList, Text};
use fmriprep_workflow::{InputPort, Interface, OutputPort, PortValues, RunError, require};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Entities reported by [`BidsInfo`].
pub const INFO_ENTITIES: [&str; 6] = ["subject", "session", "task", "acquisition", "reconstruction", "run"];

/// Copies a result into the derivatives tree under a BIDS name derived
/// from the source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativesDataSink {
    base_directory: PathBuf,
    datatype: String,
    desc: Option<String>,
    suffix: Option<String>,
    extension: Option<String>,
    entities: Vec<(String, String)>,
    /// Entity varied across the items of a list input, one value per item.
    per_item: Option<(String, Vec<String>)>,
}

impl DerivativesDataSink {
    #[must_use]
    pub fn new(base_directory: impl Into<PathBuf>, datatype: &str) -> Self {
        Self {
            base_directory: base_directory.into(),
            datatype: datatype.to_string(),
            desc: None,
            suffix: None,
            extension: None,
            entities: Vec::new(),
            per_item: None,
        }
    }

    /// Sink for report fragments.
    #[must_use]
    pub fn figures(base_directory: impl Into<PathBuf>) -> Self {
        Self::new(base_directory, "figures").with_extension(".svg")
    }

    #[must_use]
    pub fn with_desc(mut self, desc: &str) -> Self {
        self.desc = Some(desc.to_string());
        self
    }

    #[must_use]
    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.suffix = Some(suffix.to_string());
        self
    }

    #[must_use]
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = Some(extension.to_string());
        self
    }

    #[must_use]
    pub fn with_entity(mut self, key: &str, value: impl Into<String>) -> Self {
        self.entities.push((key.to_string(), value.into()));
        self
    }

    /// Adds the `space-` entity and its modifiers.
    #[must_use]
    pub fn with_space(mut self, space: &Space) -> Self {
        self = self.with_entity("space", space.name());
        for (key, value) in space.extra_entities() {
            self = self.with_entity(key, value);
        }
        self
    }

    #[must_use]
    pub fn per_item<S: AsRef<str>>(mut self, entity: &str, values: &[S]) -> Self {
        self.per_item = Some((
            entity.to_string(),
            values.iter().map(|v| v.as_ref().to_string()).collect(),
        ));
        self
    }

    /// Derivative path for `source`, with `desc` overriding the static one.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::InvalidInput`] when the source is not a BIDS name.
    pub fn target(&self, source: &Path, desc: Option<&str>) -> Result<PathBuf, RunError> {
        let mut name = BidsName::from_path(source)
            .map_err(|e| invalid("source_file", &e.to_string()))?
            .without_entity("echo");
        for (key, value) in &self.entities {
            name = name.with_entity(key, value.clone());
        }
        if let Some(desc) = desc.or(self.desc.as_deref()) {
            name = name.with_entity("desc", desc);
        }
        if let Some(suffix) = &self.suffix {
            name = name.with_suffix(suffix.clone());
        }
        if let Some(extension) = &self.extension {
            name = name.with_extension(extension.clone());
        }

        let dir = if self.datatype == "figures" {
            self.base_directory
                .join(DERIVATIVES_FOLDER)
                .join(format!("sub-{}", name.subject()))
                .join("figures")
        } else {
            derivatives_dir(&self.base_directory, &name, &self.datatype)
        };
        Ok(dir.join(name.file_name()))
    }

    fn item_targets(&self, base: &Path, items: usize) -> Result<Vec<PathBuf>, RunError> {
        if items == 1 {
            return Ok(vec![base.to_path_buf()]);
        }
        let Some((entity, values)) = &self.per_item else {
            return Err(invalid("in_file", "a list needs a per-item entity"));
        };
        if values.len() != items {
            return Err(invalid("in_file", "list length does not match the per-item entity"));
        }
        values
            .iter()
            .map(|value| {
                let name = BidsName::from_path(base)
                    .map_err(|e| invalid("source_file", &e.to_string()))?
                    .with_entity(entity, value.clone());
                Ok(base.with_file_name(name.file_name()))
            })
            .collect()
    }
}

impl Interface for DerivativesDataSink {
    fn name(&self) -> &str {
        "DerivativesDataSink"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![
            InputPort::required("in_file", Any),
            InputPort::required("source_file", File),
            InputPort::optional("desc", Text),
        ]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out_file", Any)]
    }

    fn parameters(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    fn sink_target(&self, inputs: &PortValues) -> Option<String> {
        let source = inputs.get("source_file")?.as_str()?;
        let desc = inputs.get("desc").and_then(JsonValue::as_str);
        let target = self.target(Path::new(source), desc).ok()?;
        Some(target.display().to_string())
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let source = path_input(inputs, "source_file")?;
        let desc = inputs.get("desc").and_then(JsonValue::as_str);
        let base = self.target(&source, desc)?;

        let files: Vec<PathBuf> = match require(inputs, "in_file")? {
            JsonValue::String(path) => vec![PathBuf::from(path)],
            JsonValue::Array(items) => items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(PathBuf::from)
                .collect(),
            _ => return Err(invalid("in_file", "expected a path or a list of paths")),
        };
        let targets = self.item_targets(&base, files.len())?;

        for (file, target) in files.iter().zip(&targets) {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RunError::Failed {
                    reason: format!("{}: {e}", parent.display()),
                })?;
            }
            std::fs::copy(file, target).map_err(|e| RunError::Failed {
                reason: format!("{} -> {}: {e}", file.display(), target.display()),
            })?;
            debug!(source = %file.display(), target = %target.display(), "wrote derivative");
        }

        let out = if targets.len() == 1 {
            path_value(&targets[0])
        } else {
            JsonValue::Array(targets.iter().map(|t| path_value(t)).collect())
        };
        let mut outputs = PortValues::new();
        outputs.insert("out_file".to_string(), out);
        Ok(outputs)
    }
}

/// Files of one subject, as discovered at build time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFiles {
    pub t1w: Vec<PathBuf>,
    pub t2w: Vec<PathBuf>,
    pub bold: Vec<PathBuf>,
}

/// Emits a subject's input files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidsDataGrabber {
    files: SubjectFiles,
    anat_only: bool,
}

impl BidsDataGrabber {
    #[must_use]
    pub fn new(files: SubjectFiles, anat_only: bool) -> Self {
        Self { files, anat_only }
    }
}

fn path_list(paths: &[PathBuf]) -> JsonValue {
    JsonValue::Array(paths.iter().map(|p| path_value(p)).collect())
}

impl Interface for BidsDataGrabber {
    fn name(&self) -> &str {
        "BIDSDataGrabber"
    }

    fn inputs(&self) -> Vec<InputPort> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![
            OutputPort::new("t1w", FileList),
            OutputPort::new("t2w", FileList),
            OutputPort::new("bold", FileList),
        ]
    }

    fn parameters(&self) -> JsonValue {
        json!({ "subject_data": self.files, "anat_only": self.anat_only })
    }

    fn run(&self, _inputs: &PortValues) -> Result<PortValues, RunError> {
        if self.files.t1w.is_empty() {
            return Err(invalid("t1w", "no T1w images found"));
        }
        if self.files.bold.is_empty() && !self.anat_only {
            return Err(invalid("bold", "no BOLD images found"));
        }
        let mut outputs = PortValues::new();
        outputs.insert("t1w".to_string(), path_list(&self.files.t1w));
        outputs.insert("t2w".to_string(), path_list(&self.files.t2w));
        outputs.insert("bold".to_string(), path_list(&self.files.bold));
        Ok(outputs)
    }
}

/// Extracts entities from a BIDS file name.
#[derive(Debug, Clone, Copy, Default)]
pub struct BidsInfo;

impl Interface for BidsInfo {
    fn name(&self) -> &str {
        "BIDSInfo"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![InputPort::required("in_file", Any)]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        INFO_ENTITIES
            .iter()
            .map(|entity| OutputPort::new(*entity, Text))
            .collect()
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let value = require(inputs, "in_file")?;
        let path = match value {
            JsonValue::Array(items) => items.first().and_then(JsonValue::as_str),
            other => other.as_str(),
        }
        .ok_or_else(|| invalid("in_file", "expected a path"))?;
        let name = BidsName::from_path(Path::new(path))
            .map_err(|e| invalid("in_file", &e.to_string()))?;

        let keys = ["sub", "ses", "task", "acq", "rec", "run"];
        Ok(INFO_ENTITIES
            .iter()
            .zip(keys)
            .map(|(entity, key)| {
                let value = name.get(key).map_or(JsonValue::Null, |v| json!(v));
                ((*entity).to_string(), value)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOLD: &str = "/data/sub-01/ses-a/func/sub-01_ses-a_task-rest_run-1_bold.nii.gz";

    fn source_inputs(source: &str) -> PortValues {
        let mut inputs = PortValues::new();
        inputs.insert("source_file".to_string(), json!(source));
        inputs
    }

    #[test]
    fn target_follows_derivative_layout() {
        let sink = DerivativesDataSink::new("/out", "func")
            .with_space(&Space::template_res("MNI152NLin2009cAsym", "2"))
            .with_desc("preproc");
        let target = sink.sink_target(&source_inputs(BOLD)).expect("target");
        assert_eq!(
            target,
            "/out/fmriprep/sub-01/ses-a/func/\
             sub-01_ses-a_task-rest_run-1_space-MNI152NLin2009cAsym_res-2_desc-preproc_bold.nii.gz"
        );
    }

    #[test]
    fn figures_skip_the_session_folder() {
        let sink = DerivativesDataSink::figures("/out").with_desc("rois");
        let target = sink.sink_target(&source_inputs(BOLD)).expect("target");
        assert_eq!(
            target,
            "/out/fmriprep/sub-01/figures/sub-01_ses-a_task-rest_run-1_desc-rois_bold.svg"
        );
    }

    #[test]
    fn dynamic_desc_overrides_static() {
        let sink = DerivativesDataSink::figures("/out").with_desc("bbregister");
        let path = sink.target(Path::new(BOLD), Some("coreg")).expect("target");
        assert!(path.to_string_lossy().ends_with("desc-coreg_bold.svg"));
        assert!(sink.sink_target(&PortValues::new()).is_none());
    }

    #[test]
    fn run_copies_each_hemisphere() {
        let dir = tempfile::tempdir().expect("tempdir");
        let left = dir.path().join("lh.func.gii");
        let right = dir.path().join("rh.func.gii");
        std::fs::write(&left, "L").expect("write");
        std::fs::write(&right, "R").expect("write");

        let sink = DerivativesDataSink::new(dir.path(), "func")
            .with_space(&Space::Surface {
                mesh: "fsaverage5".to_string(),
            })
            .with_extension(".func.gii")
            .per_item("hemi", &["L", "R"]);
        let mut inputs = source_inputs(BOLD);
        inputs.insert("in_file".to_string(), json!([path_value(&left), path_value(&right)]));

        let outputs = sink.run(&inputs).expect("run");
        let written = outputs["out_file"].as_array().expect("list");
        assert_eq!(written.len(), 2);
        let right_target = written[1].as_str().expect("path");
        assert!(right_target.ends_with("hemi-R_space-fsaverage5_bold.func.gii"));
        assert_eq!(std::fs::read_to_string(right_target).expect("read"), "R");
    }

    #[test]
    fn grabber_requires_bold_unless_anat_only() {
        let files = SubjectFiles {
            t1w: vec![PathBuf::from("sub-01_T1w.nii.gz")],
            ..SubjectFiles::default()
        };
        assert!(BidsDataGrabber::new(files.clone(), false).run(&PortValues::new()).is_err());
        let outputs = BidsDataGrabber::new(files, true).run(&PortValues::new()).expect("run");
        assert_eq!(outputs["t1w"], json!(["sub-01_T1w.nii.gz"]));
    }

    #[test]
    fn info_extracts_entities() {
        let mut inputs = PortValues::new();
        inputs.insert("in_file".to_string(), json!(BOLD));
        let info = BidsInfo.run(&inputs).expect("run");
        assert_eq!(info["subject"], "01");
        assert_eq!(info["task"], "rest");
        assert_eq!(info["run"], "1");
        assert!(info["acquisition"].is_null());
    }
}
