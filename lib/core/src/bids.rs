//! BIDS descriptors for functional runs and fieldmaps.
//!
//! A [`BidsName`] is the parsed form of a BIDS file name (`key-value`
//! entities, a suffix and an extension). It is also the basis for naming
//! derivatives: the source entities are kept in order, `space`/`res`/`desc`
//! style entities are slotted in at their canonical position, and the
//! suffix and extension are replaced.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the derivatives folder created under the output directory.
pub const DERIVATIVES_FOLDER: &str = "fmriprep";

/// Canonical order of entities in BIDS and BIDS-Derivatives file names.
const ENTITY_ORDER: &[&str] = &[
    "sub", "ses", "task", "acq", "ce", "rec", "dir", "run", "mod", "echo", "from", "to", "mode",
    "hemi", "space", "cohort", "res", "den", "label", "desc",
];

/// Errors raised while interpreting BIDS names and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BidsError {
    /// A file name could not be parsed into entities.
    InvalidName { name: String, reason: String },
    /// A sidecar could not be read or lacks a required field.
    InvalidMetadata { path: PathBuf, reason: String },
    /// The file system could not be queried.
    Io { path: PathBuf, reason: String },
}

impl fmt::Display for BidsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName { name, reason } => {
                write!(f, "invalid BIDS name '{name}': {reason}")
            }
            Self::InvalidMetadata { path, reason } => {
                write!(f, "invalid metadata for {}: {reason}", path.display())
            }
            Self::Io { path, reason } => {
                write!(f, "cannot read {}: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for BidsError {}

/// A parsed BIDS file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidsName {
    entities: Vec<(String, String)>,
    suffix: String,
    extension: String,
}

impl BidsName {
    /// Parses a file name such as `sub-01_task-rest_run-1_bold.nii.gz`.
    ///
    /// # Errors
    ///
    /// Returns [`BidsError::InvalidName`] when the name has no `sub` entity,
    /// no suffix, or a malformed `key-value` pair.
    pub fn parse(file_name: &str) -> Result<Self, BidsError> {
        let invalid = |reason: &str| BidsError::InvalidName {
            name: file_name.to_string(),
            reason: reason.to_string(),
        };

        let (stem, extension) = match file_name.find('.') {
            Some(dot) => (&file_name[..dot], &file_name[dot..]),
            None => (file_name, ""),
        };

        let mut parts: Vec<&str> = stem.split('_').collect();
        let suffix = parts.pop().ok_or_else(|| invalid("empty name"))?;
        if suffix.is_empty() || suffix.contains('-') {
            return Err(invalid("missing suffix"));
        }

        let mut entities = Vec::with_capacity(parts.len());
        for part in parts {
            let (key, value) = part
                .split_once('-')
                .ok_or_else(|| invalid("entity without a value"))?;
            if key.is_empty() || value.is_empty() {
                return Err(invalid("empty entity key or value"));
            }
            entities.push((key.to_string(), value.to_string()));
        }

        if entities.first().is_none_or(|(key, _)| key != "sub") {
            return Err(invalid("name must start with a sub entity"));
        }

        Ok(Self {
            entities,
            suffix: suffix.to_string(),
            extension: extension.to_string(),
        })
    }

    /// Parses the file name component of a path.
    ///
    /// # Errors
    ///
    /// See [`BidsName::parse`].
    pub fn from_path(path: &Path) -> Result<Self, BidsError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| BidsError::InvalidName {
                name: path.display().to_string(),
                reason: "path has no file name".to_string(),
            })?;
        Self::parse(file_name)
    }

    /// Returns the value of an entity.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the subject label (without the `sub-` prefix).
    #[must_use]
    pub fn subject(&self) -> &str {
        self.get("sub").unwrap_or_default()
    }

    /// Returns the session label if present.
    #[must_use]
    pub fn session(&self) -> Option<&str> {
        self.get("ses")
    }

    /// Returns the suffix (`bold`, `T1w`, `phasediff`, ...).
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Returns the extension including the leading dot.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Returns the entities in file-name order.
    pub fn entities(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entities.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Sets an entity, replacing an existing value or inserting it at its
    /// canonical position.
    #[must_use]
    pub fn with_entity(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if let Some(slot) = self.entities.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
            return self;
        }

        let rank = |k: &str| ENTITY_ORDER.iter().position(|o| *o == k).unwrap_or(ENTITY_ORDER.len());
        let new_rank = rank(key);
        let position = self
            .entities
            .iter()
            .position(|(k, _)| rank(k) > new_rank)
            .unwrap_or(self.entities.len());
        self.entities.insert(position, (key.to_string(), value));
        self
    }

    /// Removes an entity if present.
    #[must_use]
    pub fn without_entity(mut self, key: &str) -> Self {
        self.entities.retain(|(k, _)| k != key);
        self
    }

    /// Replaces the suffix.
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Replaces the extension (include the leading dot).
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Returns the file name.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.to_string()
    }

    /// Returns an identifier made of the non-subject entities, suitable for
    /// naming per-run workflows (`task_rest_run_01`).
    #[must_use]
    pub fn run_identifier(&self) -> String {
        let mut parts = Vec::new();
        for (key, value) in self.entities() {
            if key == "sub" {
                continue;
            }
            parts.push(key.to_string());
            parts.push(value.replace(|c: char| !c.is_ascii_alphanumeric(), "_"));
        }
        parts.join("_")
    }
}

impl fmt::Display for BidsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entities {
            write!(f, "{key}-{value}_")?;
        }
        write!(f, "{}{}", self.suffix, self.extension)
    }
}

/// Returns the directory derivatives of `name` are written to:
/// `output_dir/fmriprep/sub-<label>[/ses-<label>]/<datatype>`.
#[must_use]
pub fn derivatives_dir(output_dir: &Path, name: &BidsName, datatype: &str) -> PathBuf {
    let mut dir = output_dir
        .join(DERIVATIVES_FOLDER)
        .join(format!("sub-{}", name.subject()));
    if let Some(session) = name.session() {
        dir = dir.join(format!("ses-{session}"));
    }
    dir.join(datatype)
}

/// Phase-encoding direction (`i`, `j`, `k`, optionally reversed with `-`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhaseEncodingDirection {
    /// Voxel axis index (0 = i, 1 = j, 2 = k).
    pub axis: u8,
    /// Whether the direction is reversed (`j-`).
    pub reversed: bool,
}

impl fmt::Display for PhaseEncodingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let axis = ['i', 'j', 'k'][usize::from(self.axis.min(2))];
        write!(f, "{axis}{}", if self.reversed { "-" } else { "" })
    }
}

impl TryFrom<String> for PhaseEncodingDirection {
    type Error = BidsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let invalid = || BidsError::InvalidName {
            name: value.clone(),
            reason: "phase-encoding direction must be one of i, j, k, i-, j-, k-".to_string(),
        };
        let mut chars = value.chars();
        let axis = match chars.next() {
            Some('i') => 0,
            Some('j') => 1,
            Some('k') => 2,
            _ => return Err(invalid()),
        };
        let reversed = match chars.as_str() {
            "" => false,
            "-" => true,
            _ => return Err(invalid()),
        };
        Ok(Self { axis, reversed })
    }
}

impl From<PhaseEncodingDirection> for String {
    fn from(value: PhaseEncodingDirection) -> Self {
        value.to_string()
    }
}

/// The subset of a BOLD sidecar the pipeline consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BoldMetadata {
    /// Repetition time in seconds.
    pub repetition_time: f64,
    /// Acquisition time of each slice, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_timing: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_encoding_direction: Option<PhaseEncodingDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_readout_time: Option<f64>,
}

impl BoldMetadata {
    /// Creates metadata holding only a repetition time.
    #[must_use]
    pub fn new(repetition_time: f64) -> Self {
        Self {
            repetition_time,
            slice_timing: None,
            phase_encoding_direction: None,
            echo_time: None,
            total_readout_time: None,
        }
    }

    /// Parses a JSON sidecar.
    ///
    /// # Errors
    ///
    /// Returns [`BidsError::InvalidMetadata`] when `RepetitionTime` is missing
    /// or any known field has the wrong type.
    pub fn from_json(path: &Path, json: &str) -> Result<Self, BidsError> {
        serde_json::from_str(json).map_err(|e| BidsError::InvalidMetadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// A functional run, built once from the layout and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoldRun {
    pub path: PathBuf,
    pub name: BidsName,
    pub metadata: BoldMetadata,
    /// Echo times of every echo in a multi-echo acquisition.
    #[serde(default)]
    pub echo_times: Vec<f64>,
    /// Number of volumes.
    pub n_volumes: usize,
    /// File size in gigabytes.
    pub size_gb: f64,
}

impl BoldRun {
    /// Creates a run descriptor, deriving the BIDS name from the path.
    ///
    /// # Errors
    ///
    /// Returns [`BidsError::InvalidName`] when the path is not a BIDS name.
    pub fn new(
        path: impl Into<PathBuf>,
        metadata: BoldMetadata,
        n_volumes: usize,
        size_gb: f64,
    ) -> Result<Self, BidsError> {
        let path = path.into();
        let name = BidsName::from_path(&path)?;
        Ok(Self {
            path,
            name,
            metadata,
            echo_times: Vec::new(),
            n_volumes,
            size_gb,
        })
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        self.name.subject()
    }

    /// Whether the run was acquired with more than one echo.
    #[must_use]
    pub fn is_multi_echo(&self) -> bool {
        self.echo_times.len() > 1
    }

    /// Whether the sidecar carries a usable per-slice timing vector.
    #[must_use]
    pub fn has_slice_timing(&self) -> bool {
        self.metadata
            .slice_timing
            .as_ref()
            .is_some_and(|timing| timing.len() >= 2)
    }
}

/// A fieldmap acquisition associated with a BOLD run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fieldmap {
    /// Phase-difference map with its magnitude images.
    Phasediff {
        phasediff: PathBuf,
        magnitude1: PathBuf,
        magnitude2: Option<PathBuf>,
    },
    /// Directly measured fieldmap (Hz) with its magnitude.
    Direct { fieldmap: PathBuf, magnitude: PathBuf },
    /// Reversed phase-encoding EPI references ("pepolar").
    Epi { epi_files: Vec<PathBuf> },
}

impl Fieldmap {
    /// Name of the correction method this fieldmap drives.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Phasediff { .. } => "phasediff",
            Self::Direct { .. } => "fieldmap",
            Self::Epi { .. } => "epi",
        }
    }

    fn priority(&self) -> u8 {
        match self {
            Self::Epi { .. } => 0,
            Self::Direct { .. } => 1,
            Self::Phasediff { .. } => 2,
        }
    }

    /// Picks the preferred fieldmap: `epi` over `fieldmap` over `phasediff`.
    /// Ties keep the first listed.
    #[must_use]
    pub fn preferred(fieldmaps: &[Self]) -> Option<&Self> {
        fieldmaps.iter().min_by_key(|fmap| fmap.priority())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bold_name() {
        let name = BidsName::parse("sub-01_ses-pre_task-rest_run-01_bold.nii.gz").expect("parse");
        assert_eq!(name.subject(), "01");
        assert_eq!(name.session(), Some("pre"));
        assert_eq!(name.get("task"), Some("rest"));
        assert_eq!(name.suffix(), "bold");
        assert_eq!(name.extension(), ".nii.gz");
    }

    #[test]
    fn parse_rejects_missing_subject() {
        let err = BidsName::parse("task-rest_bold.nii.gz").unwrap_err();
        assert!(err.to_string().contains("sub entity"));
    }

    #[test]
    fn parse_rejects_dangling_entity() {
        assert!(BidsName::parse("sub-01_task_bold.nii.gz").is_err());
    }

    #[test]
    fn derivative_name_inserts_entities_in_order() {
        let name = BidsName::parse("sub-01_task-rest_run-01_bold.nii.gz").expect("parse");
        let derived = name
            .with_entity("desc", "preproc")
            .with_entity("space", "MNI152NLin2009cAsym")
            .with_entity("res", "2");
        assert_eq!(
            derived.file_name(),
            "sub-01_task-rest_run-01_space-MNI152NLin2009cAsym_res-2_desc-preproc_bold.nii.gz"
        );
    }

    #[test]
    fn derivative_name_replaces_suffix_and_extension() {
        let name = BidsName::parse("sub-01_task-rest_bold.nii.gz").expect("parse");
        let derived = name
            .with_entity("desc", "confounds")
            .with_suffix("regressors")
            .with_extension(".tsv");
        assert_eq!(
            derived.file_name(),
            "sub-01_task-rest_desc-confounds_regressors.tsv"
        );
    }

    #[test]
    fn derivatives_dir_includes_session() {
        let name = BidsName::parse("sub-01_ses-pre_task-rest_bold.nii.gz").expect("parse");
        let dir = derivatives_dir(Path::new("/out"), &name, "func");
        assert_eq!(dir, PathBuf::from("/out/fmriprep/sub-01/ses-pre/func"));
    }

    #[test]
    fn run_identifier_skips_subject() {
        let name = BidsName::parse("sub-01_task-rest_run-01_bold.nii.gz").expect("parse");
        assert_eq!(name.run_identifier(), "task_rest_run_01");
    }

    #[test]
    fn metadata_from_sidecar() {
        let json = r#"{"RepetitionTime": 2.0, "SliceTiming": [0.0, 0.5, 1.0, 1.5],
                       "PhaseEncodingDirection": "j-", "TaskName": "rest"}"#;
        let meta = BoldMetadata::from_json(Path::new("bold.json"), json).expect("parse");
        assert_eq!(meta.repetition_time, 2.0);
        assert_eq!(meta.slice_timing.as_ref().map(Vec::len), Some(4));
        let pe = meta.phase_encoding_direction.expect("pe");
        assert_eq!(pe.axis, 1);
        assert!(pe.reversed);
        assert_eq!(pe.to_string(), "j-");
    }

    #[test]
    fn metadata_requires_repetition_time() {
        let err = BoldMetadata::from_json(Path::new("bold.json"), "{}").unwrap_err();
        assert!(matches!(err, BidsError::InvalidMetadata { .. }));
    }

    #[test]
    fn slice_timing_needs_two_slices() {
        let mut meta = BoldMetadata::new(2.0);
        meta.slice_timing = Some(vec![0.0]);
        let run = BoldRun::new("/data/sub-01/func/sub-01_task-rest_bold.nii.gz", meta, 100, 0.1)
            .expect("run");
        assert!(!run.has_slice_timing());
    }

    #[test]
    fn fieldmap_preference_order() {
        let phasediff = Fieldmap::Phasediff {
            phasediff: "ph.nii.gz".into(),
            magnitude1: "mag1.nii.gz".into(),
            magnitude2: None,
        };
        let epi = Fieldmap::Epi {
            epi_files: vec!["epi.nii.gz".into()],
        };
        let direct = Fieldmap::Direct {
            fieldmap: "fmap.nii.gz".into(),
            magnitude: "mag.nii.gz".into(),
        };

        let available = vec![phasediff.clone(), direct.clone(), epi];
        assert_eq!(Fieldmap::preferred(&available).map(Fieldmap::method), Some("epi"));

        let available = vec![phasediff, direct];
        assert_eq!(
            Fieldmap::preferred(&available).map(Fieldmap::method),
            Some("fieldmap")
        );
        assert!(Fieldmap::preferred(&[]).is_none());
    }
}
