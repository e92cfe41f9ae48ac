//! Contract for querying a BIDS dataset.
//!
//! Layout discovery is supplied by the caller. The binary ships a
//! directory-backed implementation; [`MemoryLayout`] serves tests and
//! callers that already hold the descriptors.

use crate::bids::{BidsError, BoldRun, Fieldmap};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Queries the pipeline needs from a BIDS dataset.
pub trait BidsLayout {
    /// Subject labels present in the dataset, without the `sub-` prefix.
    ///
    /// # Errors
    ///
    /// Returns a [`BidsError`] when the dataset cannot be listed.
    fn subjects(&self) -> Result<Vec<String>, BidsError>;

    /// T1w images of a subject.
    ///
    /// # Errors
    ///
    /// Returns a [`BidsError`] when the subject folder cannot be read.
    fn t1w(&self, subject: &str) -> Result<Vec<PathBuf>, BidsError>;

    /// BOLD runs of a subject, sorted by file name.
    ///
    /// # Errors
    ///
    /// Returns a [`BidsError`] when a run or its sidecar cannot be read.
    fn bold_runs(&self, subject: &str) -> Result<Vec<BoldRun>, BidsError>;

    /// Fieldmaps whose `IntendedFor` lists the run.
    ///
    /// # Errors
    ///
    /// Returns a [`BidsError`] when a fieldmap sidecar cannot be read.
    fn fieldmaps(&self, run: &BoldRun) -> Result<Vec<Fieldmap>, BidsError>;
}

#[derive(Debug, Clone, Default)]
struct SubjectData {
    t1w: Vec<PathBuf>,
    runs: Vec<BoldRun>,
    fieldmaps: BTreeMap<PathBuf, Vec<Fieldmap>>,
}

/// An in-memory layout.
#[derive(Debug, Clone, Default)]
pub struct MemoryLayout {
    subjects: BTreeMap<String, SubjectData>,
}

impl MemoryLayout {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a T1w image for a subject.
    #[must_use]
    pub fn with_t1w(mut self, subject: &str, path: impl Into<PathBuf>) -> Self {
        self.subjects
            .entry(subject.to_string())
            .or_default()
            .t1w
            .push(path.into());
        self
    }

    /// Registers a BOLD run under its subject.
    #[must_use]
    pub fn with_run(mut self, run: BoldRun) -> Self {
        let data = self.subjects.entry(run.subject().to_string()).or_default();
        data.runs.push(run);
        data.runs.sort_by(|a, b| a.path.cmp(&b.path));
        self
    }

    /// Associates a fieldmap with the run at `bold_path`.
    #[must_use]
    pub fn with_fieldmap(mut self, subject: &str, bold_path: impl Into<PathBuf>, fmap: Fieldmap) -> Self {
        self.subjects
            .entry(subject.to_string())
            .or_default()
            .fieldmaps
            .entry(bold_path.into())
            .or_default()
            .push(fmap);
        self
    }
}

impl BidsLayout for MemoryLayout {
    fn subjects(&self) -> Result<Vec<String>, BidsError> {
        Ok(self.subjects.keys().cloned().collect())
    }

    fn t1w(&self, subject: &str) -> Result<Vec<PathBuf>, BidsError> {
        Ok(self
            .subjects
            .get(subject)
            .map(|data| data.t1w.clone())
            .unwrap_or_default())
    }

    fn bold_runs(&self, subject: &str) -> Result<Vec<BoldRun>, BidsError> {
        Ok(self
            .subjects
            .get(subject)
            .map(|data| data.runs.clone())
            .unwrap_or_default())
    }

    fn fieldmaps(&self, run: &BoldRun) -> Result<Vec<Fieldmap>, BidsError> {
        Ok(self
            .subjects
            .get(run.subject())
            .and_then(|data| data.fieldmaps.get(&run.path))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bids::BoldMetadata;

    fn run(path: &str) -> BoldRun {
        BoldRun::new(path, BoldMetadata::new(2.0), 100, 0.1).expect("run")
    }

    #[test]
    fn memory_layout_groups_by_subject() {
        let layout = MemoryLayout::new()
            .with_t1w("01", "/bids/sub-01/anat/sub-01_T1w.nii.gz")
            .with_run(run("/bids/sub-01/func/sub-01_task-rest_run-02_bold.nii.gz"))
            .with_run(run("/bids/sub-01/func/sub-01_task-rest_run-01_bold.nii.gz"))
            .with_run(run("/bids/sub-02/func/sub-02_task-rest_bold.nii.gz"));

        assert_eq!(layout.subjects().expect("subjects"), vec!["01", "02"]);
        let runs = layout.bold_runs("01").expect("runs");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].name.get("run"), Some("01"));
        assert!(layout.t1w("02").expect("t1w").is_empty());
    }

    #[test]
    fn fieldmaps_are_keyed_by_run() {
        let bold = run("/bids/sub-01/func/sub-01_task-rest_bold.nii.gz");
        let layout = MemoryLayout::new().with_run(bold.clone()).with_fieldmap(
            "01",
            bold.path.clone(),
            Fieldmap::Epi {
                epi_files: vec!["/bids/sub-01/fmap/sub-01_dir-PA_epi.nii.gz".into()],
            },
        );
        assert_eq!(layout.fieldmaps(&bold).expect("fmaps").len(), 1);
    }
}
