//! A [`BidsLayout`] backed by a BIDS directory tree.
//!
//! Sidecars follow the inheritance principle: every `.json` file between the
//! dataset root and the image whose entities are a subset of the image's and
//! whose suffix matches contributes, deeper files overriding shallower ones.
//! Volume counts come from the NIfTI header, read through gzip when needed.

use flate2::read::GzDecoder;
use fmriprep_core::{BidsError, BidsLayout, BidsName, BoldMetadata, BoldRun, Fieldmap};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const NIFTI_EXTENSIONS: [&str; 2] = [".nii.gz", ".nii"];
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// A BIDS dataset on disk.
#[derive(Debug, Clone)]
pub struct DirectoryLayout {
    root: PathBuf,
}

fn io_error(path: &Path, err: &std::io::Error) -> BidsError {
    BidsError::Io {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn is_nifti(name: &str) -> bool {
    NIFTI_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Sorted entries of `dir`; a missing directory is empty.
fn entries(dir: &Path) -> Result<Vec<PathBuf>, BidsError> {
    let reader = match std::fs::read_dir(dir) {
        Ok(reader) => reader,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_error(dir, &err)),
    };
    let mut paths = Vec::new();
    for entry in reader {
        paths.push(entry.map_err(|e| io_error(dir, &e))?.path());
    }
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

/// Entities and suffix of a sidecar name; sidecars may omit `sub`.
fn sidecar_entities(name: &str) -> Option<(Vec<(&str, &str)>, &str)> {
    let stem = name.strip_suffix(".json")?;
    let mut parts: Vec<&str> = stem.split('_').collect();
    let suffix = parts.pop()?;
    let entities = parts
        .into_iter()
        .map(|part| part.split_once('-'))
        .collect::<Option<Vec<_>>>()?;
    Some((entities, suffix))
}

fn sidecar_applies(sidecar: &str, image: &BidsName) -> bool {
    sidecar_entities(sidecar).is_some_and(|(entities, suffix)| {
        suffix == image.suffix()
            && entities
                .iter()
                .all(|(key, value)| image.get(key) == Some(*value))
    })
}

fn read_json(path: &Path) -> Result<Map<String, JsonValue>, BidsError> {
    let text = std::fs::read_to_string(path).map_err(|e| io_error(path, &e))?;
    match serde_json::from_str(&text) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(BidsError::InvalidMetadata {
            path: path.to_path_buf(),
            reason: "sidecar is not a JSON object".to_string(),
        }),
        Err(err) => Err(BidsError::InvalidMetadata {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }),
    }
}

/// Reads `dim[4]` from a NIfTI-1 or NIfTI-2 header.
///
/// # Errors
///
/// Returns [`BidsError::InvalidMetadata`] when the header is unreadable.
pub fn nifti_volumes(path: &Path) -> Result<usize, BidsError> {
    let invalid = |reason: String| BidsError::InvalidMetadata {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| io_error(path, &e))?;
    let mut reader: Box<dyn Read> = if file_name(path).ends_with(".gz") {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut header = [0u8; 540];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) => return Err(invalid(err.to_string())),
        }
    }
    if filled < 348 {
        return Err(invalid(format!("header truncated at {filled} bytes")));
    }

    let size = [header[0], header[1], header[2], header[3]];
    let dims: Vec<i64> = match (i32::from_le_bytes(size), i32::from_be_bytes(size)) {
        (348, _) => (0..8)
            .map(|i| i64::from(i16::from_le_bytes([header[40 + 2 * i], header[41 + 2 * i]])))
            .collect(),
        (_, 348) => (0..8)
            .map(|i| i64::from(i16::from_be_bytes([header[40 + 2 * i], header[41 + 2 * i]])))
            .collect(),
        (540, _) if filled == 540 => (0..8)
            .map(|i| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&header[16 + 8 * i..24 + 8 * i]);
                i64::from_le_bytes(bytes)
            })
            .collect(),
        (other, _) => return Err(invalid(format!("unknown header size {other}"))),
    };

    let volumes = if dims[0] >= 4 { dims[4] } else { 1 };
    usize::try_from(volumes)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| invalid(format!("invalid volume count {volumes}")))
}

impl DirectoryLayout {
    /// Opens the dataset at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`BidsError::Io`] when `root` is not a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BidsError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(BidsError::Io {
                path: root,
                reason: "not a directory".to_string(),
            });
        }
        Ok(Self { root })
    }

    /// The subject folder and its session folders.
    fn subject_dirs(&self, subject: &str) -> Result<Vec<PathBuf>, BidsError> {
        let subject_dir = self.root.join(format!("sub-{subject}"));
        let mut dirs = vec![subject_dir.clone()];
        for path in entries(&subject_dir)? {
            if path.is_dir() && file_name(&path).starts_with("ses-") {
                dirs.push(path);
            }
        }
        Ok(dirs)
    }

    /// NIfTI images with `suffix` in the `datatype` folders of a subject.
    fn images(&self, subject: &str, datatype: &str, suffix: &str) -> Result<Vec<PathBuf>, BidsError> {
        let mut found = Vec::new();
        for dir in self.subject_dirs(subject)? {
            for path in entries(&dir.join(datatype))? {
                let name = file_name(&path);
                if is_nifti(name) && BidsName::parse(name).is_ok_and(|n| n.suffix() == suffix) {
                    found.push(path);
                }
            }
        }
        Ok(found)
    }

    /// Merged sidecar of an image.
    fn metadata(&self, image: &Path) -> Result<Map<String, JsonValue>, BidsError> {
        let name = BidsName::from_path(image)?;
        let mut levels = Vec::new();
        let mut dir = image.parent();
        while let Some(current) = dir {
            levels.push(current.to_path_buf());
            if current == self.root {
                break;
            }
            dir = current.parent();
        }

        let mut merged = Map::new();
        for level in levels.iter().rev() {
            for path in entries(level)? {
                if sidecar_applies(file_name(&path), &name) {
                    merged.extend(read_json(&path)?);
                }
            }
        }
        Ok(merged)
    }

    fn bold_run(&self, path: &Path) -> Result<BoldRun, BidsError> {
        let sidecar = JsonValue::Object(self.metadata(path)?).to_string();
        let metadata = BoldMetadata::from_json(path, &sidecar)?;
        let n_volumes = nifti_volumes(path)?;
        let size_gb = std::fs::metadata(path)
            .map_err(|e| io_error(path, &e))?
            .len() as f64
            / BYTES_PER_GB;
        BoldRun::new(path, metadata, n_volumes, size_gb)
    }

    /// `IntendedFor` targets of a fieldmap sidecar, as absolute paths.
    fn intended_for(&self, subject: &str, sidecar: &Map<String, JsonValue>) -> Vec<PathBuf> {
        let targets = match sidecar.get("IntendedFor") {
            Some(JsonValue::String(one)) => vec![one.as_str()],
            Some(JsonValue::Array(many)) => many.iter().filter_map(JsonValue::as_str).collect(),
            _ => Vec::new(),
        };
        targets
            .into_iter()
            .map(|target| match target.strip_prefix("bids::") {
                Some(from_root) => self.root.join(from_root),
                None => self.root.join(format!("sub-{subject}")).join(target),
            })
            .collect()
    }

    fn sibling(path: &Path, suffix: &str) -> Option<PathBuf> {
        let name = BidsName::from_path(path).ok()?;
        let dir = path.parent()?;
        NIFTI_EXTENSIONS
            .iter()
            .map(|ext| dir.join(name.clone().with_suffix(suffix).with_extension(*ext).file_name()))
            .find(|candidate| candidate.is_file())
    }
}

impl BidsLayout for DirectoryLayout {
    fn subjects(&self) -> Result<Vec<String>, BidsError> {
        Ok(entries(&self.root)?
            .iter()
            .filter(|path| path.is_dir())
            .filter_map(|path| file_name(path).strip_prefix("sub-").map(str::to_string))
            .collect())
    }

    fn t1w(&self, subject: &str) -> Result<Vec<PathBuf>, BidsError> {
        self.images(subject, "anat", "T1w")
    }

    fn bold_runs(&self, subject: &str) -> Result<Vec<BoldRun>, BidsError> {
        let mut echoes: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for path in self.images(subject, "func", "bold")? {
            let name = BidsName::from_path(&path)?;
            echoes
                .entry(name.without_entity("echo").file_name())
                .or_default()
                .push(path);
        }

        let mut runs = Vec::with_capacity(echoes.len());
        for paths in echoes.into_values() {
            let mut run = self.bold_run(&paths[0])?;
            if paths.len() > 1 {
                let mut echo_times = Vec::with_capacity(paths.len());
                for path in &paths {
                    let sidecar = JsonValue::Object(self.metadata(path)?).to_string();
                    if let Some(te) = BoldMetadata::from_json(path, &sidecar)?.echo_time {
                        echo_times.push(te);
                    }
                }
                run.echo_times = echo_times;
            }
            debug!(path = %run.path.display(), volumes = run.n_volumes, "found BOLD run");
            runs.push(run);
        }
        runs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(runs)
    }

    fn fieldmaps(&self, run: &BoldRun) -> Result<Vec<Fieldmap>, BidsError> {
        let subject = run.subject();
        let mut fieldmaps = Vec::new();
        let mut epi_files = Vec::new();

        for dir in self.subject_dirs(subject)? {
            for path in entries(&dir.join("fmap"))? {
                let name = file_name(&path);
                if !is_nifti(name) {
                    continue;
                }
                let Ok(bids_name) = BidsName::parse(name) else {
                    continue;
                };
                let sidecar = self.metadata(&path)?;
                if !self.intended_for(subject, &sidecar).contains(&run.path) {
                    continue;
                }
                match bids_name.suffix() {
                    "epi" => epi_files.push(path),
                    "phasediff" => match Self::sibling(&path, "magnitude1") {
                        Some(magnitude1) => fieldmaps.push(Fieldmap::Phasediff {
                            magnitude2: Self::sibling(&path, "magnitude2"),
                            phasediff: path,
                            magnitude1,
                        }),
                        None => warn!(path = %path.display(), "phasediff without magnitude1, skipping"),
                    },
                    "fieldmap" => match Self::sibling(&path, "magnitude") {
                        Some(magnitude) => fieldmaps.push(Fieldmap::Direct {
                            fieldmap: path,
                            magnitude,
                        }),
                        None => warn!(path = %path.display(), "fieldmap without magnitude, skipping"),
                    },
                    _ => {}
                }
            }
        }

        if !epi_files.is_empty() {
            fieldmaps.push(Fieldmap::Epi { epi_files });
        }
        Ok(fieldmaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn nifti1(volumes: i16) -> Vec<u8> {
        let mut header = vec![0u8; 352];
        header[0..4].copy_from_slice(&348i32.to_le_bytes());
        let dims: [i16; 8] = [4, 4, 4, 2, volumes, 1, 1, 1];
        for (i, dim) in dims.iter().enumerate() {
            header[40 + 2 * i..42 + 2 * i].copy_from_slice(&dim.to_le_bytes());
        }
        header[344..348].copy_from_slice(b"n+1\0");
        header
    }

    fn write_gz(path: &Path, bytes: &[u8]) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).expect("compress");
        std::fs::write(path, encoder.finish().expect("finish")).expect("write");
    }

    fn touch(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, contents).expect("write");
    }

    /// sub-01 with one run and a phasediff fieldmap, sub-02 anatomy only.
    fn dataset() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        touch(&root.join("dataset_description.json"), r#"{"Name": "test"}"#);
        touch(&root.join("task-rest_bold.json"), r#"{"RepetitionTime": 2.0, "TaskName": "rest"}"#);

        touch(&root.join("sub-01/anat/sub-01_T1w.nii.gz"), "");
        let func = root.join("sub-01/func");
        std::fs::create_dir_all(&func).expect("mkdir");
        write_gz(&func.join("sub-01_task-rest_bold.nii.gz"), &nifti1(120));
        touch(
            &func.join("sub-01_task-rest_bold.json"),
            r#"{"SliceTiming": [0.0, 0.5, 1.0, 1.5], "PhaseEncodingDirection": "j-"}"#,
        );

        let fmap = root.join("sub-01/fmap");
        touch(&fmap.join("sub-01_phasediff.nii.gz"), "");
        touch(&fmap.join("sub-01_magnitude1.nii.gz"), "");
        touch(
            &fmap.join("sub-01_phasediff.json"),
            r#"{"EchoTime1": 0.006, "EchoTime2": 0.00846, "IntendedFor": "func/sub-01_task-rest_bold.nii.gz"}"#,
        );
        touch(&fmap.join("sub-01_dir-PA_epi.nii.gz"), "");
        touch(
            &fmap.join("sub-01_dir-PA_epi.json"),
            r#"{"IntendedFor": ["bids::sub-01/func/sub-01_task-rest_bold.nii.gz"]}"#,
        );

        touch(&root.join("sub-02/anat/sub-02_T1w.nii"), "");
        dir
    }

    #[test]
    fn lists_subjects_and_anatomy() {
        let dir = dataset();
        let layout = DirectoryLayout::open(dir.path()).expect("open");
        assert_eq!(layout.subjects().expect("subjects"), vec!["01", "02"]);
        assert_eq!(layout.t1w("02").expect("t1w").len(), 1);
        assert!(layout.bold_runs("02").expect("runs").is_empty());
        assert!(layout.t1w("03").expect("missing subject").is_empty());
    }

    #[test]
    fn runs_inherit_sidecars() {
        let dir = dataset();
        let layout = DirectoryLayout::open(dir.path()).expect("open");
        let runs = layout.bold_runs("01").expect("runs");
        assert_eq!(runs.len(), 1);

        let run = &runs[0];
        assert_eq!(run.n_volumes, 120);
        assert!((run.metadata.repetition_time - 2.0).abs() < f64::EPSILON);
        assert!(run.has_slice_timing());
        assert!(run.metadata.phase_encoding_direction.is_some());
    }

    #[test]
    fn fieldmaps_follow_intended_for() {
        let dir = dataset();
        let layout = DirectoryLayout::open(dir.path()).expect("open");
        let run = layout.bold_runs("01").expect("runs").remove(0);
        let fieldmaps = layout.fieldmaps(&run).expect("fieldmaps");

        let methods: Vec<&str> = fieldmaps.iter().map(Fieldmap::method).collect();
        assert_eq!(methods, vec!["phasediff", "epi"]);
        assert_eq!(Fieldmap::preferred(&fieldmaps).map(Fieldmap::method), Some("epi"));
        let Fieldmap::Phasediff { magnitude2, .. } = &fieldmaps[0] else {
            panic!("expected a phasediff fieldmap");
        };
        assert!(magnitude2.is_none());
    }

    #[test]
    fn missing_sidecar_field_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let func = dir.path().join("sub-01/func");
        std::fs::create_dir_all(&func).expect("mkdir");
        std::fs::write(func.join("sub-01_task-rest_bold.nii"), nifti1(10)).expect("write");
        touch(&func.join("sub-01_task-rest_bold.json"), "{}");

        let layout = DirectoryLayout::open(dir.path()).expect("open");
        let err = layout.bold_runs("01").unwrap_err();
        assert!(matches!(err, BidsError::InvalidMetadata { .. }));
    }

    #[test]
    fn truncated_header_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sub-01_task-rest_bold.nii");
        std::fs::write(&path, [0u8; 10]).expect("write");
        assert!(nifti_volumes(&path).is_err());
        assert!(DirectoryLayout::open(dir.path().join("absent")).is_err());
    }
}
