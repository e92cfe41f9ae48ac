//! `dataset_description.json` of the derivatives folder.

use crate::environment::{Environment, ExecEnv};
use crate::error::ConfigError;
use fmriprep_core::bids::DERIVATIVES_FOLDER;
use rootcause::Report;
use serde_json::{Value as JsonValue, json};
use std::path::{Path, PathBuf};
use tracing::debug;

const BIDS_VERSION: &str = "1.4.0";

/// Builds the description of the derivatives dataset.
#[must_use]
pub fn dataset_description(environment: &Environment) -> JsonValue {
    let version = &environment.version;
    let mut generated_by = json!({
        "Name": "fMRIPrep",
        "Version": version,
        "CodeURL": format!("https://github.com/nipreps/fmriprep/archive/{version}.tar.gz"),
    });
    let container = match environment.exec_env {
        ExecEnv::Docker => Some(json!({
            "Type": "docker",
            "Tag": format!("nipreps/fmriprep:{version}"),
        })),
        ExecEnv::Singularity => Some(json!({
            "Type": "singularity",
            "URI": environment.singularity_image,
        })),
        ExecEnv::Posix => None,
    };
    if let (Some(container), Some(object)) = (container, generated_by.as_object_mut()) {
        object.insert("Container".to_string(), container);
    }

    json!({
        "Name": "fMRIPrep - fMRI PREProcessing workflow",
        "BIDSVersion": BIDS_VERSION,
        "DatasetType": "derivative",
        "GeneratedBy": [generated_by],
        "HowToAcknowledge": "Please cite fMRIPrep and include the generated citation boilerplate in the methods section.",
    })
}

/// Writes the description under `output_dir/fmriprep` unless it exists.
///
/// # Errors
///
/// Returns [`ConfigError::Write`] when the folder or file cannot be written.
pub fn write_dataset_description(
    output_dir: &Path,
    environment: &Environment,
) -> Result<PathBuf, Report<ConfigError>> {
    let folder = output_dir.join(DERIVATIVES_FOLDER);
    let path = folder.join("dataset_description.json");
    if path.exists() {
        debug!(path = %path.display(), "dataset description already present");
        return Ok(path);
    }

    let write_error = |reason: String| ConfigError::Write {
        path: path.clone(),
        reason,
    };
    std::fs::create_dir_all(&folder).map_err(|e| write_error(e.to_string()))?;
    let text = serde_json::to_string_pretty(&dataset_description(environment))
        .map_err(|e| write_error(e.to_string()))?;
    std::fs::write(&path, text).map_err(|e| write_error(e.to_string()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_container_is_described() {
        let environment = Environment {
            exec_env: ExecEnv::Docker,
            version: "20.2.0".to_string(),
            ..Environment::default()
        };
        let description = dataset_description(&environment);
        assert_eq!(description["DatasetType"], "derivative");
        let generated = &description["GeneratedBy"][0];
        assert_eq!(generated["Container"]["Tag"], "nipreps/fmriprep:20.2.0");
        assert!(
            generated["CodeURL"]
                .as_str()
                .expect("url")
                .ends_with("20.2.0.tar.gz")
        );
    }

    #[test]
    fn written_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let environment = Environment::default();
        let path = write_dataset_description(dir.path(), &environment).expect("write");
        assert!(path.ends_with("fmriprep/dataset_description.json"));

        std::fs::write(&path, "{}").expect("overwrite");
        write_dataset_description(dir.path(), &environment).expect("second call");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "{}");
    }
}
