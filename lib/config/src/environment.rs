//! Read-only facts about the process environment.
//!
//! These are detected at start-up and recorded with the configuration for
//! provenance. Values found in a configuration file are ignored.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Marker variable set in the Docker image.
pub const DOCKER_MARKER: &str = "IS_DOCKER_8395080871";
/// Version of the Docker wrapper, if any.
pub const DOCKER_VERSION: &str = "DOCKER_VERSION_8395080871";

/// How the program is being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecEnv {
    #[default]
    Posix,
    Docker,
    Singularity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub cpu_count: usize,
    pub exec_env: ExecEnv,
    pub exec_docker_version: Option<String>,
    pub singularity_image: Option<String>,
    pub freesurfer_home: Option<PathBuf>,
    pub templateflow_home: Option<PathBuf>,
    pub fs_license: Option<PathBuf>,
    pub version: String,
}

impl Default for Environment {
    fn default() -> Self {
        Self::detect_from(|_| None)
    }
}

impl Environment {
    /// Detects the environment of the running process.
    #[must_use]
    pub fn detect() -> Self {
        Self::detect_from(|key| std::env::var(key).ok())
    }

    /// Detects the environment through `lookup`.
    #[must_use]
    pub fn detect_from<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let singularity = lookup("SINGULARITY_CONTAINER").or_else(|| lookup("SINGULARITY_NAME"));
        let exec_env = if singularity.is_some() {
            ExecEnv::Singularity
        } else if lookup(DOCKER_MARKER).is_some() {
            ExecEnv::Docker
        } else {
            ExecEnv::Posix
        };

        Self {
            cpu_count: std::thread::available_parallelism().map_or(1, usize::from),
            exec_env,
            exec_docker_version: lookup(DOCKER_VERSION),
            singularity_image: singularity,
            freesurfer_home: lookup("FREESURFER_HOME").map(PathBuf::from),
            templateflow_home: lookup("TEMPLATEFLOW_HOME").map(PathBuf::from),
            fs_license: lookup("FS_LICENSE").map(PathBuf::from),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn docker_marker_is_recognised() {
        let env = Environment::detect_from(lookup(&[
            (DOCKER_MARKER, "1"),
            (DOCKER_VERSION, "20.2.1"),
        ]));
        assert_eq!(env.exec_env, ExecEnv::Docker);
        assert_eq!(env.exec_docker_version.as_deref(), Some("20.2.1"));
    }

    #[test]
    fn singularity_wins_over_docker() {
        let env = Environment::detect_from(lookup(&[
            (DOCKER_MARKER, "1"),
            ("SINGULARITY_NAME", "fmriprep.simg"),
        ]));
        assert_eq!(env.exec_env, ExecEnv::Singularity);
        assert_eq!(env.singularity_image.as_deref(), Some("fmriprep.simg"));
    }

    #[test]
    fn plain_process() {
        let env = Environment::detect_from(lookup(&[("FS_LICENSE", "/opt/license.txt")]));
        assert_eq!(env.exec_env, ExecEnv::Posix);
        assert_eq!(env.fs_license, Some(PathBuf::from("/opt/license.txt")));
        assert!(env.cpu_count >= 1);
    }
}
