//! The `execution`, `workflow` and `nipype` sections.

use crate::error::ConfigError;
use chrono::Utc;
use fmriprep_core::{SpaceError, SpatialReferences};
use fmriprep_workflow::FailureMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;
use ulid::Ulid;

/// Output space used when none is requested.
pub const DEFAULT_SPACE: &str = "MNI152NLin2009cAsym";

/// Paths and switches of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Execution {
    pub bids_dir: PathBuf,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    /// Participants to process, without `sub-`; empty means all.
    pub participant_label: Vec<String>,
    /// Identifier of this invocation, `YYYYMMDD-HHMMSS_<ulid>`.
    pub run_uuid: String,
    pub fs_license_file: Option<PathBuf>,
    pub fs_subjects_dir: Option<PathBuf>,
    pub low_mem: bool,
    pub notrack: bool,
    pub debug: bool,
}

impl Default for Execution {
    fn default() -> Self {
        Self {
            bids_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            work_dir: PathBuf::from("work"),
            participant_label: Vec::new(),
            run_uuid: new_run_uuid(),
            fs_license_file: None,
            fs_subjects_dir: None,
            low_mem: false,
            notrack: false,
            debug: false,
        }
    }
}

#[must_use]
pub fn new_run_uuid() -> String {
    format!("{}_{}", Utc::now().format("%Y%m%d-%H%M%S"), Ulid::new())
}

impl Execution {
    /// Where report fragments are collected before assembly.
    #[must_use]
    pub fn reportlets_dir(&self) -> PathBuf {
        self.work_dir.join("reportlets")
    }

    /// FreeSurfer subjects directory, defaulting inside the derivatives.
    #[must_use]
    pub fn subjects_dir(&self) -> PathBuf {
        self.fs_subjects_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("freesurfer"))
    }

    /// Removes a leading `sub-` from participant labels.
    pub fn normalize_labels(&mut self) {
        for label in &mut self.participant_label {
            if let Some(stripped) = label.strip_prefix("sub-") {
                *label = stripped.to_string();
            }
        }
    }
}

/// Inputs that can be ignored even when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ignore {
    Fieldmaps,
    Slicetiming,
    Sbref,
}

impl fmt::Display for Ignore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fieldmaps => write!(f, "fieldmaps"),
            Self::Slicetiming => write!(f, "slicetiming"),
            Self::Sbref => write!(f, "sbref"),
        }
    }
}

impl FromStr for Ignore {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fieldmaps" => Ok(Self::Fieldmaps),
            "slicetiming" => Ok(Self::Slicetiming),
            "sbref" => Ok(Self::Sbref),
            other => Err(ConfigError::Invalid {
                setting: "workflow.ignore".to_string(),
                reason: format!("unknown input '{other}'"),
            }),
        }
    }
}

/// Choices that shape the assembled pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub anat_only: bool,
    /// Fail on ICA-AROMA warnings instead of continuing with empty outputs.
    pub aroma_err_on_warn: bool,
    /// MELODIC dimensionality; `None` lets MELODIC estimate it.
    pub aroma_melodic_dim: Option<i32>,
    pub bold2t1w_dof: u8,
    /// Grayordinates density (`91k` or `170k`).
    pub cifti_output: Option<String>,
    /// Non-steady-state volumes declared by the user.
    pub dummy_scans: Option<usize>,
    pub fmap_bspline: bool,
    pub fmap_demean: bool,
    pub force_syn: bool,
    pub ignore: Vec<Ignore>,
    pub medial_surface_nan: bool,
    pub run_reconall: bool,
    pub spaces: Option<SpatialReferences>,
    pub use_aroma: bool,
    /// `None` compares BBR with its initialisation, `Some` forces the choice.
    pub use_bbr: Option<bool>,
    pub use_syn_sdc: bool,
    pub compcor_failure_mode: FailureMode,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            anat_only: false,
            aroma_err_on_warn: false,
            aroma_melodic_dim: None,
            bold2t1w_dof: 6,
            cifti_output: None,
            dummy_scans: None,
            fmap_bspline: false,
            fmap_demean: true,
            force_syn: false,
            ignore: Vec::new(),
            medial_surface_nan: false,
            run_reconall: true,
            spaces: None,
            use_aroma: false,
            use_bbr: None,
            use_syn_sdc: false,
            compcor_failure_mode: FailureMode::Warn,
        }
    }
}

impl WorkflowSettings {
    #[must_use]
    pub fn ignores(&self, input: Ignore) -> bool {
        self.ignore.contains(&input)
    }

    /// Requested references, or [`DEFAULT_SPACE`] when none are given.
    /// Internal references are added by the workflow builders.
    ///
    /// # Errors
    ///
    /// Returns a [`SpaceError`] if the default space cannot be parsed.
    pub fn spatial_references(&self) -> Result<SpatialReferences, SpaceError> {
        match &self.spaces {
            Some(spaces) => Ok(spaces.clone()),
            None => SpatialReferences::parse(DEFAULT_SPACE),
        }
    }

    /// Checks settings that serde alone cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if ![6, 9, 12].contains(&self.bold2t1w_dof) {
            return Err(ConfigError::Invalid {
                setting: "workflow.bold2t1w_dof".to_string(),
                reason: format!("{} is not one of 6, 9, 12", self.bold2t1w_dof),
            });
        }
        if let Some(density) = &self.cifti_output {
            if density != "91k" && density != "170k" {
                return Err(ConfigError::Invalid {
                    setting: "workflow.cifti_output".to_string(),
                    reason: format!("unknown density '{density}'"),
                });
            }
            if !self.run_reconall {
                return Err(ConfigError::Invalid {
                    setting: "workflow.cifti_output".to_string(),
                    reason: "CIFTI outputs require FreeSurfer surfaces".to_string(),
                });
            }
        }
        if self.medial_surface_nan && !self.run_reconall {
            warn!("medial_surface_nan has no effect without FreeSurfer");
        }
        if let Some(dim) = self.aroma_melodic_dim
            && dim == 0
        {
            return Err(ConfigError::Invalid {
                setting: "workflow.aroma_melodic_dim".to_string(),
                reason: "dimensionality must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings of the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Nipype {
    pub plugin: String,
    pub nprocs: Option<usize>,
    pub omp_nthreads: Option<usize>,
    pub memory_gb: Option<f64>,
    pub stop_on_first_crash: bool,
    pub remove_unnecessary_outputs: bool,
    pub crashfile_format: String,
    pub resource_monitor: bool,
}

impl Default for Nipype {
    fn default() -> Self {
        Self {
            plugin: "MultiProc".to_string(),
            nprocs: None,
            omp_nthreads: None,
            memory_gb: None,
            stop_on_first_crash: false,
            remove_unnecessary_outputs: true,
            crashfile_format: "txt".to_string(),
            resource_monitor: false,
        }
    }
}

impl Nipype {
    /// Fills process and thread counts from `cpu_count`.
    ///
    /// Per-process threads default to one less than the process count, at
    /// most 8, and never exceed it.
    pub fn resolve(&mut self, cpu_count: usize) {
        let nprocs = self.nprocs.unwrap_or(cpu_count).max(1);
        let default_threads = nprocs.saturating_sub(1).clamp(1, 8);
        let mut omp = self.omp_nthreads.unwrap_or(default_threads).max(1);
        if omp > nprocs {
            warn!(omp, nprocs, "per-process threads exceed the process count, clamping");
            omp = nprocs;
        }
        self.nprocs = Some(nprocs);
        self.omp_nthreads = Some(omp);
    }

    #[must_use]
    pub fn threads_per_process(&self) -> usize {
        self.omp_nthreads.unwrap_or(1)
    }
}
