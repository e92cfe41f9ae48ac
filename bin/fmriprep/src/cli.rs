//! Command line arguments.
//!
//! Arguments are merged over the configuration loaded from
//! `--config-file` and the `FMRIPREP__*` environment, so a flag always
//! wins over the file.

use clap::{ArgAction, Parser, ValueEnum};
use fmriprep_config::{Config, Ignore};
use fmriprep_core::SpatialReferences;
use std::path::PathBuf;

/// Processing stages that can be requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AnalysisLevel {
    Participant,
}

/// fMRI preprocessing workflow builder.
#[derive(Debug, Clone, Parser)]
#[command(name = "fmriprep", version, about)]
pub struct Cli {
    /// Root folder of a BIDS dataset.
    pub bids_dir: PathBuf,
    /// Folder the derivatives are written to.
    pub output_dir: PathBuf,
    #[arg(value_enum)]
    pub analysis_level: AnalysisLevel,

    /// Participants to process, with or without the `sub-` prefix.
    #[arg(long, num_args = 1.., value_name = "LABEL")]
    pub participant_label: Vec<String>,
    /// Scratch folder for intermediate results and execution plans.
    #[arg(short, long)]
    pub work_dir: Option<PathBuf>,
    /// TOML configuration file.
    #[arg(long, env = "FMRIPREP_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Output spaces, e.g. `MNI152NLin2009cAsym:res-2 T1w fsaverage5`.
    #[arg(long, num_args = 1.., value_name = "SPACE")]
    pub output_spaces: Vec<String>,
    /// Inputs to ignore even when present.
    #[arg(long, num_args = 1.., value_name = "INPUT")]
    pub ignore: Vec<Ignore>,

    #[arg(long)]
    pub fs_license_file: Option<PathBuf>,
    #[arg(long)]
    pub fs_subjects_dir: Option<PathBuf>,
    /// Skip surface reconstruction.
    #[arg(long)]
    pub fs_no_reconall: bool,

    /// Add fieldmap-less distortion correction when no fieldmap is found.
    #[arg(long)]
    pub use_syn_sdc: bool,
    /// Run fieldmap-less correction next to the fieldmap-based one.
    #[arg(long)]
    pub force_syn: bool,

    #[arg(long)]
    pub use_aroma: bool,
    /// Fail on ICA-AROMA warnings.
    #[arg(long)]
    pub aroma_err_on_warn: bool,
    #[arg(long, allow_negative_numbers = true, value_name = "DIM")]
    pub aroma_melodic_dimensionality: Option<i32>,

    /// Degrees of freedom of BOLD to T1w registration.
    #[arg(long, value_parser = ["6", "9", "12"])]
    pub bold2t1w_dof: Option<String>,
    /// Always use boundary-based registration.
    #[arg(long, alias = "use-bbr", conflicts_with = "force_no_bbr")]
    pub force_bbr: bool,
    /// Never use boundary-based registration.
    #[arg(long)]
    pub force_no_bbr: bool,

    /// Non-steady-state volumes at the start of each run.
    #[arg(long, value_name = "N")]
    pub dummy_scans: Option<usize>,
    #[arg(long)]
    pub medial_surface_nan: bool,
    /// Grayordinates density of CIFTI outputs.
    #[arg(long, num_args = 0..=1, default_missing_value = "91k", value_parser = ["91k", "170k"])]
    pub cifti_output: Option<String>,

    #[arg(long)]
    pub anat_only: bool,
    /// Trade speed for a smaller memory footprint.
    #[arg(long)]
    pub low_mem: bool,
    /// Do not file crash reports.
    #[arg(long)]
    pub notrack: bool,
    #[arg(long)]
    pub stop_on_first_crash: bool,

    /// Maximum number of processes.
    #[arg(long, alias = "n-cpus")]
    pub nprocs: Option<usize>,
    /// Maximum threads per process.
    #[arg(long)]
    pub omp_nthreads: Option<usize>,
    /// Memory limit in GB.
    #[arg(long, alias = "mem")]
    pub mem_gb: Option<f64>,

    /// Increase log verbosity (`-v` debug, `-vv` trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Default log filter for the requested verbosity.
    #[must_use]
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// The command line as shown in reports.
    #[must_use]
    pub fn command_line() -> String {
        std::env::args().collect::<Vec<_>>().join(" ")
    }

    /// Overlays the arguments on `config`.
    ///
    /// # Errors
    ///
    /// Returns a message when `--output-spaces` cannot be parsed.
    pub fn apply(&self, config: &mut Config) -> Result<(), String> {
        let execution = &mut config.execution;
        execution.bids_dir.clone_from(&self.bids_dir);
        execution.output_dir.clone_from(&self.output_dir);
        if let Some(work_dir) = &self.work_dir {
            execution.work_dir.clone_from(work_dir);
        }
        if !self.participant_label.is_empty() {
            execution.participant_label.clone_from(&self.participant_label);
            execution.normalize_labels();
        }
        if self.fs_license_file.is_some() {
            execution.fs_license_file.clone_from(&self.fs_license_file);
        }
        if self.fs_subjects_dir.is_some() {
            execution.fs_subjects_dir.clone_from(&self.fs_subjects_dir);
        }
        execution.low_mem |= self.low_mem;
        execution.notrack |= self.notrack;

        let workflow = &mut config.workflow;
        if !self.output_spaces.is_empty() {
            let spaces = SpatialReferences::parse(&self.output_spaces.join(" "))
                .map_err(|e| e.to_string())?;
            workflow.spaces = Some(spaces);
        }
        if !self.ignore.is_empty() {
            workflow.ignore.clone_from(&self.ignore);
        }
        workflow.run_reconall &= !self.fs_no_reconall;
        workflow.use_syn_sdc |= self.use_syn_sdc;
        workflow.force_syn |= self.force_syn;
        workflow.use_aroma |= self.use_aroma;
        workflow.aroma_err_on_warn |= self.aroma_err_on_warn;
        if self.aroma_melodic_dimensionality.is_some() {
            workflow.aroma_melodic_dim = self.aroma_melodic_dimensionality;
        }
        if let Some(dof) = &self.bold2t1w_dof {
            workflow.bold2t1w_dof = dof.parse().map_err(|_| format!("invalid dof '{dof}'"))?;
        }
        if self.force_bbr {
            workflow.use_bbr = Some(true);
        } else if self.force_no_bbr {
            workflow.use_bbr = Some(false);
        }
        if self.dummy_scans.is_some() {
            workflow.dummy_scans = self.dummy_scans;
        }
        workflow.medial_surface_nan |= self.medial_surface_nan;
        if self.cifti_output.is_some() {
            workflow.cifti_output.clone_from(&self.cifti_output);
        }
        workflow.anat_only |= self.anat_only;

        let nipype = &mut config.nipype;
        if self.nprocs.is_some() {
            nipype.nprocs = self.nprocs;
            nipype.omp_nthreads = None;
        }
        if self.omp_nthreads.is_some() {
            nipype.omp_nthreads = self.omp_nthreads;
        }
        if self.mem_gb.is_some() {
            nipype.memory_gb = self.mem_gb;
        }
        nipype.stop_on_first_crash |= self.stop_on_first_crash;
        nipype.resolve(config.environment.cpu_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["fmriprep", "/data/bids", "/data/out", "participant"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("parse")
    }

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_configuration() {
        let cli = parse(&[
            "--participant-label",
            "sub-01",
            "02",
            "--output-spaces",
            "MNI152NLin2009cAsym:res-2",
            "T1w",
            "--ignore",
            "slicetiming",
            "--force-no-bbr",
            "--bold2t1w-dof",
            "9",
            "--cifti-output",
            "--fs-no-reconall",
            "-vv",
        ]);
        let mut config = Config::default();
        config.workflow.use_aroma = true;
        cli.apply(&mut config).expect("apply");

        assert_eq!(config.execution.participant_label, vec!["01", "02"]);
        assert_eq!(config.workflow.ignore, vec![Ignore::Slicetiming]);
        assert_eq!(config.workflow.use_bbr, Some(false));
        assert_eq!(config.workflow.bold2t1w_dof, 9);
        assert_eq!(config.workflow.cifti_output.as_deref(), Some("91k"));
        assert!(!config.workflow.run_reconall);
        assert!(config.workflow.use_aroma);
        let spaces = config.workflow.spaces.expect("spaces");
        assert_eq!(spaces.to_string(), "MNI152NLin2009cAsym:res-2 T1w");
        assert_eq!(cli.log_filter(), "trace");
    }

    #[test]
    fn rejects_bad_values() {
        let base = ["fmriprep", "/data/bids", "/data/out", "participant"];
        let with = |extra: &[&str]| {
            let mut argv = base.to_vec();
            argv.extend_from_slice(extra);
            Cli::try_parse_from(argv)
        };
        assert!(with(&["--bold2t1w-dof", "7"]).is_err());
        assert!(with(&["--ignore", "everything"]).is_err());
        assert!(with(&["--force-bbr", "--force-no-bbr"]).is_err());
        assert!(Cli::try_parse_from(["fmriprep", "/a", "/b", "group"]).is_err());

        let cli = parse(&["--output-spaces", "NotATemplate"]);
        assert!(cli.apply(&mut Config::default()).is_err());
    }

    #[test]
    fn process_count_resets_thread_default() {
        let cli = parse(&["--nprocs", "4"]);
        let mut config = Config::default();
        config.nipype.resolve(32);
        cli.apply(&mut config).expect("apply");
        assert_eq!(config.nipype.nprocs, Some(4));
        assert_eq!(config.nipype.omp_nthreads, Some(3));
    }
}
