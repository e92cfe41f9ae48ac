//! One invocation, from configuration to executor hand-off.
//!
//! Every subject is built before anything is handed off, so configuration
//! problems stop the invocation early. Execution is isolated per subject:
//! a failing subject is recorded and the others carry on.

use crate::cli::Cli;
use crate::error::CliError;
use crate::layout::DirectoryLayout;
use chrono::Utc;
use fmriprep_config::{Config, write_dataset_description};
use fmriprep_core::bids::DERIVATIVES_FOLDER;
use fmriprep_core::{CrashId, RunId};
use fmriprep_pipelines::{SubjectSettings, init_single_subject_wf, select_subjects};
use fmriprep_workflow::{
    ExecutionPlan, Executor, FlatGraph, PlanWriter, WorkflowRun, check_dependencies, failure_count,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Facts about the invocation bound before any fallible step, so failures
/// can always be attributed and crash reports placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub participant_label: Vec<String>,
    pub output_dir: PathBuf,
    pub run_uuid: String,
    pub notrack: bool,
}

impl RunContext {
    #[must_use]
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            participant_label: cli
                .participant_label
                .iter()
                .map(|label| label.trim_start_matches("sub-").to_string())
                .collect(),
            output_dir: cli.output_dir.clone(),
            run_uuid: fmriprep_config::new_run_uuid(),
            notrack: cli.notrack,
        }
    }

    /// `output_dir/fmriprep/sub-<label>/log/<run_uuid>`.
    #[must_use]
    pub fn log_dir(&self, subject: &str) -> PathBuf {
        self.output_dir
            .join(DERIVATIVES_FOLDER)
            .join(format!("sub-{subject}"))
            .join("log")
            .join(&self.run_uuid)
    }

    /// Files a crash report for a failed subject unless tracking is off.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Io`] when the report cannot be written.
    pub fn file_crash(
        &self,
        subject: &str,
        workflow: &str,
        reason: &str,
    ) -> Result<Option<(CrashId, PathBuf)>, CliError> {
        if self.notrack {
            return Ok(None);
        }
        let crash_id = CrashId::new();
        let now = Utc::now();
        let dir = self.log_dir(subject);
        let path = dir.join(format!("crash-{}-{crash_id}.txt", now.format("%Y%m%d-%H%M%S")));
        let io = |path: &Path, e: std::io::Error| CliError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        std::fs::create_dir_all(&dir).map_err(|e| io(&dir, e))?;
        let report = format!(
            "Crash: {crash_id}\nRun: {}\nSubject: sub-{subject}\nWorkflow: {workflow}\nTime: {}\n\n{reason}\n",
            self.run_uuid,
            now.to_rfc3339(),
        );
        std::fs::write(&path, report).map_err(|e| io(&path, e))?;
        Ok(Some((crash_id, path)))
    }
}

/// Locates the FreeSurfer license: the configured file, then `FS_LICENSE`,
/// then `$FREESURFER_HOME/license.txt`.
///
/// # Errors
///
/// Returns [`CliError::License`] listing the places searched.
pub fn find_license(config: &Config) -> Result<PathBuf, CliError> {
    let candidates: Vec<PathBuf> = [
        config.execution.fs_license_file.clone(),
        config.environment.fs_license.clone(),
        config
            .environment
            .freesurfer_home
            .as_ref()
            .map(|home| home.join("license.txt")),
    ]
    .into_iter()
    .flatten()
    .collect();

    candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .ok_or(CliError::License {
            searched: candidates,
        })
}

/// Loads, merges and validates the configuration of an invocation.
///
/// # Errors
///
/// Returns [`CliError::Config`] or [`CliError::License`].
pub fn configure(cli: &Cli, context: &RunContext) -> Result<Config, CliError> {
    let config_error = |reason: String| CliError::Config { reason };
    let mut config =
        Config::load(cli.config_file.as_deref()).map_err(|e| config_error(e.to_string()))?;
    cli.apply(&mut config).map_err(config_error)?;
    config.execution.run_uuid.clone_from(&context.run_uuid);
    config.validate().map_err(|e| config_error(e.to_string()))?;
    if config.workflow.run_reconall {
        config.execution.fs_license_file = Some(find_license(&config)?);
    }
    Ok(config)
}

/// Subject workflows, built and flattened.
///
/// # Errors
///
/// Returns the first build or validation error.
pub fn build(config: &Config, command: &str) -> Result<Vec<(String, FlatGraph)>, CliError> {
    let layout = DirectoryLayout::open(&config.execution.bids_dir)?;
    let settings = SubjectSettings::from_config(config, command)?;
    let subjects = select_subjects(&layout, &config.execution.participant_label)?;
    info!(subjects = ?subjects, spaces = %settings.bold.spaces, "building workflows");

    let mut graphs = Vec::with_capacity(subjects.len());
    for subject in subjects {
        let graph = init_single_subject_wf(&layout, &subject, &settings)?.flatten()?;
        info!(subject, nodes = graph.paths().len(), "workflow ready");
        graphs.push((subject, graph));
    }
    Ok(graphs)
}

/// The run id plans are filed under: the ULID `run_uuid` ends in, or a
/// fresh one when it ends in something else.
pub fn plan_run_id(run_uuid: &str) -> RunId {
    let tail = run_uuid.rsplit('_').next().unwrap_or(run_uuid);
    tail.parse().unwrap_or_else(|err| {
        warn!(run_uuid, error = %err, "run_uuid does not end in a ULID, plans get a fresh run id");
        RunId::new()
    })
}

/// Hands each subject's graph to `executor`, isolating failures.
pub async fn execute(
    executor: &dyn Executor,
    graphs: &[(String, FlatGraph)],
    run_id: RunId,
    context: &RunContext,
    stop_on_first_crash: bool,
) -> Vec<WorkflowRun> {
    let mut runs = Vec::with_capacity(graphs.len());
    for (subject, graph) in graphs {
        let mut run = WorkflowRun::new(run_id, subject.as_str(), graph.name());
        run.start();

        let outcome = match ExecutionPlan::from_graph(graph, run_id) {
            Ok(plan) => executor.run(&plan).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(path) => {
                info!(subject, plan = %path.display(), "subject handed off");
                run.complete();
            }
            Err(err) => {
                error!(subject, workflow = graph.name(), error = %err, "subject failed");
                let crash = match context.file_crash(subject, graph.name(), &err.to_string()) {
                    Ok(crash) => crash,
                    Err(report_err) => {
                        warn!(subject, error = %report_err, "cannot file crash report");
                        None
                    }
                };
                if let Some((_, path)) = &crash {
                    info!(subject, crash = %path.display(), "crash report written");
                }
                run.fail(err.to_string(), crash.map(|(id, _)| id));
            }
        }
        let failed = run.error.is_some();
        runs.push(run);
        if failed && stop_on_first_crash {
            warn!(subject, "stopping on first crash");
            break;
        }
    }
    runs
}

/// Runs an invocation, resolving executables through `search_path`.
///
/// Returns the number of failed subjects.
///
/// # Errors
///
/// Returns configuration, build and dependency errors, which stop the
/// invocation before any subject is handed off.
pub async fn run_with(cli: &Cli, context: &RunContext, search_path: &OsStr) -> Result<usize, CliError> {
    let config = configure(cli, context)?;
    let execution = &config.execution;
    info!(
        run_uuid = %execution.run_uuid,
        bids_dir = %execution.bids_dir.display(),
        output_dir = %execution.output_dir.display(),
        nprocs = ?config.nipype.nprocs,
        omp_nthreads = ?config.nipype.omp_nthreads,
        "starting fmriprep"
    );

    write_dataset_description(&execution.output_dir, &config.environment)
        .map_err(|e| CliError::Config { reason: e.to_string() })?;
    let config_file = execution
        .work_dir
        .join(format!("config-{}.toml", execution.run_uuid));
    config
        .save(&config_file)
        .map_err(|e| CliError::Config { reason: e.to_string() })?;

    let graphs = build(&config, &Cli::command_line())?;
    for (_, graph) in &graphs {
        check_dependencies(graph, search_path)?;
    }

    let run_id = plan_run_id(&execution.run_uuid);
    let executor = PlanWriter::new(&execution.work_dir)
        .with_limits(config.nipype.nprocs, config.nipype.memory_gb);
    let runs = execute(&executor, &graphs, run_id, context, config.nipype.stop_on_first_crash).await;

    let record = execution.work_dir.join(run_id.to_string()).join("runs.json");
    match serde_json::to_vec_pretty(&runs) {
        Ok(json) => {
            if let Err(err) = std::fs::write(&record, json) {
                warn!(path = %record.display(), error = %err, "cannot record runs");
            }
        }
        Err(err) => warn!(error = %err, "cannot serialize runs"),
    }

    let failures = failure_count(&runs);
    info!(subjects = runs.len(), failures, "fmriprep finished");
    Ok(failures)
}

/// Runs an invocation against the process `PATH`.
///
/// # Errors
///
/// See [`run_with`].
pub async fn run(cli: &Cli, context: &RunContext) -> Result<usize, CliError> {
    let search_path = std::env::var_os("PATH").unwrap_or_default();
    run_with(cli, context, &search_path).await
}
