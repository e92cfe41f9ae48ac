//! Run records for subject workflows.
//!
//! Each participant's workflow is handed to the executor independently. A
//! [`WorkflowRun`] tracks that hand-off so a failing subject can be marked
//! failed while the remaining subjects carry on, and so the overall exit
//! code can count failures.

use chrono::{DateTime, Utc};
use fmriprep_core::{CrashId, RunId};
use serde::{Deserialize, Serialize};

/// The overall state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Built, waiting for the executor.
    Queued,
    Running,
    Completed,
    Failed,
}

impl ExecutionState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A record of one subject workflow handed to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Invocation this run belongs to.
    pub run_id: RunId,
    /// Participant label.
    pub subject: String,
    /// Name of the workflow handed to the executor.
    pub workflow: String,
    pub state: ExecutionState,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Crash report filed for the failure, if any.
    pub crash_id: Option<CrashId>,
}

impl WorkflowRun {
    /// Creates a new workflow run in queued state.
    #[must_use]
    pub fn new(run_id: RunId, subject: impl Into<String>, workflow: impl Into<String>) -> Self {
        Self {
            run_id,
            subject: subject.into(),
            workflow: workflow.into(),
            state: ExecutionState::Queued,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            crash_id: None,
        }
    }

    /// Starts the run.
    pub fn start(&mut self) {
        self.state = ExecutionState::Running;
        self.started_at = Some(Utc::now());
    }

    /// Marks the run as completed.
    pub fn complete(&mut self) {
        self.state = ExecutionState::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the run as failed.
    pub fn fail(&mut self, error: String, crash_id: Option<CrashId>) {
        self.state = ExecutionState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
        self.crash_id = crash_id;
    }

    /// Returns the duration of the run, if it has started.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some(end - start)
    }
}

/// Number of failed runs, used as the process exit status.
#[must_use]
pub fn failure_count(runs: &[WorkflowRun]) -> usize {
    runs.iter()
        .filter(|run| run.state == ExecutionState::Failed)
        .count()
}
