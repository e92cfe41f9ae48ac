//! Error types for the command line front end.
//!
//! Library errors arrive as their own enums or reports and are folded into
//! [`CliError`], which also decides the process exit status.

use fmriprep_core::BidsError;
use fmriprep_pipelines::BuildError;
use fmriprep_workflow::{ExecutorError, GraphError, MissingDependencies};
use std::fmt;
use std::path::PathBuf;

/// Exit status when required executables are missing.
pub const EXIT_MISSING_DEPENDENCIES: u8 = 127;

/// Errors that end an invocation before or while handing work off.
#[derive(Debug, Clone, PartialEq)]
pub enum CliError {
    /// Configuration could not be loaded, merged or validated.
    Config { reason: String },
    /// FreeSurfer is enabled but no license file was found.
    License { searched: Vec<PathBuf> },
    /// The dataset could not be opened.
    Layout(BidsError),
    /// A subject workflow could not be built.
    Build(BuildError),
    /// A built workflow failed validation.
    Graph(GraphError),
    /// Executables required by the workflows are not on `PATH`.
    Dependencies(MissingDependencies),
    /// The executor rejected a plan.
    Executor(ExecutorError),
    /// A provenance file could not be written.
    Io { path: PathBuf, reason: String },
}

impl CliError {
    /// Process exit status for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Dependencies(_) => EXIT_MISSING_DEPENDENCIES,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "configuration error: {reason}"),
            Self::License { searched } => {
                write!(f, "a valid FreeSurfer license file is required; looked in:")?;
                for path in searched {
                    write!(f, "\n  {}", path.display())?;
                }
                Ok(())
            }
            Self::Layout(err) => write!(f, "cannot open the BIDS dataset: {err}"),
            Self::Build(err) => write!(f, "cannot build workflow: {err}"),
            Self::Graph(err) => write!(f, "invalid workflow: {err}"),
            Self::Dependencies(err) => write!(f, "{err}"),
            Self::Executor(err) => write!(f, "execution failed: {err}"),
            Self::Io { path, reason } => write!(f, "cannot write {}: {reason}", path.display()),
        }
    }
}

impl std::error::Error for CliError {}

impl From<BidsError> for CliError {
    fn from(err: BidsError) -> Self {
        Self::Layout(err)
    }
}

impl From<BuildError> for CliError {
    fn from(err: BuildError) -> Self {
        Self::Build(err)
    }
}

impl From<GraphError> for CliError {
    fn from(err: GraphError) -> Self {
        Self::Graph(err)
    }
}

impl From<MissingDependencies> for CliError {
    fn from(err: MissingDependencies) -> Self {
        Self::Dependencies(err)
    }
}

impl From<ExecutorError> for CliError {
    fn from(err: ExecutorError) -> Self {
        Self::Executor(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dependencies_exit_127() {
        let err = CliError::from(MissingDependencies {
            missing: vec![("MCFLIRT".to_string(), "mcflirt".to_string())],
        });
        assert_eq!(err.exit_code(), 127);
        assert!(err.to_string().contains("mcflirt"));

        let err = CliError::Config {
            reason: "bad".to_string(),
        };
        assert_eq!(err.exit_code(), 1);
    }
}
