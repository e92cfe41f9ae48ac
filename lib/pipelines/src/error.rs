//! Errors raised while assembling workflows.
//!
//! Configuration problems are reported before any graph is built; wiring
//! problems surface as [`GraphError`] and point at a builder bug.

use fmriprep_core::{BidsError, SpaceError};
use fmriprep_workflow::GraphError;
use std::fmt;

/// Errors from the workflow builders.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    /// The subject has no T1w image.
    NoAnatomical { subject: String },
    /// The subject has no BOLD run and anatomical-only mode is off.
    NoBold { subject: String },
    /// No participant matched the requested labels.
    NoSubjects { requested: Vec<String> },
    /// The layout could not be queried.
    Layout(BidsError),
    /// The requested spaces are unusable.
    Spaces(SpaceError),
    /// A builder produced an invalid graph.
    Graph(GraphError),
}

impl BuildError {
    /// Whether the error stems from the inputs rather than from a builder.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::Graph(_))
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAnatomical { subject } => {
                write!(f, "no T1w images found for participant sub-{subject}")
            }
            Self::NoBold { subject } => write!(
                f,
                "no BOLD images found for participant sub-{subject} (use anatomical-only mode to process anatomy alone)"
            ),
            Self::NoSubjects { requested } if requested.is_empty() => {
                write!(f, "the dataset contains no participants")
            }
            Self::NoSubjects { requested } => {
                write!(f, "participants not found: {}", requested.join(", "))
            }
            Self::Layout(err) => write!(f, "cannot query the BIDS layout: {err}"),
            Self::Spaces(err) => write!(f, "invalid output spaces: {err}"),
            Self::Graph(err) => write!(f, "invalid workflow: {err}"),
        }
    }
}

impl std::error::Error for BuildError {}

impl From<GraphError> for BuildError {
    fn from(err: GraphError) -> Self {
        Self::Graph(err)
    }
}

impl From<BidsError> for BuildError {
    fn from(err: BidsError) -> Self {
        Self::Layout(err)
    }
}

impl From<SpaceError> for BuildError {
    fn from(err: SpaceError) -> Self {
        Self::Spaces(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_distinguished() {
        let missing = BuildError::NoBold {
            subject: "01".to_string(),
        };
        assert!(missing.is_configuration());
        assert!(missing.to_string().contains("sub-01"));

        let wiring = BuildError::from(GraphError::NodeNotFound {
            workflow: "wf".to_string(),
            node: "mcflirt".to_string(),
        });
        assert!(!wiring.is_configuration());
    }
}
