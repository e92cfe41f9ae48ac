//! The capability set every node operation provides.
//!
//! Builders only rely on the declared ports, cost estimates, and the
//! command an operation needs on `PATH`. Operations computed in-process
//! also implement [`Interface::run`]; wrappers around external tools leave
//! the default, which reports that the executor must run them.

use crate::port::{InputPort, OutputPort, PortKind};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Smallest memory estimate any node is annotated with, in gigabytes.
pub const MEMORY_FLOOR_GB: f64 = 0.01;

/// Values keyed by port name.
pub type PortValues = BTreeMap<String, JsonValue>;

/// Errors raised when running an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RunError {
    /// The operation wraps an external tool and can only run in the executor.
    External { interface: String },
    /// A required input was not provided.
    MissingInput { port: String },
    /// An input had the wrong shape or could not be read.
    InvalidInput { port: String, reason: String },
    /// A numerical routine failed to converge or hit a singular matrix.
    Unstable { reason: String },
    /// Any other failure.
    Failed { reason: String },
}

impl RunError {
    /// Whether a retry may succeed where this attempt failed.
    #[must_use]
    pub fn is_unstable(&self) -> bool {
        matches!(self, Self::Unstable { .. })
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External { interface } => {
                write!(f, "{interface} runs an external tool and cannot run in-process")
            }
            Self::MissingInput { port } => write!(f, "missing input '{port}'"),
            Self::InvalidInput { port, reason } => {
                write!(f, "invalid input '{port}': {reason}")
            }
            Self::Unstable { reason } => write!(f, "numerical instability: {reason}"),
            Self::Failed { reason } => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for RunError {}

/// A node operation.
pub trait Interface: fmt::Debug + Send + Sync {
    /// Operation name, as shown in error messages and execution plans.
    fn name(&self) -> &str;

    fn inputs(&self) -> Vec<InputPort>;

    fn outputs(&self) -> Vec<OutputPort>;

    /// Executable that must be found on `PATH`, if any.
    fn command(&self) -> Option<&str> {
        None
    }

    /// Fixed parameters recorded in the execution plan.
    fn parameters(&self) -> JsonValue {
        JsonValue::Object(serde_json::Map::new())
    }

    /// Memory estimate used when the builder does not set one.
    fn default_mem_gb(&self) -> f64 {
        MEMORY_FLOOR_GB
    }

    /// File name a data sink writes, given the node's static inputs.
    ///
    /// Only sinks return a value; two sinks in one graph must not write the
    /// same file.
    fn sink_target(&self, _inputs: &PortValues) -> Option<String> {
        None
    }

    /// Runs the operation in-process.
    ///
    /// # Errors
    ///
    /// The default reports [`RunError::External`].
    fn run(&self, _inputs: &PortValues) -> Result<PortValues, RunError> {
        Err(RunError::External {
            interface: self.name().to_string(),
        })
    }

    /// Outputs accepted in place of a result when every retry failed.
    ///
    /// The default leaves each output port `null`. Operations whose
    /// consumers expect files override it to write `NaN`-filled ones.
    ///
    /// # Errors
    ///
    /// Returns a [`RunError`] when the sentinel files cannot be written.
    fn sentinel_outputs(&self, _inputs: &PortValues) -> Result<PortValues, RunError> {
        Ok(self
            .outputs()
            .into_iter()
            .map(|port| (port.name, JsonValue::Null))
            .collect())
    }
}

/// Returns the input value for `port` or a [`RunError::MissingInput`].
///
/// # Errors
///
/// Returns [`RunError::MissingInput`] when the port has no value.
pub fn require<'a>(inputs: &'a PortValues, port: &str) -> Result<&'a JsonValue, RunError> {
    inputs.get(port).ok_or_else(|| RunError::MissingInput {
        port: port.to_string(),
    })
}

/// Passes values through unchanged.
///
/// Used for the `inputnode` and `outputnode` of every workflow; its fields
/// are both inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityInterface {
    fields: Vec<String>,
}

impl IdentityInterface {
    #[must_use]
    pub fn new<S: AsRef<str>>(fields: &[S]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl Interface for IdentityInterface {
    fn name(&self) -> &str {
        "IdentityInterface"
    }

    fn inputs(&self) -> Vec<InputPort> {
        self.fields
            .iter()
            .map(|f| InputPort::optional(f.as_str(), PortKind::Any))
            .collect()
    }

    fn outputs(&self) -> Vec<OutputPort> {
        self.fields
            .iter()
            .map(|f| OutputPort::new(f.as_str(), PortKind::Any))
            .collect()
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        Ok(self
            .fields
            .iter()
            .filter_map(|f| inputs.get(f).map(|v| (f.clone(), v.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Tool;

    impl Interface for Tool {
        fn name(&self) -> &str {
            "Tool"
        }

        fn inputs(&self) -> Vec<InputPort> {
            vec![InputPort::required("in_file", PortKind::File)]
        }

        fn outputs(&self) -> Vec<OutputPort> {
            vec![OutputPort::new("out_file", PortKind::File)]
        }

        fn command(&self) -> Option<&str> {
            Some("tool")
        }
    }

    #[test]
    fn external_tools_do_not_run_in_process() {
        let err = Tool.run(&PortValues::new()).unwrap_err();
        assert_eq!(
            err,
            RunError::External {
                interface: "Tool".to_string()
            }
        );
        assert!(!err.is_unstable());
    }

    #[test]
    fn defaults_use_memory_floor() {
        assert!((Tool.default_mem_gb() - MEMORY_FLOOR_GB).abs() < f64::EPSILON);
        assert!(Tool.sink_target(&PortValues::new()).is_none());
    }

    #[test]
    fn identity_passes_fields_through() {
        let identity = IdentityInterface::new(&["bold_file", "bold_mask"]);
        let mut inputs = PortValues::new();
        inputs.insert("bold_file".into(), json!("bold.nii.gz"));
        inputs.insert("ignored".into(), json!(1));

        let outputs = identity.run(&inputs).expect("run");
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["bold_file"], json!("bold.nii.gz"));
        assert!(identity.inputs().iter().all(|p| !p.required));
    }

    #[test]
    fn require_reports_missing_port() {
        let err = require(&PortValues::new(), "in_file").unwrap_err();
        assert!(err.to_string().contains("in_file"));
    }
}
