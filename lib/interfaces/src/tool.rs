//! Descriptors for operations the executor runs.
//!
//! A [`ToolSpec`] describes an operation without implementing it: its
//! ports, fixed parameters, a memory estimate and, for command line
//! programs, the executable that must be on `PATH`. Image operations
//! without a command are provided by the executor's image runtime.

use fmriprep_workflow::{InputPort, Interface, MEMORY_FLOOR_GB, OutputPort, PortKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// The software package a tool ships with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Package {
    Fsl,
    Afni,
    Ants,
    FreeSurfer,
    /// Convert3D.
    C3d,
    IcaAroma,
    Workbench,
    /// Image operations provided by the executor itself.
    Builtin,
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fsl => "FSL",
            Self::Afni => "AFNI",
            Self::Ants => "ANTs",
            Self::FreeSurfer => "FreeSurfer",
            Self::C3d => "C3D",
            Self::IcaAroma => "ICA-AROMA",
            Self::Workbench => "Connectome Workbench",
            Self::Builtin => "builtin",
        };
        f.write_str(name)
    }
}

/// An operation run by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    name: String,
    command: Option<String>,
    package: Package,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    parameters: Map<String, JsonValue>,
    mem_gb: f64,
}

impl ToolSpec {
    /// A command line program from `package`.
    #[must_use]
    pub fn external(name: impl Into<String>, command: impl Into<String>, package: Package) -> Self {
        Self::with_command(name.into(), Some(command.into()), package)
    }

    /// An image operation provided by the executor.
    #[must_use]
    pub fn builtin(name: impl Into<String>) -> Self {
        Self::with_command(name.into(), None, Package::Builtin)
    }

    fn with_command(name: String, command: Option<String>, package: Package) -> Self {
        Self {
            name,
            command,
            package,
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Map::new(),
            mem_gb: MEMORY_FLOOR_GB,
        }
    }

    /// Adds a required input port.
    #[must_use]
    pub fn input(mut self, name: &str, kind: PortKind) -> Self {
        self.inputs.push(InputPort::required(name, kind));
        self
    }

    /// Adds an optional input port.
    #[must_use]
    pub fn optional(mut self, name: &str, kind: PortKind) -> Self {
        self.inputs.push(InputPort::optional(name, kind));
        self
    }

    #[must_use]
    pub fn output(mut self, name: &str, kind: PortKind) -> Self {
        self.outputs.push(OutputPort::new(name, kind));
        self
    }

    /// Records a fixed command line parameter.
    #[must_use]
    pub fn param(mut self, name: &str, value: impl Into<JsonValue>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn mem_gb(mut self, mem_gb: f64) -> Self {
        self.mem_gb = mem_gb.max(MEMORY_FLOOR_GB);
        self
    }

    #[must_use]
    pub fn package(&self) -> Package {
        self.package
    }

    /// Value of a fixed parameter.
    #[must_use]
    pub fn get_param(&self, name: &str) -> Option<&JsonValue> {
        self.parameters.get(name)
    }
}

impl Interface for ToolSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<InputPort> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<OutputPort> {
        self.outputs.clone()
    }

    fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    fn parameters(&self) -> JsonValue {
        let mut parameters = self.parameters.clone();
        parameters.insert("package".to_string(), JsonValue::from(self.package.to_string()));
        JsonValue::Object(parameters)
    }

    fn default_mem_gb(&self) -> f64 {
        self.mem_gb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmriprep_workflow::{PortValues, RunError};

    fn tool() -> ToolSpec {
        ToolSpec::external("MCFLIRT", "mcflirt", Package::Fsl)
            .input("in_file", PortKind::File)
            .optional("ref_file", PortKind::File)
            .output("out_file", PortKind::File)
            .param("save_mats", true)
            .mem_gb(2.5)
    }

    #[test]
    fn builder_declares_ports() {
        let tool = tool();
        let inputs = tool.inputs();
        assert_eq!(inputs.len(), 2);
        assert!(inputs[0].required);
        assert!(!inputs[1].required);
        assert_eq!(tool.outputs()[0].name, "out_file");
        assert_eq!(tool.command(), Some("mcflirt"));
        assert!((tool.default_mem_gb() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn parameters_include_package() {
        let params = tool().parameters();
        assert_eq!(params["save_mats"], true);
        assert_eq!(params["package"], "FSL");
    }

    #[test]
    fn memory_is_floored() {
        let tool = tool().mem_gb(0.0);
        assert!((tool.default_mem_gb() - MEMORY_FLOOR_GB).abs() < f64::EPSILON);
    }

    #[test]
    fn tools_run_in_executor() {
        let err = tool().run(&PortValues::new()).unwrap_err();
        assert!(matches!(err, RunError::External { .. }));
        let builtin = ToolSpec::builtin("ValidateImage").input("in_file", PortKind::File);
        assert!(builtin.command().is_none());
        assert!(builtin.run(&PortValues::new()).is_err());
        assert_eq!(builtin.parameters()["package"], "builtin");
    }
}
