//! Edge types for workflow graphs.
//!
//! Edges connect ports between nodes. Each edge specifies:
//! - The source port (output from one node)
//! - The target port (input on another node)
//! - An optional adapter applied to the value in transit

use crate::port::PortKind;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// A transformation applied to a value as it travels along an edge.
///
/// Adapters form a closed set so that graphs stay serializable and the
/// executor can reproduce them without running builder code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "adapter", rename_all = "snake_case")]
pub enum Adapter {
    /// Unwraps a single-element list.
    Pop,
    /// Takes the first element of a list.
    First,
    /// Takes the last element of a list.
    Last,
    /// Takes the element at an index.
    Select { index: usize },
    /// Wraps a value in a one-element list.
    ListOf,
    /// Maps the registration `fallback` flag to a report description.
    RegistrationSuffix { freesurfer: bool },
    /// Number of elements in a list.
    SeriesLength,
    /// A named helper resolved by the executor.
    Named { function: String },
}

impl Adapter {
    /// Returns the kind produced when a value of `kind` passes through this
    /// adapter, or `None` if the adapter cannot accept it.
    #[must_use]
    pub fn output_kind(&self, kind: PortKind) -> Option<PortKind> {
        match (self, kind) {
            (Self::Named { .. }, _) => Some(PortKind::Any),
            (Self::Pop | Self::First | Self::Last | Self::Select { .. }, PortKind::Any) => {
                Some(PortKind::Any)
            }
            (Self::Pop | Self::First | Self::Last | Self::Select { .. }, PortKind::FileList) => {
                Some(PortKind::File)
            }
            (Self::ListOf, PortKind::File | PortKind::Any) => Some(PortKind::FileList),
            (Self::RegistrationSuffix { .. }, PortKind::Boolean | PortKind::Any) => {
                Some(PortKind::Text)
            }
            (Self::SeriesLength, PortKind::FileList | PortKind::Any) => Some(PortKind::Integer),
            _ => None,
        }
    }

    /// Applies the adapter to a concrete value.
    ///
    /// Returns `None` when the value has the wrong shape or the adapter is a
    /// named helper that only the executor can resolve.
    #[must_use]
    pub fn apply(&self, value: &JsonValue) -> Option<JsonValue> {
        match self {
            Self::Pop => match value {
                JsonValue::Array(items) => items.first().cloned(),
                other => Some(other.clone()),
            },
            Self::First => value.as_array()?.first().cloned(),
            Self::Last => value.as_array()?.last().cloned(),
            Self::Select { index } => value.as_array()?.get(*index).cloned(),
            Self::ListOf => Some(JsonValue::Array(vec![value.clone()])),
            Self::RegistrationSuffix { freesurfer } => {
                let fallback = value.as_bool()?;
                Some(JsonValue::from(registration_suffix(*freesurfer, fallback)))
            }
            Self::SeriesLength => Some(JsonValue::from(value.as_array()?.len())),
            Self::Named { .. } => None,
        }
    }
}

/// Report description for the co-registration reportlet.
#[must_use]
pub fn registration_suffix(freesurfer: bool, fallback: bool) -> &'static str {
    match (freesurfer, fallback) {
        (true, false) => "bbregister",
        (true, true) => "coreg",
        (false, false) => "flirtbbr",
        (false, true) => "flirtnobbr",
    }
}

impl fmt::Display for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pop => write!(f, "pop"),
            Self::First => write!(f, "first"),
            Self::Last => write!(f, "last"),
            Self::Select { index } => write!(f, "select[{index}]"),
            Self::ListOf => write!(f, "list_of"),
            Self::RegistrationSuffix { .. } => write!(f, "registration_suffix"),
            Self::SeriesLength => write!(f, "series_length"),
            Self::Named { function } => write!(f, "{function}"),
        }
    }
}

/// An edge connecting two ports in a workflow graph.
///
/// Edges carry data from a source node's output port to a target node's input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// The name of the output port on the source node.
    pub source_port: String,
    /// The name of the input port on the target node.
    pub target_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<Adapter>,
}

impl Edge {
    /// Creates a new edge between ports.
    #[must_use]
    pub fn new(source_port: impl Into<String>, target_port: impl Into<String>) -> Self {
        Self {
            source_port: source_port.into(),
            target_port: target_port.into(),
            adapter: None,
        }
    }

    /// Attaches an adapter to the edge.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Adapter) -> Self {
        self.adapter = Some(adapter);
        self
    }
}

/// A complete edge reference including source and target node names.
///
/// This is used for error reporting and for comparing graphs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeRef {
    pub source_node: String,
    pub source_port: String,
    pub target_node: String,
    pub target_port: String,
}

impl EdgeRef {
    /// Creates a new edge reference.
    #[must_use]
    pub fn new(
        source_node: impl Into<String>,
        source_port: impl Into<String>,
        target_node: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            source_node: source_node.into(),
            source_port: source_port.into(),
            target_node: target_node.into(),
            target_port: target_port.into(),
        }
    }
}

impl fmt::Display for EdgeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source_node, self.source_port, self.target_node, self.target_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn edge_custom_ports() {
        let edge = Edge::new("out_file", "in_file");
        assert_eq!(edge.source_port, "out_file");
        assert_eq!(edge.target_port, "in_file");
        assert!(edge.adapter.is_none());
    }

    #[test]
    fn edge_ref_display() {
        let edge_ref = EdgeRef::new("mcflirt", "mat_file", "fsl2itk", "in_files");
        assert_eq!(edge_ref.to_string(), "mcflirt.mat_file -> fsl2itk.in_files");
    }

    #[test]
    fn edge_serde_roundtrip() {
        let edge = Edge::new("fallback", "desc")
            .with_adapter(Adapter::RegistrationSuffix { freesurfer: true });
        let json = serde_json::to_string(&edge).expect("serialize");
        let parsed: Edge = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(edge, parsed);
    }

    #[test]
    fn list_adapters_unwrap_file_lists() {
        assert_eq!(Adapter::Pop.output_kind(PortKind::FileList), Some(PortKind::File));
        assert_eq!(
            Adapter::Select { index: 2 }.output_kind(PortKind::FileList),
            Some(PortKind::File)
        );
        assert_eq!(Adapter::First.output_kind(PortKind::Boolean), None);
        assert_eq!(Adapter::ListOf.output_kind(PortKind::File), Some(PortKind::FileList));
    }

    #[test]
    fn adapters_apply_to_values() {
        let files = json!(["a.nii.gz", "b.nii.gz", "c.nii.gz"]);
        assert_eq!(Adapter::First.apply(&files), Some(json!("a.nii.gz")));
        assert_eq!(Adapter::Last.apply(&files), Some(json!("c.nii.gz")));
        assert_eq!(Adapter::Select { index: 1 }.apply(&files), Some(json!("b.nii.gz")));
        assert_eq!(Adapter::Select { index: 5 }.apply(&files), None);
        assert_eq!(Adapter::Pop.apply(&json!("a.nii.gz")), Some(json!("a.nii.gz")));
        assert_eq!(Adapter::ListOf.apply(&json!("a")), Some(json!(["a"])));
        assert_eq!(Adapter::SeriesLength.apply(&files), Some(json!(3)));
        assert_eq!(
            Adapter::SeriesLength.output_kind(PortKind::FileList),
            Some(PortKind::Integer)
        );
    }

    #[test]
    fn registration_suffix_follows_fallback() {
        let fs = Adapter::RegistrationSuffix { freesurfer: true };
        let fsl = Adapter::RegistrationSuffix { freesurfer: false };
        assert_eq!(fs.apply(&json!(false)), Some(json!("bbregister")));
        assert_eq!(fs.apply(&json!(true)), Some(json!("coreg")));
        assert_eq!(fsl.apply(&json!(false)), Some(json!("flirtbbr")));
        assert_eq!(fsl.apply(&json!(true)), Some(json!("flirtnobbr")));
    }
}
