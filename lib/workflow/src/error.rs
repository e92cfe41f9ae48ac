//! Error types for graph construction.
//!
//! Every wiring failure is a programmer error in a builder; the variants
//! carry the offending edge or node so the message points at the line of
//! builder code to fix.

use crate::edge::EdgeRef;
use crate::port::PortKind;
use std::fmt;

/// Errors from graph operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Node with the given name was not found in the workflow.
    NodeNotFound { workflow: String, node: String },
    /// A node or nested workflow with this name already exists.
    DuplicateNode { workflow: String, node: String },
    /// Source port not found on node.
    SourcePortNotFound { edge: EdgeRef },
    /// Target port not found on node.
    TargetPortNotFound { edge: EdgeRef },
    /// Port kinds are incompatible.
    IncompatiblePorts {
        edge: EdgeRef,
        source_kind: PortKind,
        target_kind: PortKind,
    },
    /// The consumer port is already bound.
    DuplicateConnection { edge: EdgeRef },
    /// The edge would close a cycle.
    CycleDetected { edge: EdgeRef },
    /// A required input port has no incoming edge or static value.
    RequiredInputMissing { node: String, port: String },
    /// A field of a workflow's `outputnode` is not fed.
    OutputNotConnected { workflow: String, port: String },
    /// Two data sinks write the same file.
    SinkCollision {
        target: String,
        first: String,
        second: String,
    },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { workflow, node } => {
                write!(f, "node '{node}' not found in workflow '{workflow}'")
            }
            Self::DuplicateNode { workflow, node } => {
                write!(f, "workflow '{workflow}' already contains a node named '{node}'")
            }
            Self::SourcePortNotFound { edge } => {
                write!(f, "source port '{}' not found ({edge})", edge.source_port)
            }
            Self::TargetPortNotFound { edge } => {
                write!(f, "target port '{}' not found ({edge})", edge.target_port)
            }
            Self::IncompatiblePorts {
                edge,
                source_kind,
                target_kind,
            } => write!(
                f,
                "incompatible ports: {source_kind} cannot feed {target_kind} ({edge})"
            ),
            Self::DuplicateConnection { edge } => {
                write!(f, "input already connected ({edge})")
            }
            Self::CycleDetected { edge } => write!(f, "edge would create a cycle ({edge})"),
            Self::RequiredInputMissing { node, port } => {
                write!(f, "required input port '{port}' on node '{node}' is not fed")
            }
            Self::OutputNotConnected { workflow, port } => {
                write!(f, "output '{port}' of workflow '{workflow}' is not connected")
            }
            Self::SinkCollision {
                target,
                first,
                second,
            } => write!(f, "data sinks '{first}' and '{second}' both write '{target}'"),
        }
    }
}

impl std::error::Error for GraphError {}
