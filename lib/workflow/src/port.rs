//! Port system for workflow nodes.
//!
//! Ports are named connection points on nodes. Each port has a kind that
//! describes the value it carries. A connection is valid when the producer's
//! kind, after any edge adapter is applied, is accepted by the consumer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of value carried by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    /// A single file path.
    File,
    /// A list of file paths.
    FileList,
    /// A floating point number.
    Number,
    /// An integer.
    Integer,
    Boolean,
    Text,
    /// Any value; used by identity nodes.
    Any,
}

impl PortKind {
    /// Checks whether a producer of `self` may feed a consumer of `consumer`.
    ///
    /// Kinds match when equal or when either side is `Any`. A file may feed
    /// a file list (a one-element list) and an integer may feed a number.
    #[must_use]
    pub fn is_compatible_with(self, consumer: Self) -> bool {
        if self == consumer || self == Self::Any || consumer == Self::Any {
            return true;
        }
        matches!(
            (self, consumer),
            (Self::File, Self::FileList) | (Self::Integer, Self::Number)
        )
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::File => "file",
            Self::FileList => "file list",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// An input port on a workflow node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPort {
    /// The name of this port.
    pub name: String,
    pub kind: PortKind,
    /// Whether this input must be fed by an edge or a static value.
    pub required: bool,
}

impl InputPort {
    /// Creates a new required input port.
    #[must_use]
    pub fn required(name: impl Into<String>, kind: PortKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    /// Creates a new optional input port.
    #[must_use]
    pub fn optional(name: impl Into<String>, kind: PortKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// An output port on a workflow node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPort {
    /// The name of this port.
    pub name: String,
    pub kind: PortKind,
}

impl OutputPort {
    /// Creates a new output port.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PortKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_kind_compatible_with_all() {
        assert!(PortKind::Any.is_compatible_with(PortKind::File));
        assert!(PortKind::Number.is_compatible_with(PortKind::Any));
    }

    #[test]
    fn same_kind_compatible() {
        assert!(PortKind::File.is_compatible_with(PortKind::File));
    }

    #[test]
    fn widening_is_one_way() {
        assert!(PortKind::File.is_compatible_with(PortKind::FileList));
        assert!(!PortKind::FileList.is_compatible_with(PortKind::File));
        assert!(PortKind::Integer.is_compatible_with(PortKind::Number));
        assert!(!PortKind::Number.is_compatible_with(PortKind::Integer));
    }

    #[test]
    fn different_kinds_not_compatible() {
        assert!(!PortKind::Text.is_compatible_with(PortKind::File));
    }

    #[test]
    fn input_port_required() {
        let port = InputPort::required("in_file", PortKind::File);
        assert!(port.required);
        assert_eq!(port.name, "in_file");
    }

    #[test]
    fn input_port_optional() {
        let port = InputPort::optional("ref_file", PortKind::File);
        assert!(!port.required);
    }
}
