//! Workflow nodes.
//!
//! A node binds an [`Interface`] to a name that is unique within its parent
//! workflow, together with the hints the executor schedules by: a memory
//! estimate, a thread count and whether the node may be submitted to a
//! worker process or must run in the executor's own process.

use crate::interface::{Interface, MEMORY_FLOOR_GB, PortValues};
use crate::port::{InputPort, OutputPort};
use crate::retry::{RetryPolicy, Retrying};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// A processing step in a workflow.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub interface: Arc<dyn Interface>,
    /// Estimated peak memory in gigabytes.
    pub mem_gb: f64,
    pub n_procs: usize,
    /// `false` for bookkeeping nodes the executor runs in-process.
    pub submittable: bool,
    /// Values bound to input ports at build time.
    pub inputs: PortValues,
    pub retry: Option<RetryPolicy>,
}

impl Node {
    /// Creates a node using the interface's default memory estimate.
    #[must_use]
    pub fn new(name: impl Into<String>, interface: impl Interface + 'static) -> Self {
        Self::from_arc(name, Arc::new(interface))
    }

    /// Creates a node from a shared interface.
    #[must_use]
    pub fn from_arc(name: impl Into<String>, interface: Arc<dyn Interface>) -> Self {
        let mem_gb = interface.default_mem_gb().max(MEMORY_FLOOR_GB);
        Self {
            name: name.into(),
            interface,
            mem_gb,
            n_procs: 1,
            submittable: true,
            inputs: PortValues::new(),
            retry: None,
        }
    }

    /// Sets the memory estimate, never below the floor.
    #[must_use]
    pub fn with_mem_gb(mut self, mem_gb: f64) -> Self {
        self.mem_gb = mem_gb.max(MEMORY_FLOOR_GB);
        self
    }

    #[must_use]
    pub fn with_threads(mut self, n_procs: usize) -> Self {
        self.n_procs = n_procs.max(1);
        self
    }

    /// Marks the node as bookkeeping: run in-process, never submitted.
    #[must_use]
    pub fn local(mut self) -> Self {
        self.submittable = false;
        self
    }

    /// Binds a static value to an input port.
    #[must_use]
    pub fn with_input(mut self, port: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.inputs.insert(port.into(), value.into());
        self
    }

    /// Wraps the interface in the retry decorator.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.interface = Arc::new(Retrying::new(self.interface, policy));
        self.retry = Some(policy);
        self
    }

    /// Returns the input port with the given name.
    #[must_use]
    pub fn input_port(&self, name: &str) -> Option<InputPort> {
        self.interface.inputs().into_iter().find(|p| p.name == name)
    }

    /// Returns the output port with the given name.
    #[must_use]
    pub fn output_port(&self, name: &str) -> Option<OutputPort> {
        self.interface.outputs().into_iter().find(|p| p.name == name)
    }

    /// Name of the operation this node runs.
    #[must_use]
    pub fn interface_name(&self) -> &str {
        self.interface.name()
    }

    /// File written by this node if it is a data sink.
    #[must_use]
    pub fn sink_target(&self) -> Option<String> {
        self.interface.sink_target(&self.inputs)
    }
}

/// Builds a node in one call.
#[must_use]
pub fn make_node(
    name: impl Into<String>,
    interface: impl Interface + 'static,
    mem_gb: f64,
    n_procs: usize,
    submittable: bool,
) -> Node {
    let node = Node::new(name, interface)
        .with_mem_gb(mem_gb)
        .with_threads(n_procs);
    if submittable { node } else { node.local() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::IdentityInterface;
    use crate::retry::DEGRADED_PORT;

    #[test]
    fn node_defaults() {
        let node = Node::new("inputnode", IdentityInterface::new(&["bold_file"]));
        assert_eq!(node.name, "inputnode");
        assert_eq!(node.n_procs, 1);
        assert!(node.submittable);
        assert!((node.mem_gb - MEMORY_FLOOR_GB).abs() < f64::EPSILON);
        assert!(node.input_port("bold_file").is_some());
        assert!(node.output_port("missing").is_none());
    }

    #[test]
    fn memory_never_drops_below_floor() {
        let node = make_node("n", IdentityInterface::new(&["a"]), 0.0, 0, false);
        assert!((node.mem_gb - MEMORY_FLOOR_GB).abs() < f64::EPSILON);
        assert_eq!(node.n_procs, 1);
        assert!(!node.submittable);
    }

    #[test]
    fn static_inputs_are_recorded() {
        let node = Node::new("n", IdentityInterface::new(&["a"])).with_input("a", 3);
        assert_eq!(node.inputs["a"], serde_json::json!(3));
    }

    #[test]
    fn retry_adds_degraded_output() {
        let node = Node::new("acompcor", IdentityInterface::new(&["components_file"]))
            .with_retry(RetryPolicy::default());
        assert!(node.output_port(DEGRADED_PORT).is_some());
        assert_eq!(node.retry, Some(RetryPolicy::default()));
        assert_eq!(node.interface_name(), "IdentityInterface");
    }
}
