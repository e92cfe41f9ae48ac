//! Workflow definitions.
//!
//! A workflow is a named container of nodes and nested workflows connected
//! by edges. Its surface is formed by two identity nodes: the fields of
//! `inputnode` are its external inputs and the fields of `outputnode` its
//! external outputs. Connecting to a nested workflow addresses those fields
//! directly by name.
//!
//! Every call to [`Workflow::connect`] checks the edge as it is added, so a
//! cycle or a doubly bound input is reported at the line that introduced it.

use crate::edge::{Adapter, Edge, EdgeRef};
use crate::error::GraphError;
use crate::graph::FlatGraph;
use crate::interface::IdentityInterface;
use crate::node::Node;
use crate::port::{InputPort, PortKind};
use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef as _;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Name of the identity node holding a workflow's external inputs.
pub const INPUTNODE: &str = "inputnode";
/// Name of the identity node holding a workflow's external outputs.
pub const OUTPUTNODE: &str = "outputnode";

/// A member of a workflow.
#[derive(Debug, Clone)]
pub enum Element {
    Node(Node),
    Workflow(Workflow),
}

impl Element {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Node(node) => &node.name,
            Self::Workflow(workflow) => &workflow.name,
        }
    }
}

/// A named graph of nodes and nested workflows.
#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    description: String,
    graph: DiGraph<Element, Edge>,
    index: HashMap<String, NodeIndex>,
}

impl Workflow {
    /// Creates an empty workflow.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Creates a workflow with `inputnode` and `outputnode` identity nodes.
    #[must_use]
    pub fn with_io<S: AsRef<str>>(name: impl Into<String>, inputs: &[S], outputs: &[S]) -> Self {
        let mut workflow = Self::new(name);
        for (node_name, fields) in [(INPUTNODE, inputs), (OUTPUTNODE, outputs)] {
            let node = Node::new(node_name, IdentityInterface::new(fields)).local();
            let index = workflow.graph.add_node(Element::Node(node));
            workflow.index.insert(node_name.to_string(), index);
        }
        workflow
    }

    /// Sets the description shown in reports.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Adds a node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNode`] if the name is taken.
    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        self.add_element(Element::Node(node))
    }

    /// Adds several nodes.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNode`] for the first name already taken.
    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) -> Result<(), GraphError> {
        for node in nodes {
            self.add_node(node)?;
        }
        Ok(())
    }

    /// Embeds a workflow as a member.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNode`] if the name is taken.
    pub fn add_workflow(&mut self, workflow: Self) -> Result<(), GraphError> {
        self.add_element(Element::Workflow(workflow))
    }

    fn add_element(&mut self, element: Element) -> Result<(), GraphError> {
        let name = element.name().to_string();
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateNode {
                workflow: self.name.clone(),
                node: name,
            });
        }
        let index = self.graph.add_node(element);
        self.index.insert(name, index);
        Ok(())
    }

    /// Whether a member with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns a member node.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Node> {
        match self.graph.node_weight(*self.index.get(name)?)? {
            Element::Node(node) => Some(node),
            Element::Workflow(_) => None,
        }
    }

    /// Returns a nested workflow.
    #[must_use]
    pub fn workflow(&self, name: &str) -> Option<&Self> {
        match self.graph.node_weight(*self.index.get(name)?)? {
            Element::Workflow(workflow) => Some(workflow),
            Element::Node(_) => None,
        }
    }

    /// Names of every member, in insertion order.
    #[must_use]
    pub fn member_names(&self) -> Vec<&str> {
        self.graph.node_weights().map(Element::name).collect()
    }

    /// Fields of the `inputnode`.
    #[must_use]
    pub fn input_fields(&self) -> Vec<String> {
        self.node(INPUTNODE)
            .map(|node| node.interface.inputs().into_iter().map(|p| p.name).collect())
            .unwrap_or_default()
    }

    /// Fields of the `outputnode`.
    #[must_use]
    pub fn output_fields(&self) -> Vec<String> {
        self.node(OUTPUTNODE)
            .map(|node| node.interface.outputs().into_iter().map(|p| p.name).collect())
            .unwrap_or_default()
    }

    /// Binds a static value to an input of a member node, or to a field of
    /// a nested workflow's `inputnode`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] or
    /// [`GraphError::TargetPortNotFound`] when the target does not exist, and
    /// [`GraphError::DuplicateConnection`] when the port is already bound.
    pub fn set_input(
        &mut self,
        member: &str,
        port: &str,
        value: impl Into<JsonValue>,
    ) -> Result<(), GraphError> {
        let index = self.lookup(member)?;
        let edge = EdgeRef::new("<static>", "value", member, port);
        if self.target_port(index, port).is_none() {
            return Err(GraphError::TargetPortNotFound { edge });
        }
        if self.is_bound(index, port) {
            return Err(GraphError::DuplicateConnection { edge });
        }

        let node = match &mut self.graph[index] {
            Element::Node(node) => node,
            Element::Workflow(workflow) => {
                let inner = workflow.lookup(INPUTNODE)?;
                match &mut workflow.graph[inner] {
                    Element::Node(node) => node,
                    Element::Workflow(_) => {
                        return Err(GraphError::TargetPortNotFound { edge });
                    }
                }
            }
        };
        node.inputs.insert(port.to_string(), value.into());
        Ok(())
    }

    /// Connects several port pairs between two members.
    ///
    /// # Errors
    ///
    /// Returns the first [`GraphError`] raised by a pair; pairs before it
    /// stay connected.
    pub fn connect(&mut self, source: &str, target: &str, ports: &[(&str, &str)]) -> Result<(), GraphError> {
        for (source_port, target_port) in ports {
            self.connect_edge(source, target, Edge::new(*source_port, *target_port))?;
        }
        Ok(())
    }

    /// Connects one port pair through an adapter.
    ///
    /// # Errors
    ///
    /// See [`Workflow::connect`].
    pub fn connect_with(
        &mut self,
        source: &str,
        source_port: &str,
        target: &str,
        target_port: &str,
        adapter: Adapter,
    ) -> Result<(), GraphError> {
        self.connect_edge(
            source,
            target,
            Edge::new(source_port, target_port).with_adapter(adapter),
        )
    }

    fn connect_edge(&mut self, source: &str, target: &str, edge: Edge) -> Result<(), GraphError> {
        let source_index = self.lookup(source)?;
        let target_index = self.lookup(target)?;
        let edge_ref = EdgeRef::new(source, &edge.source_port, target, &edge.target_port);

        let source_kind = self
            .source_kind(source_index, &edge.source_port)
            .ok_or_else(|| GraphError::SourcePortNotFound {
                edge: edge_ref.clone(),
            })?;
        let target_port = self
            .target_port(target_index, &edge.target_port)
            .ok_or_else(|| GraphError::TargetPortNotFound {
                edge: edge_ref.clone(),
            })?;

        let produced = match &edge.adapter {
            Some(adapter) => adapter.output_kind(source_kind),
            None => Some(source_kind),
        };
        if !produced.is_some_and(|kind| kind.is_compatible_with(target_port.kind)) {
            return Err(GraphError::IncompatiblePorts {
                edge: edge_ref,
                source_kind,
                target_kind: target_port.kind,
            });
        }

        if self.is_bound(target_index, &edge.target_port) {
            return Err(GraphError::DuplicateConnection { edge: edge_ref });
        }

        if source_index == target_index
            || has_path_connecting(&self.graph, target_index, source_index, None)
        {
            return Err(GraphError::CycleDetected { edge: edge_ref });
        }

        self.graph.add_edge(source_index, target_index, edge);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<NodeIndex, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::NodeNotFound {
                workflow: self.name.clone(),
                node: name.to_string(),
            })
    }

    fn source_kind(&self, index: NodeIndex, port: &str) -> Option<PortKind> {
        let node = match &self.graph[index] {
            Element::Node(node) => node,
            Element::Workflow(workflow) => workflow.node(OUTPUTNODE)?,
        };
        node.output_port(port).map(|p| p.kind)
    }

    fn target_port(&self, index: NodeIndex, port: &str) -> Option<InputPort> {
        let node = match &self.graph[index] {
            Element::Node(node) => node,
            Element::Workflow(workflow) => workflow.node(INPUTNODE)?,
        };
        node.input_port(port)
    }

    fn is_bound(&self, index: NodeIndex, port: &str) -> bool {
        let static_value = match &self.graph[index] {
            Element::Node(node) => node.inputs.contains_key(port),
            Element::Workflow(workflow) => workflow
                .node(INPUTNODE)
                .is_some_and(|node| node.inputs.contains_key(port)),
        };
        static_value
            || self
                .graph
                .edges_directed(index, Direction::Incoming)
                .any(|e| e.weight().target_port == port)
    }

    /// Validates the workflow and every nested workflow.
    ///
    /// Checks:
    /// - Every required input is fed by an edge or a static value
    /// - Every `outputnode` field is fed
    /// - No cycles across nesting boundaries
    /// - No two data sinks write the same file
    ///
    /// # Errors
    ///
    /// Returns the first failure found.
    pub fn validate(&self) -> Result<(), GraphError> {
        self.flatten().map(|_| ())
    }

    /// Expands nested workflows into one graph with hierarchical names
    /// (`bold_hmc_wf.mcflirt`) and validates it.
    ///
    /// Edges into a nested workflow land on its `inputnode`; edges out of
    /// it leave from its `outputnode`.
    ///
    /// # Errors
    ///
    /// See [`Workflow::validate`].
    pub fn flatten(&self) -> Result<FlatGraph, GraphError> {
        let mut flat = FlatGraph::new(self.name.clone());
        self.collect_into("", &mut flat)?;
        flat.check()?;
        Ok(flat)
    }

    fn collect_into(&self, prefix: &str, flat: &mut FlatGraph) -> Result<(), GraphError> {
        let qualify = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}.{name}")
            }
        };

        for element in self.graph.node_weights() {
            let path = qualify(element.name());
            match element {
                Element::Node(node) => flat.add_node(path, node.clone())?,
                Element::Workflow(workflow) => workflow.collect_into(&path, flat)?,
            }
        }

        for edge in self.graph.edge_references() {
            let source = match &self.graph[edge.source()] {
                Element::Node(node) => qualify(&node.name),
                Element::Workflow(workflow) => format!("{}.{OUTPUTNODE}", qualify(&workflow.name)),
            };
            let target = match &self.graph[edge.target()] {
                Element::Node(node) => qualify(&node.name),
                Element::Workflow(workflow) => format!("{}.{INPUTNODE}", qualify(&workflow.name)),
            };
            flat.add_edge(&source, &target, edge.weight().clone())?;
        }
        Ok(())
    }
}

/// Creates an empty workflow.
#[must_use]
pub fn make_workflow(name: impl Into<String>) -> Workflow {
    Workflow::new(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::Interface;
    use crate::port::OutputPort;

    #[derive(Debug)]
    struct Step {
        name: &'static str,
    }

    impl Interface for Step {
        fn name(&self) -> &str {
            self.name
        }

        fn inputs(&self) -> Vec<InputPort> {
            vec![
                InputPort::required("in_file", PortKind::File),
                InputPort::optional("in_files", PortKind::FileList),
                InputPort::optional("flag", PortKind::Boolean),
            ]
        }

        fn outputs(&self) -> Vec<OutputPort> {
            vec![
                OutputPort::new("out_file", PortKind::File),
                OutputPort::new("out_files", PortKind::FileList),
                OutputPort::new("count", PortKind::Integer),
            ]
        }
    }

    fn step(name: &'static str) -> Node {
        Node::new(name, Step { name })
    }

    fn chain() -> Workflow {
        let mut wf = Workflow::with_io("chain_wf", &["bold_file"], &["out_file"]);
        wf.add_nodes([step("a"), step("b")]).expect("add");
        wf.connect("inputnode", "a", &[("bold_file", "in_file")]).expect("connect");
        wf.connect("a", "b", &[("out_file", "in_file")]).expect("connect");
        wf.connect("b", "outputnode", &[("out_file", "out_file")]).expect("connect");
        wf
    }

    #[test]
    fn add_node_rejects_duplicates() {
        let mut wf = Workflow::new("wf");
        wf.add_node(step("a")).expect("add");
        let err = wf.add_node(step("a")).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode { .. }));
    }

    #[test]
    fn connect_rejects_missing_node() {
        let mut wf = Workflow::new("wf");
        wf.add_node(step("a")).expect("add");
        let err = wf.connect("a", "ghost", &[("out_file", "in_file")]).unwrap_err();
        assert!(matches!(err, GraphError::NodeNotFound { .. }));
    }

    #[test]
    fn connect_rejects_missing_ports() {
        let mut wf = Workflow::new("wf");
        wf.add_nodes([step("a"), step("b")]).expect("add");
        let err = wf.connect("a", "b", &[("nope", "in_file")]).unwrap_err();
        assert!(matches!(err, GraphError::SourcePortNotFound { .. }));
        let err = wf.connect("a", "b", &[("out_file", "nope")]).unwrap_err();
        assert!(matches!(err, GraphError::TargetPortNotFound { .. }));
    }

    #[test]
    fn connect_rejects_incompatible_kinds() {
        let mut wf = Workflow::new("wf");
        wf.add_nodes([step("a"), step("b")]).expect("add");
        let err = wf.connect("a", "b", &[("out_files", "in_file")]).unwrap_err();
        assert!(matches!(err, GraphError::IncompatiblePorts { .. }));
    }

    #[test]
    fn adapter_reshapes_before_checking() {
        let mut wf = Workflow::new("wf");
        wf.add_nodes([step("a"), step("b")]).expect("add");
        wf.connect_with("a", "out_files", "b", "in_file", Adapter::First)
            .expect("list unwrapped to file");
        let err = wf
            .connect_with("a", "count", "b", "flag", Adapter::Pop)
            .unwrap_err();
        assert!(matches!(err, GraphError::IncompatiblePorts { .. }));
    }

    #[test]
    fn connect_rejects_duplicate_consumer() {
        let mut wf = Workflow::new("wf");
        wf.add_nodes([step("a"), step("b"), step("c")]).expect("add");
        wf.connect("a", "c", &[("out_file", "in_file")]).expect("connect");
        let err = wf.connect("b", "c", &[("out_file", "in_file")]).unwrap_err();
        assert_eq!(
            err,
            GraphError::DuplicateConnection {
                edge: EdgeRef::new("b", "out_file", "c", "in_file")
            }
        );
    }

    #[test]
    fn connect_rejects_edge_onto_static_input() {
        let mut wf = Workflow::new("wf");
        wf.add_nodes([step("a"), step("b").with_input("in_file", "x.nii.gz")])
            .expect("add");
        let err = wf.connect("a", "b", &[("out_file", "in_file")]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateConnection { .. }));
    }

    #[test]
    fn connect_rejects_cycles() {
        let mut wf = Workflow::new("wf");
        wf.add_nodes([step("a"), step("b")]).expect("add");
        wf.connect("a", "b", &[("out_file", "in_file")]).expect("connect");
        let err = wf.connect("b", "a", &[("out_file", "in_file")]).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
        let err = wf.connect("a", "a", &[("out_file", "in_files")]).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn validate_reports_unfed_required_input() {
        let mut wf = Workflow::new("wf");
        wf.add_node(step("a")).expect("add");
        let err = wf.validate().unwrap_err();
        assert_eq!(
            err,
            GraphError::RequiredInputMissing {
                node: "a".to_string(),
                port: "in_file".to_string()
            }
        );
    }

    #[test]
    fn validate_reports_unfed_output() {
        let mut wf = Workflow::with_io("wf", &["bold_file"], &["out_file", "extra"]);
        wf.add_node(step("a")).expect("add");
        wf.connect("inputnode", "a", &[("bold_file", "in_file")]).expect("connect");
        wf.connect("a", "outputnode", &[("out_file", "out_file")]).expect("connect");
        let err = wf.validate().unwrap_err();
        assert!(matches!(err, GraphError::OutputNotConnected { port, .. } if port == "extra"));
    }

    #[test]
    fn nested_workflows_flatten_with_hierarchical_names() {
        let mut outer = Workflow::with_io("outer_wf", &["bold_file"], &["result"]);
        outer.add_workflow(chain()).expect("add");
        outer.add_node(step("post")).expect("add");
        outer
            .connect("inputnode", "chain_wf", &[("bold_file", "bold_file")])
            .expect("connect");
        outer
            .connect("chain_wf", "post", &[("out_file", "in_file")])
            .expect("connect");
        outer
            .connect("post", "outputnode", &[("out_file", "result")])
            .expect("connect");

        let flat = outer.flatten().expect("flatten");
        assert!(flat.contains("chain_wf.a"));
        assert!(flat.contains("chain_wf.inputnode"));
        assert!(flat.has_path("inputnode", "chain_wf.b"));
        assert!(flat.has_path("chain_wf.b", "post"));
        assert!(!flat.has_path("post", "chain_wf.a"));
        let incoming = flat.incoming("post");
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].0, "chain_wf.outputnode");
    }

    #[test]
    fn nested_workflow_ports_are_checked() {
        let mut outer = Workflow::new("outer_wf");
        outer.add_workflow(chain()).expect("add");
        outer.add_node(step("post")).expect("add");
        let err = outer
            .connect("chain_wf", "post", &[("missing", "in_file")])
            .unwrap_err();
        assert!(matches!(err, GraphError::SourcePortNotFound { .. }));
    }

    #[test]
    fn set_input_binds_nested_inputnode() {
        let mut outer = Workflow::new("outer_wf");
        outer.add_workflow(chain()).expect("add");
        outer
            .set_input("chain_wf", "bold_file", "sub-01_bold.nii.gz")
            .expect("bind");
        let err = outer
            .set_input("chain_wf", "bold_file", "again.nii.gz")
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateConnection { .. }));

        let flat = outer.flatten().expect("flatten");
        let inputnode = flat.node("chain_wf.inputnode").expect("inputnode");
        assert_eq!(inputnode.inputs["bold_file"], "sub-01_bold.nii.gz");
    }

    #[test]
    fn member_lookup() {
        let wf = chain();
        assert!(wf.node("a").is_some());
        assert!(wf.workflow("a").is_none());
        assert_eq!(wf.input_fields(), vec!["bold_file".to_string()]);
        assert_eq!(wf.output_fields(), vec!["out_file".to_string()]);
        assert_eq!(wf.member_names(), vec!["inputnode", "outputnode", "a", "b"]);
    }
}
