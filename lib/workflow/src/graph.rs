//! Flattened workflow graphs.
//!
//! A [`FlatGraph`] is the single-level view of a workflow and everything
//! nested in it, keyed by hierarchical node names. It is what gets
//! validated, checked for missing executables, compared across builds, and
//! exported to the executor.

use crate::definition::OUTPUTNODE;
use crate::edge::{Edge, EdgeRef};
use crate::error::GraphError;
use crate::node::Node;
use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef as _;
use std::collections::{BTreeMap, HashMap};

/// A node of a flattened graph.
#[derive(Debug, Clone)]
pub struct FlatNode {
    /// Hierarchical name, unique within the graph.
    pub path: String,
    pub node: Node,
}

/// A workflow expanded into a single directed graph.
#[derive(Debug, Clone)]
pub struct FlatGraph {
    name: String,
    graph: DiGraph<FlatNode, Edge>,
    index: HashMap<String, NodeIndex>,
}

impl FlatGraph {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn add_node(&mut self, path: String, node: Node) -> Result<(), GraphError> {
        if self.index.contains_key(&path) {
            return Err(GraphError::DuplicateNode {
                workflow: self.name.clone(),
                node: path,
            });
        }
        let index = self.graph.add_node(FlatNode {
            path: path.clone(),
            node,
        });
        self.index.insert(path, index);
        Ok(())
    }

    pub(crate) fn add_edge(&mut self, source: &str, target: &str, edge: Edge) -> Result<(), GraphError> {
        let source_index = self.lookup(source)?;
        let target_index = self.lookup(target)?;
        self.graph.add_edge(source_index, target_index, edge);
        Ok(())
    }

    fn lookup(&self, path: &str) -> Result<NodeIndex, GraphError> {
        self.index
            .get(path)
            .copied()
            .ok_or_else(|| GraphError::NodeNotFound {
                workflow: self.name.clone(),
                node: path.to_string(),
            })
    }

    /// Name of the workflow this graph was flattened from.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Returns the node at a hierarchical path.
    #[must_use]
    pub fn node(&self, path: &str) -> Option<&Node> {
        let index = self.index.get(path)?;
        self.graph.node_weight(*index).map(|flat| &flat.node)
    }

    /// Iterates over every node in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &FlatNode> {
        self.graph.node_weights()
    }

    /// Hierarchical names, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.index.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Paths whose last segment is `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Vec<&str> {
        self.paths()
            .into_iter()
            .filter(|path| path.rsplit('.').next() == Some(name))
            .collect()
    }

    /// Whether any path lies under the nested workflow `prefix`.
    #[must_use]
    pub fn has_workflow(&self, prefix: &str) -> bool {
        let dotted = format!("{prefix}.");
        self.index
            .keys()
            .any(|path| path.starts_with(&dotted) || path.contains(&format!(".{dotted}")))
    }

    /// Edges arriving at `path`, with their source paths.
    #[must_use]
    pub fn incoming(&self, path: &str) -> Vec<(&str, &Edge)> {
        self.neighbours(path, Direction::Incoming)
    }

    /// Edges leaving `path`, with their target paths.
    #[must_use]
    pub fn outgoing(&self, path: &str) -> Vec<(&str, &Edge)> {
        self.neighbours(path, Direction::Outgoing)
    }

    fn neighbours(&self, path: &str, direction: Direction) -> Vec<(&str, &Edge)> {
        let Some(&index) = self.index.get(path) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(index, direction)
            .map(|edge| {
                let other = match direction {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                (self.graph[other].path.as_str(), edge.weight())
            })
            .collect()
    }

    /// The source feeding an input port of `path`, if any.
    #[must_use]
    pub fn source_of(&self, path: &str, port: &str) -> Option<(&str, &Edge)> {
        self.incoming(path)
            .into_iter()
            .find(|(_, edge)| edge.target_port == port)
    }

    /// Whether data can flow from `from` to `to`.
    #[must_use]
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => a != b && has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }

    /// Every edge by endpoint names, sorted.
    #[must_use]
    pub fn edge_refs(&self) -> Vec<EdgeRef> {
        let mut refs: Vec<EdgeRef> = self
            .graph
            .edge_references()
            .map(|edge| {
                EdgeRef::new(
                    &self.graph[edge.source()].path,
                    &edge.weight().source_port,
                    &self.graph[edge.target()].path,
                    &edge.weight().target_port,
                )
            })
            .collect();
        refs.sort();
        refs
    }

    /// Node paths in a dependency-respecting order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] with an edge on the cycle.
    pub fn topological_order(&self) -> Result<Vec<&str>, GraphError> {
        toposort(&self.graph, None)
            .map(|order| {
                order
                    .into_iter()
                    .map(|index| self.graph[index].path.as_str())
                    .collect()
            })
            .map_err(|cycle| {
                let index = cycle.node_id();
                let edge = self
                    .graph
                    .edges_directed(index, Direction::Incoming)
                    .find(|edge| has_path_connecting(&self.graph, index, edge.source(), None))
                    .map(|edge| {
                        EdgeRef::new(
                            &self.graph[edge.source()].path,
                            &edge.weight().source_port,
                            &self.graph[index].path,
                            &edge.weight().target_port,
                        )
                    })
                    .unwrap_or_else(|| {
                        let path = &self.graph[index].path;
                        EdgeRef::new(path, "?", path, "?")
                    });
                GraphError::CycleDetected { edge }
            })
    }

    /// Checks the invariants a runnable graph must hold.
    pub(crate) fn check(&self) -> Result<(), GraphError> {
        self.topological_order()?;

        for index in self.graph.node_indices() {
            let flat = &self.graph[index];
            let fed = |port: &str| {
                flat.node.inputs.contains_key(port)
                    || self
                        .graph
                        .edges_directed(index, Direction::Incoming)
                        .any(|edge| edge.weight().target_port == port)
            };

            let is_outputnode = flat.path == OUTPUTNODE || flat.path.ends_with(&format!(".{OUTPUTNODE}"));
            for port in flat.node.interface.inputs() {
                if (port.required || is_outputnode) && !fed(&port.name) {
                    if is_outputnode {
                        let workflow = flat
                            .path
                            .strip_suffix(OUTPUTNODE)
                            .map(|p| p.trim_end_matches('.'))
                            .filter(|p| !p.is_empty())
                            .unwrap_or(&self.name);
                        return Err(GraphError::OutputNotConnected {
                            workflow: workflow.to_string(),
                            port: port.name,
                        });
                    }
                    return Err(GraphError::RequiredInputMissing {
                        node: flat.path.clone(),
                        port: port.name,
                    });
                }
            }
        }

        let mut sinks: BTreeMap<String, &str> = BTreeMap::new();
        for flat in self.graph.node_weights() {
            let Some(target) = flat.node.sink_target() else {
                continue;
            };
            if let Some(first) = sinks.get(&target) {
                return Err(GraphError::SinkCollision {
                    target,
                    first: (*first).to_string(),
                    second: flat.path.clone(),
                });
            }
            sinks.insert(target, &flat.path);
        }

        Ok(())
    }
}
