//! Hand-off from the builder to an executor.
//!
//! The builder's product is an [`ExecutionPlan`]: every node of the
//! flattened graph with its resource hints and static inputs, and every
//! edge with its adapter. Executors consume plans through the async
//! [`Executor`] trait. [`PlanWriter`] persists the plan for an external
//! scheduler; [`run_local`] evaluates graphs made only of in-process
//! operations.

use crate::edge::{Adapter, Edge};
use crate::graph::FlatGraph;
use crate::interface::{PortValues, RunError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use fmriprep_core::RunId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

/// Errors raised while executing a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorError {
    /// The plan could not be serialized.
    Serialize { reason: String },
    /// A file or directory could not be written.
    Io { path: PathBuf, reason: String },
    /// A node asks for more memory or threads than the executor offers.
    InsufficientResources {
        node: String,
        mem_gb: f64,
        n_procs: usize,
    },
    /// A node failed.
    NodeFailed { node: String, error: RunError },
    /// The graph could not be ordered.
    InvalidGraph { reason: String },
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialize { reason } => write!(f, "cannot serialize execution plan: {reason}"),
            Self::Io { path, reason } => write!(f, "cannot write {}: {reason}", path.display()),
            Self::InsufficientResources {
                node,
                mem_gb,
                n_procs,
            } => write!(
                f,
                "node '{node}' needs {mem_gb:.2} GB and {n_procs} threads, more than available"
            ),
            Self::NodeFailed { node, error } => write!(f, "node '{node}' failed: {error}"),
            Self::InvalidGraph { reason } => write!(f, "invalid graph: {reason}"),
        }
    }
}

impl std::error::Error for ExecutorError {}

/// A node as recorded in an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Hierarchical name, also the node's scratch directory.
    pub path: String,
    pub interface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub parameters: JsonValue,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: PortValues,
    pub mem_gb: f64,
    pub n_procs: usize,
    pub submittable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

/// An edge as recorded in an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEdge {
    pub source: String,
    pub source_port: String,
    pub target: String,
    pub target_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<Adapter>,
}

/// A serializable, topologically ordered graph ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub workflow: String,
    pub run_id: RunId,
    pub nodes: Vec<PlanNode>,
    pub edges: Vec<PlanEdge>,
}

impl ExecutionPlan {
    /// Builds a plan from a flattened graph.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::InvalidGraph`] if the graph has a cycle.
    pub fn from_graph(graph: &FlatGraph, run_id: RunId) -> Result<Self, ExecutorError> {
        let order = graph
            .topological_order()
            .map_err(|e| ExecutorError::InvalidGraph {
                reason: e.to_string(),
            })?;

        let mut nodes = Vec::with_capacity(order.len());
        for path in order {
            let Some(node) = graph.node(path) else {
                continue;
            };
            nodes.push(PlanNode {
                path: path.to_string(),
                interface: node.interface_name().to_string(),
                command: node.interface.command().map(str::to_string),
                parameters: node.interface.parameters(),
                inputs: node.inputs.clone(),
                mem_gb: node.mem_gb,
                n_procs: node.n_procs,
                submittable: node.submittable,
                retry: node.retry,
            });
        }

        let edges = graph
            .nodes()
            .flat_map(|flat| {
                graph
                    .outgoing(&flat.path)
                    .into_iter()
                    .map(|(target, edge)| PlanEdge {
                        source: flat.path.clone(),
                        source_port: edge.source_port.clone(),
                        target: target.to_string(),
                        target_port: edge.target_port.clone(),
                        adapter: edge.adapter.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        Ok(Self {
            workflow: graph.name().to_string(),
            run_id,
            nodes,
            edges,
        })
    }

    /// Largest memory estimate of any node.
    #[must_use]
    pub fn peak_mem_gb(&self) -> f64 {
        self.nodes.iter().map(|n| n.mem_gb).fold(0.0, f64::max)
    }
}

/// Something that runs execution plans.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executes a plan, returning where its results can be found.
    async fn run(&self, plan: &ExecutionPlan) -> Result<PathBuf, ExecutorError>;
}

/// Writes plans to `work_dir/<run_id>/<workflow>.json` for an external
/// scheduler.
#[derive(Debug, Clone)]
pub struct PlanWriter {
    work_dir: PathBuf,
    nprocs: Option<usize>,
    memory_gb: Option<f64>,
}

impl PlanWriter {
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            nprocs: None,
            memory_gb: None,
        }
    }

    /// Rejects plans whose nodes exceed these limits.
    #[must_use]
    pub fn with_limits(mut self, nprocs: Option<usize>, memory_gb: Option<f64>) -> Self {
        self.nprocs = nprocs;
        self.memory_gb = memory_gb;
        self
    }

    fn check_resources(&self, plan: &ExecutionPlan) -> Result<(), ExecutorError> {
        for node in &plan.nodes {
            let too_big = self.memory_gb.is_some_and(|limit| node.mem_gb > limit)
                || self.nprocs.is_some_and(|limit| node.n_procs > limit);
            if too_big {
                return Err(ExecutorError::InsufficientResources {
                    node: node.path.clone(),
                    mem_gb: node.mem_gb,
                    n_procs: node.n_procs,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for PlanWriter {
    #[instrument(skip(self, plan), fields(workflow = %plan.workflow, nodes = plan.nodes.len()))]
    async fn run(&self, plan: &ExecutionPlan) -> Result<PathBuf, ExecutorError> {
        self.check_resources(plan)?;

        let dir = self.work_dir.join(plan.run_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ExecutorError::Io {
                path: dir.clone(),
                reason: e.to_string(),
            })?;

        let path = dir.join(format!("{}.json", plan.workflow));
        let json = serde_json::to_vec_pretty(plan).map_err(|e| ExecutorError::Serialize {
            reason: e.to_string(),
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| ExecutorError::Io {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        info!(path = %path.display(), peak_mem_gb = plan.peak_mem_gb(), "execution plan written");
        Ok(path)
    }
}

/// Runs every node of `graph` in-process, in topological order.
///
/// Values flow along edges through their adapters. Only graphs whose
/// operations implement [`crate::Interface::run`] can be evaluated.
///
/// # Errors
///
/// Returns [`ExecutorError::NodeFailed`] for the first failing node.
pub fn run_local(graph: &FlatGraph) -> Result<BTreeMap<String, PortValues>, ExecutorError> {
    let order = graph
        .topological_order()
        .map_err(|e| ExecutorError::InvalidGraph {
            reason: e.to_string(),
        })?;

    let mut results: BTreeMap<String, PortValues> = BTreeMap::new();
    for path in order {
        let Some(node) = graph.node(path) else {
            continue;
        };

        let mut inputs = node.inputs.clone();
        for (source, edge) in graph.incoming(path) {
            if let Some(value) = transfer(results.get(source), edge) {
                inputs.insert(edge.target_port.clone(), value);
            }
        }

        debug!(node = path, "running in-process");
        let outputs = node
            .interface
            .run(&inputs)
            .map_err(|error| ExecutorError::NodeFailed {
                node: path.to_string(),
                error,
            })?;
        results.insert(path.to_string(), outputs);
    }
    Ok(results)
}

fn transfer(outputs: Option<&PortValues>, edge: &Edge) -> Option<JsonValue> {
    let value = outputs?.get(&edge.source_port)?;
    match &edge.adapter {
        Some(adapter) => adapter.apply(value),
        None => Some(value.clone()),
    }
}
