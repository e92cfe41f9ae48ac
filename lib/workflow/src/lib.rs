//! Workflow graph primitives for the fmriprep pipeline builder.
//!
//! This crate provides:
//!
//! - **Graph Model**: workflows as petgraph directed graphs of nodes and
//!   nested workflows, wired port to port with optional edge adapters
//! - **Port System**: named input/output ports with kinds checked on connect
//! - **Interfaces**: the capability set every node operation implements
//! - **Flattening**: hierarchical expansion used for validation, dependency
//!   checks, comparison across builds and export to the executor
//! - **Retry**: a decorator for operations that may fail for numerical reasons
//! - **Execution**: run records and the async executor contract

pub mod definition;
pub mod deps;
pub mod edge;
pub mod error;
pub mod execution;
pub mod executor;
pub mod graph;
pub mod interface;
pub mod node;
pub mod port;
pub mod retry;

pub use definition::{Element, INPUTNODE, OUTPUTNODE, Workflow, make_workflow};
pub use deps::{MissingDependencies, check_dependencies, check_dependencies_with};
pub use edge::{Adapter, Edge, EdgeRef, registration_suffix};
pub use error::GraphError;
pub use execution::{ExecutionState, WorkflowRun, failure_count};
pub use executor::{ExecutionPlan, Executor, ExecutorError, PlanEdge, PlanNode, PlanWriter, run_local};
pub use graph::{FlatGraph, FlatNode};
pub use interface::{IdentityInterface, Interface, MEMORY_FLOOR_GB, PortValues, RunError, require};
pub use node::{Node, make_node};
pub use port::{InputPort, OutputPort, PortKind};
pub use retry::{
    DEGRADED_PORT, FailureMode, RetryOutcome, RetryPolicy, Retrying, Sleeper, ThreadSleeper,
    backoff_range, is_sentinel_values,
};
