//! Workflow-specific error types.

use cascade_core::NodeId;
use thiserror::Error;

/// Errors that can occur during workflow definition, validation, or graph construction.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Workflow name must not be empty.
    #[error("workflow name must not be empty")]
    EmptyName,

    /// Workflow must have at least one node.
    #[error("workflow must have at least one node")]
    NoNodes,

    /// Duplicate node id found.
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(NodeId),

    /// Connection references a node that does not exist.
    #[error("connection references unknown node: {0}")]
    UnknownNode(NodeId),

    /// A connection has the same source and target node.
    #[error("self-loop detected on node: {0}")]
    SelfLoop(NodeId),

    /// A connection leaves through an output port the source node does not declare.
    #[error("node {node_id} has no output port named '{port}'")]
    UnknownOutputPort {
        /// The source node.
        node_id: NodeId,
        /// The undeclared port name.
        port: String,
    },

    /// A connection arrives at an input port the target node does not declare.
    #[error("node {node_id} has no input port named '{port}'")]
    UnknownInputPort {
        /// The target node.
        node_id: NodeId,
        /// The undeclared port name.
        port: String,
    },

    /// An input port receives more than one connection.
    #[error("input port '{port}' on node {node_id} is bound by more than one connection")]
    DuplicateInputBinding {
        /// The target node.
        node_id: NodeId,
        /// The multiply-bound port name.
        port: String,
    },

    /// A node declares a gather arity on an output port.
    #[error("output port '{port}' on node {node_id} cannot have gather arity")]
    GatherOutputPort {
        /// The offending node.
        node_id: NodeId,
        /// The offending port name.
        port: String,
    },

    /// A mapper expression references an input port the node does not declare.
    #[error("mapper on node {node_id} references undeclared input port '{port}'")]
    UnknownMapperInput {
        /// The node carrying the mapper.
        node_id: NodeId,
        /// The undeclared port name.
        port: String,
    },

    /// A mapper expression references a node that does not exist in the workflow.
    #[error("mapper on node {node_id} references unknown node {source_node_id}")]
    UnknownMapperNode {
        /// The node carrying the mapper.
        node_id: NodeId,
        /// The referenced node that does not exist.
        source_node_id: NodeId,
    },

    /// The workflow graph contains a cycle and is not a DAG.
    #[error("cycle detected in workflow graph involving nodes: {}", format_members(members))]
    CycleDetected {
        /// Ids of the nodes participating in the cycle.
        members: Vec<NodeId>,
    },

    /// Every node has incoming edges, so there is no place to start execution.
    #[error("workflow has no entry nodes (all nodes have incoming edges)")]
    NoEntryNodes,
}

/// Render cycle member ids as a comma-separated list for error display.
fn format_members(members: &[NodeId]) -> String {
    members
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
