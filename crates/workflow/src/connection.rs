//! Edge (connection) types linking workflow node ports.

use cascade_core::NodeId;
use serde::{Deserialize, Serialize};

/// A directed edge from one node's output port to another node's input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Source node.
    pub from_node: NodeId,
    /// Source output port.
    pub from_port: String,
    /// Target node.
    pub to_node: NodeId,
    /// Target input port.
    pub to_port: String,
}

impl Connection {
    /// Create a connection between two ports.
    #[must_use]
    pub fn new(
        from_node: NodeId,
        from_port: impl Into<String>,
        to_node: NodeId,
        to_port: impl Into<String>,
    ) -> Self {
        Self {
            from_node,
            from_port: from_port.into(),
            to_node,
            to_port: to_port.into(),
        }
    }

    /// Returns `true` if this connection forms a self-loop.
    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        self.from_node == self.to_node
    }
}
