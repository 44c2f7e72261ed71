//! DAG dependency graph built on `petgraph`.

use std::collections::{HashMap, HashSet};

use cascade_core::NodeId;
use petgraph::Direction;
use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::connection::Connection;
use crate::definition::WorkflowDefinition;
use crate::error::WorkflowError;

/// A directed acyclic graph representing the execution dependencies between workflow nodes.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<NodeId, Connection>,
    index_map: HashMap<NodeId, NodeIndex>,
}

impl DependencyGraph {
    /// Build a [`DependencyGraph`] from a [`WorkflowDefinition`].
    ///
    /// Returns an error if a connection references an unknown node or port,
    /// creates a self-loop, or binds the same input port twice.
    pub fn from_definition(definition: &WorkflowDefinition) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::new();
        let mut index_map = HashMap::new();

        for node in &definition.nodes {
            let idx = graph.add_node(node.id);
            index_map.insert(node.id, idx);
        }

        let mut bound_inputs: HashSet<(NodeId, &str)> = HashSet::new();

        for conn in &definition.connections {
            let from_idx = index_map
                .get(&conn.from_node)
                .ok_or(WorkflowError::UnknownNode(conn.from_node))?;
            let to_idx = index_map
                .get(&conn.to_node)
                .ok_or(WorkflowError::UnknownNode(conn.to_node))?;
            if conn.is_self_loop() {
                return Err(WorkflowError::SelfLoop(conn.from_node));
            }

            // Nodes exist (checked above), so the lookups cannot fail.
            let source = definition
                .node(conn.from_node)
                .ok_or(WorkflowError::UnknownNode(conn.from_node))?;
            let target = definition
                .node(conn.to_node)
                .ok_or(WorkflowError::UnknownNode(conn.to_node))?;

            if source.output(&conn.from_port).is_none() {
                return Err(WorkflowError::UnknownOutputPort {
                    node_id: conn.from_node,
                    port: conn.from_port.clone(),
                });
            }
            if target.input(&conn.to_port).is_none() {
                return Err(WorkflowError::UnknownInputPort {
                    node_id: conn.to_node,
                    port: conn.to_port.clone(),
                });
            }
            if !bound_inputs.insert((conn.to_node, conn.to_port.as_str())) {
                return Err(WorkflowError::DuplicateInputBinding {
                    node_id: conn.to_node,
                    port: conn.to_port.clone(),
                });
            }

            graph.add_edge(*from_idx, *to_idx, conn.clone());
        }

        Ok(Self { graph, index_map })
    }

    /// Returns `true` if the graph contains at least one cycle.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        algo::is_cyclic_directed(&self.graph)
    }

    /// Ids of nodes participating in a cycle, empty if the graph is acyclic.
    ///
    /// Every strongly connected component with more than one member is a
    /// cycle; its members are collected for error reporting.
    #[must_use]
    pub fn cycle_members(&self) -> Vec<NodeId> {
        algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .flatten()
            .map(|idx| self.graph[idx])
            .collect()
    }

    /// Topological sort of the graph. Returns an error naming the cycle
    /// members if a cycle exists.
    pub fn topological_sort(&self) -> Result<Vec<NodeId>, WorkflowError> {
        let sorted = algo::toposort(&self.graph, None).map_err(|_| WorkflowError::CycleDetected {
            members: self.cycle_members(),
        })?;
        Ok(sorted.into_iter().map(|idx| self.graph[idx]).collect())
    }

    /// Get all incoming connections (edges pointing TO this node).
    #[must_use]
    pub fn incoming_connections(&self, id: NodeId) -> Vec<&Connection> {
        let Some(&idx) = self.index_map.get(&id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| e.weight())
            .collect()
    }

    /// Get all outgoing connections (edges leaving FROM this node).
    #[must_use]
    pub fn outgoing_connections(&self, id: NodeId) -> Vec<&Connection> {
        let Some(&idx) = self.index_map.get(&id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.weight())
            .collect()
    }

    /// Nodes with no incoming edges (start points of the DAG).
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
                    == 0
            })
            .map(|idx| self.graph[idx])
            .collect()
    }

    /// Nodes with no outgoing edges (end points of the DAG).
    #[must_use]
    pub fn exit_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .count()
                    == 0
            })
            .map(|idx| self.graph[idx])
            .collect()
    }

    /// Get the predecessor (upstream) node IDs of a given node.
    #[must_use]
    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        if let Some(&idx) = self.index_map.get(&id) {
            self.graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|i| self.graph[i])
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Get the successor (downstream) node IDs of a given node.
    #[must_use]
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        if let Some(&idx) = self.index_map.get(&id) {
            self.graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|i| self.graph[i])
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Validate the graph structure: no cycles and at least one entry node.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.has_cycle() {
            return Err(WorkflowError::CycleDetected {
                members: self.cycle_members(),
            });
        }
        if self.entry_nodes().is_empty() {
            return Err(WorkflowError::NoEntryNodes);
        }
        Ok(())
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
