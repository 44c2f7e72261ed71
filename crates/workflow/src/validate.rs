//! Comprehensive workflow validation that collects all errors.

use std::collections::HashSet;

use crate::definition::WorkflowDefinition;
use crate::error::WorkflowError;
use crate::graph::DependencyGraph;

/// Validate a workflow definition comprehensively.
///
/// Unlike [`WorkflowBuilder::build`](crate::WorkflowBuilder::build), which stops at the
/// first error, this function collects every issue it can find so they can all be
/// reported at once.
#[must_use]
pub fn validate_workflow(definition: &WorkflowDefinition) -> Vec<WorkflowError> {
    let mut errors = Vec::new();

    // 1. Check name
    if definition.name.is_empty() {
        errors.push(WorkflowError::EmptyName);
    }

    // 2. Check node count
    if definition.nodes.is_empty() {
        errors.push(WorkflowError::NoNodes);
        return errors; // Cannot check further without nodes
    }

    // 3. Check duplicate node IDs
    let mut seen_ids = HashSet::new();
    for node in &definition.nodes {
        if !seen_ids.insert(node.id) {
            errors.push(WorkflowError::DuplicateNodeId(node.id));
        }
    }

    // 4. Check per-node declarations: gather outputs, mapper references
    for node in &definition.nodes {
        for port in &node.outputs {
            if port.is_gather() {
                errors.push(WorkflowError::GatherOutputPort {
                    node_id: node.id,
                    port: port.name.clone(),
                });
            }
        }
        if let Some(mapper) = &node.mapper {
            for port in mapper.referenced_inputs() {
                if node.input(port).is_none() {
                    errors.push(WorkflowError::UnknownMapperInput {
                        node_id: node.id,
                        port: port.to_string(),
                    });
                }
            }
            for source in mapper.referenced_nodes() {
                if !seen_ids.contains(&source) {
                    errors.push(WorkflowError::UnknownMapperNode {
                        node_id: node.id,
                        source_node_id: source,
                    });
                }
            }
        }
    }

    // 5. Check connections: node existence, port existence, self-loops,
    //    double-bound inputs
    let mut bound_inputs: HashSet<(cascade_core::NodeId, &str)> = HashSet::new();
    for conn in &definition.connections {
        if !seen_ids.contains(&conn.from_node) {
            errors.push(WorkflowError::UnknownNode(conn.from_node));
        } else if let Some(source) = definition.node(conn.from_node)
            && source.output(&conn.from_port).is_none()
        {
            errors.push(WorkflowError::UnknownOutputPort {
                node_id: conn.from_node,
                port: conn.from_port.clone(),
            });
        }

        if !seen_ids.contains(&conn.to_node) {
            errors.push(WorkflowError::UnknownNode(conn.to_node));
        } else if let Some(target) = definition.node(conn.to_node)
            && target.input(&conn.to_port).is_none()
        {
            errors.push(WorkflowError::UnknownInputPort {
                node_id: conn.to_node,
                port: conn.to_port.clone(),
            });
        }

        if conn.is_self_loop() {
            errors.push(WorkflowError::SelfLoop(conn.from_node));
        }

        if !bound_inputs.insert((conn.to_node, conn.to_port.as_str())) {
            errors.push(WorkflowError::DuplicateInputBinding {
                node_id: conn.to_node,
                port: conn.to_port.clone(),
            });
        }
    }

    // 6. Check graph structure (only meaningful if connections were sane)
    match DependencyGraph::from_definition(definition) {
        Ok(graph) => {
            if graph.has_cycle() {
                errors.push(WorkflowError::CycleDetected {
                    members: graph.cycle_members(),
                });
            }
            if graph.entry_nodes().is_empty() {
                errors.push(WorkflowError::NoEntryNodes);
            }
        }
        Err(_) => {
            // Construction errors were already collected port-by-port above.
        }
    }

    errors
}
