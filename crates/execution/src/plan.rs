//! Execution planning — the frozen instance DAG for one run.
//!
//! An [`ExecutionPlan`] is built once per run: the definition is validated,
//! expanded into instances, and the instance-level dependency graph is
//! frozen before scheduling begins.

use std::collections::HashMap;

use cascade_core::{NodeId, WorkflowId};
use cascade_workflow::{DependencyGraph, WorkflowDefinition};
use petgraph::Direction;
use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::ExecutionError;
use crate::expand::expand;
use crate::instance::{InstanceId, NodeInstance};

/// A pre-computed execution plan: the expanded instance DAG.
#[derive(Debug)]
pub struct ExecutionPlan {
    /// Workflow this plan was derived from.
    pub workflow_id: WorkflowId,
    instances: Vec<NodeInstance>,
    graph: DiGraph<usize, ()>,
    index_map: HashMap<InstanceId, NodeIndex>,
}

impl ExecutionPlan {
    /// Build an execution plan from a workflow definition.
    ///
    /// Validates the definition graph, expands mappers into instances, and
    /// wires the instance dependency graph. Nothing executes before this
    /// succeeds; every error here is fatal to the run.
    pub fn from_workflow(workflow: &WorkflowDefinition) -> Result<Self, ExecutionError> {
        if workflow.nodes.is_empty() {
            return Err(ExecutionError::PlanValidation(
                "workflow has no nodes".into(),
            ));
        }

        let definition_graph = DependencyGraph::from_definition(workflow)
            .map_err(|e| ExecutionError::PlanValidation(format!("graph construction failed: {e}")))?;
        definition_graph
            .validate()
            .map_err(|e| ExecutionError::PlanValidation(format!("graph validation failed: {e}")))?;

        let instances = expand(workflow, &definition_graph)?;

        let mut graph = DiGraph::new();
        let mut index_map = HashMap::new();
        for (position, instance) in instances.iter().enumerate() {
            let idx = graph.add_node(position);
            index_map.insert(instance.id.clone(), idx);
        }

        for instance in &instances {
            let to_idx = index_map[&instance.id];
            for upstream in instance.upstream_instances() {
                let from_idx = index_map.get(upstream).ok_or_else(|| {
                    ExecutionError::PlanValidation(format!(
                        "instance {} depends on unknown instance {upstream}",
                        instance.id
                    ))
                })?;
                graph.add_edge(*from_idx, to_idx, ());
            }
        }

        // Expansion of a validated DAG cannot introduce cycles; verify anyway
        // so the scheduler can rely on it.
        if algo::toposort(&graph, None).is_err() {
            return Err(ExecutionError::PlanValidation(
                "expanded instance graph contains a cycle".into(),
            ));
        }

        Ok(Self {
            workflow_id: workflow.id,
            instances,
            graph,
            index_map,
        })
    }

    /// All instances in deterministic order (topological by node,
    /// row-major within each node's expansion).
    #[must_use]
    pub fn instances(&self) -> &[NodeInstance] {
        &self.instances
    }

    /// Look up an instance by id.
    #[must_use]
    pub fn instance(&self, id: &InstanceId) -> Option<&NodeInstance> {
        self.index_map
            .get(id)
            .map(|idx| &self.instances[self.graph[*idx]])
    }

    /// Upstream instance ids of the given instance.
    #[must_use]
    pub fn predecessors(&self, id: &InstanceId) -> Vec<InstanceId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Downstream instance ids of the given instance.
    #[must_use]
    pub fn successors(&self, id: &InstanceId) -> Vec<InstanceId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &InstanceId, direction: Direction) -> Vec<InstanceId> {
        let Some(&idx) = self.index_map.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, direction)
            .map(|i| self.instances[self.graph[i]].id.clone())
            .collect()
    }

    /// Instances with no upstream dependencies.
    #[must_use]
    pub fn entry_instances(&self) -> Vec<InstanceId> {
        self.instances
            .iter()
            .filter(|i| {
                self.graph
                    .neighbors_directed(self.index_map[&i.id], Direction::Incoming)
                    .count()
                    == 0
            })
            .map(|i| i.id.clone())
            .collect()
    }

    /// The instances of one node, in expansion order.
    #[must_use]
    pub fn node_instances(&self, node_id: NodeId) -> Vec<&NodeInstance> {
        self.instances
            .iter()
            .filter(|i| i.node_id == node_id)
            .collect()
    }

    /// Total number of instances in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` if expansion produced no instances (all axes empty).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
