//! Fluent builder for constructing and validating workflow definitions.

use std::time::Duration;

use chrono::Utc;
use cascade_core::{NodeId, Version, WorkflowId};

use crate::connection::Connection;
use crate::definition::{RetryConfig, WorkflowConfig, WorkflowDefinition};
use crate::error::WorkflowError;
use crate::graph::DependencyGraph;
use crate::node::NodeDefinition;

/// A builder that accumulates nodes, connections, and configuration, then validates
/// and produces a [`WorkflowDefinition`].
pub struct WorkflowBuilder {
    id: WorkflowId,
    name: String,
    description: Option<String>,
    version: Version,
    nodes: Vec<NodeDefinition>,
    connections: Vec<Connection>,
    config: WorkflowConfig,
}

impl WorkflowBuilder {
    /// Start building a workflow with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::v4(),
            name: name.into(),
            description: None,
            version: Version::new(0, 1, 0),
            nodes: Vec::new(),
            connections: Vec::new(),
            config: WorkflowConfig::default(),
        }
    }

    /// Override the auto-generated workflow ID.
    #[must_use]
    pub fn id(mut self, id: WorkflowId) -> Self {
        self.id = id;
        self
    }

    /// Set the workflow description.
    #[must_use]
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the workflow version.
    #[must_use]
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Add a node to the workflow.
    #[must_use]
    pub fn add_node(mut self, node: NodeDefinition) -> Self {
        self.nodes.push(node);
        self
    }

    /// Connect an output port to a downstream input port.
    #[must_use]
    pub fn connect(
        mut self,
        from: NodeId,
        from_port: impl Into<String>,
        to: NodeId,
        to_port: impl Into<String>,
    ) -> Self {
        self.connections
            .push(Connection::new(from, from_port, to, to_port));
        self
    }

    /// Set the default per-instance step timeout.
    #[must_use]
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.config.step_timeout = Some(timeout);
        self
    }

    /// Set the maximum number of instances that may execute in parallel.
    #[must_use]
    pub fn max_parallel(mut self, max: usize) -> Self {
        self.config.max_parallel_nodes = max;
        self
    }

    /// Set the workflow-default retry policy for infrastructure errors.
    #[must_use]
    pub fn retry_policy(mut self, retry: RetryConfig) -> Self {
        self.config.retry_policy = Some(retry);
        self
    }

    /// Consume the builder, validate the workflow, and return the definition.
    ///
    /// Validation stops at the first error; see
    /// [`validate_workflow`](crate::validate_workflow) for the exhaustive
    /// variant. Checks: non-empty name, at least one node, no duplicate IDs,
    /// port-correct connections, mapper references, and a valid DAG structure.
    pub fn build(self) -> Result<WorkflowDefinition, WorkflowError> {
        if self.name.is_empty() {
            return Err(WorkflowError::EmptyName);
        }
        if self.nodes.is_empty() {
            return Err(WorkflowError::NoNodes);
        }

        // Check duplicate node IDs
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id) {
                return Err(WorkflowError::DuplicateNodeId(node.id));
            }
        }

        // Check gather arity is only declared on inputs, and mapper references
        // name declared ports / known nodes.
        for node in &self.nodes {
            for port in &node.outputs {
                if port.is_gather() {
                    return Err(WorkflowError::GatherOutputPort {
                        node_id: node.id,
                        port: port.name.clone(),
                    });
                }
            }
            if let Some(mapper) = &node.mapper {
                for port in mapper.referenced_inputs() {
                    if node.input(port).is_none() {
                        return Err(WorkflowError::UnknownMapperInput {
                            node_id: node.id,
                            port: port.to_string(),
                        });
                    }
                }
                for source in mapper.referenced_nodes() {
                    if !seen.contains(&source) {
                        return Err(WorkflowError::UnknownMapperNode {
                            node_id: node.id,
                            source_node_id: source,
                        });
                    }
                }
            }
        }

        let now = Utc::now();
        let definition = WorkflowDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            version: self.version,
            nodes: self.nodes,
            connections: self.connections,
            config: self.config,
            created_at: now,
            updated_at: now,
        };

        // Validate graph structure (ports, bindings, acyclicity)
        let graph = DependencyGraph::from_definition(&definition)?;
        graph.validate()?;

        Ok(definition)
    }
}
