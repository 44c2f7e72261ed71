//! Node (step template) definition within a workflow.

use std::collections::HashMap;
use std::time::Duration;

use cascade_core::{NodeId, StepKey, Version};
use serde::{Deserialize, Serialize};

use crate::definition::RetryConfig;
use crate::mapper::Mapper;
use crate::port::PortSpec;

/// A single step template inside a workflow graph.
///
/// A node declares its input and output ports statically; connections and
/// mapper expressions are validated against these declarations when the
/// workflow is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique node identifier within this workflow.
    pub id: NodeId,
    /// Human-readable label.
    pub name: String,
    /// Which step implementation this node executes.
    pub step: StepKey,
    /// Version of the step implementation. Participates in the cache
    /// fingerprint: bumping it invalidates previously memoized runs.
    pub step_version: Version,
    /// Declared input ports.
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    /// Declared output ports.
    #[serde(default)]
    pub outputs: Vec<PortSpec>,
    /// Literal values for input ports not fed by a connection. A port
    /// referenced by a mapper axis must have an array default here.
    #[serde(default)]
    pub defaults: HashMap<String, serde_json::Value>,
    /// Optional fan-out rule expanding this node over its axes.
    #[serde(default)]
    pub mapper: Option<Mapper>,
    /// Node-level retry policy for infrastructure errors (overrides the
    /// workflow default).
    #[serde(default)]
    pub retry_policy: Option<RetryConfig>,
    /// Node-level timeout (overrides the workflow default).
    #[serde(default, with = "crate::serde_duration_opt")]
    pub timeout: Option<Duration>,
    /// Optional description of what this node does.
    #[serde(default)]
    pub description: Option<String>,
}

impl NodeDefinition {
    /// Create a minimal node definition.
    #[must_use]
    pub fn new(id: NodeId, name: impl Into<String>, step: StepKey) -> Self {
        Self {
            id,
            name: name.into(),
            step,
            step_version: Version::new(0, 1, 0),
            inputs: Vec::new(),
            outputs: Vec::new(),
            defaults: HashMap::new(),
            mapper: None,
            retry_policy: None,
            timeout: None,
            description: None,
        }
    }

    /// Pin the step version.
    #[must_use]
    pub fn with_step_version(mut self, version: Version) -> Self {
        self.step_version = version;
        self
    }

    /// Declare an input port.
    #[must_use]
    pub fn with_input(mut self, port: PortSpec) -> Self {
        self.inputs.push(port);
        self
    }

    /// Declare an output port.
    #[must_use]
    pub fn with_output(mut self, port: PortSpec) -> Self {
        self.outputs.push(port);
        self
    }

    /// Set a literal default for an input port.
    #[must_use]
    pub fn with_default(mut self, port: impl Into<String>, value: serde_json::Value) -> Self {
        self.defaults.insert(port.into(), value);
        self
    }

    /// Attach a mapper expression.
    #[must_use]
    pub fn with_mapper(mut self, mapper: Mapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Set a node-level retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry_policy = Some(retry);
        self
    }

    /// Set a node-level timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Look up a declared input port by name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&PortSpec> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Look up a declared output port by name.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Returns `true` if any declared input port gathers a fan-out.
    #[must_use]
    pub fn has_gather_input(&self) -> bool {
        self.inputs.iter().any(PortSpec::is_gather)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortArity, PortType};

    fn step(key: &str) -> StepKey {
        StepKey::new(key).unwrap()
    }

    #[test]
    fn node_definition_new() {
        let id = NodeId::v4();
        let node = NodeDefinition::new(id, "resample", step("image_resample"));

        assert_eq!(node.id, id);
        assert_eq!(node.name, "resample");
        assert_eq!(node.step.as_str(), "image_resample");
        assert_eq!(node.step_version, Version::new(0, 1, 0));
        assert!(node.inputs.is_empty());
        assert!(node.outputs.is_empty());
        assert!(node.defaults.is_empty());
        assert!(node.mapper.is_none());
        assert!(node.retry_policy.is_none());
        assert!(node.timeout.is_none());
    }

    #[test]
    fn node_definition_builder_methods() {
        let id = NodeId::v4();
        let node = NodeDefinition::new(id, "sum", step("add"))
            .with_step_version(Version::new(1, 2, 0))
            .with_input(PortSpec::json("a"))
            .with_input(PortSpec::json("b"))
            .with_output(PortSpec::json("total"))
            .with_default("a", serde_json::json!([3, 4, 5]))
            .with_mapper(Mapper::input("a"))
            .with_retry(RetryConfig::fixed(3, 500))
            .with_timeout(Duration::from_secs(10))
            .with_description("Adds two numbers");

        assert_eq!(node.step_version, Version::new(1, 2, 0));
        assert_eq!(node.inputs.len(), 2);
        assert_eq!(node.outputs.len(), 1);
        assert!(node.mapper.is_some());
        assert!(node.retry_policy.is_some());
        assert_eq!(node.timeout, Some(Duration::from_secs(10)));
        assert_eq!(node.description.as_deref(), Some("Adds two numbers"));
    }

    #[test]
    fn port_lookup() {
        let node = NodeDefinition::new(NodeId::v4(), "n", step("s"))
            .with_input(PortSpec::file("image"))
            .with_output(PortSpec::json("stats"));

        let input = node.input("image").unwrap();
        assert_eq!(input.ty, PortType::File);
        assert!(node.input("missing").is_none());

        let output = node.output("stats").unwrap();
        assert_eq!(output.arity, PortArity::Single);
        assert!(node.output("image").is_none());
    }

    #[test]
    fn gather_input_detection() {
        let plain = NodeDefinition::new(NodeId::v4(), "n", step("s"))
            .with_input(PortSpec::json("x"));
        assert!(!plain.has_gather_input());

        let join = NodeDefinition::new(NodeId::v4(), "join", step("merge"))
            .with_input(PortSpec::gather("results"));
        assert!(join.has_gather_input());
    }

    #[test]
    fn node_definition_serde_roundtrip() {
        let id = NodeId::v4();
        let node = NodeDefinition::new(id, "transform", step("transform"))
            .with_input(PortSpec::json("input"))
            .with_default("input", serde_json::json!("data"))
            .with_mapper(Mapper::zip([Mapper::input("a"), Mapper::input("b")]))
            .with_timeout(Duration::from_secs(30));

        let json = serde_json::to_string(&node).unwrap();
        let back: NodeDefinition = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, id);
        assert_eq!(back.name, "transform");
        assert_eq!(back.timeout, Some(Duration::from_secs(30)));
        assert_eq!(back.defaults.len(), 1);
        assert_eq!(back.mapper, node.mapper);
    }
}
