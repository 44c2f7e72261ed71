//! Concrete node instances produced by expansion.
//!
//! A [`NodeInstance`] is one execution unit: a node definition bound to one
//! point in its expansion state-space, with every input port resolved to a
//! literal value or an upstream instance edge.

use std::collections::BTreeMap;
use std::fmt;

use cascade_core::NodeId;
use serde::{Deserialize, Serialize};

/// Identity of one expansion axis.
///
/// An axis is introduced by a node's mapper: either over one of its input
/// ports or as an explicit cross over an upstream sibling set. Downstream
/// instances inherit upstream axes, so the id carries the introducing node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AxisId {
    /// The node whose mapper introduced this axis.
    pub node_id: NodeId,
    /// Axis label, unique within the introducing node (usually the mapped
    /// input port name).
    pub label: String,
}

impl AxisId {
    /// Create an axis id.
    #[must_use]
    pub fn new(node_id: NodeId, label: impl Into<String>) -> Self {
        Self {
            node_id,
            label: label.into(),
        }
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.label, self.node_id)
    }
}

/// One assignment on one axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisAssignment {
    /// The axis.
    pub axis: AxisId,
    /// Zero-based index into the axis's cardinality.
    pub index: usize,
}

/// The position of an instance in its node's expansion state-space: an
/// ordered list of axis assignments, outermost axis first.
///
/// The state index is empty for nodes outside any fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateIndex(
    /// Axis assignments, outermost axis first.
    pub Vec<AxisAssignment>,
);

impl StateIndex {
    /// An empty state index (singleton instance).
    #[must_use]
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Returns `true` if this instance is not part of any fan-out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up the assignment on a given axis.
    #[must_use]
    pub fn index_on(&self, axis: &AxisId) -> Option<usize> {
        self.0.iter().find(|a| &a.axis == axis).map(|a| a.index)
    }
}

/// Deterministic identity of a node instance.
///
/// Composed from the owning node id and the state index, so re-expanding the
/// same workflow reproduces identical ids — the property resumable runs rely
/// on. Instances of an unexpanded node have the bare node id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    /// Derive the id for a node at a given state-space point.
    #[must_use]
    pub fn derive(node_id: NodeId, state_index: &StateIndex) -> Self {
        if state_index.is_empty() {
            return Self(node_id.to_string());
        }
        let assignments: Vec<String> = state_index
            .0
            .iter()
            .map(|a| {
                if a.axis.node_id == node_id {
                    format!("{}={}", a.axis.label, a.index)
                } else {
                    format!("{}@{}={}", a.axis.label, a.axis.node_id, a.index)
                }
            })
            .collect();
        Self(format!("{}[{}]", node_id, assignments.join(",")))
    }

    /// Get the underlying key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an instance's input port gets its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputSource {
    /// A literal value, from a default or a mapper axis binding.
    Literal {
        /// The bound value.
        value: serde_json::Value,
    },
    /// The output of a single upstream instance.
    Upstream {
        /// The producing instance.
        instance: InstanceId,
        /// The producing output port.
        port: String,
    },
    /// The ordered outputs of every sibling of an upstream fan-out
    /// (a gather port).
    Gather {
        /// The producing instances and ports, in expansion order.
        sources: Vec<(InstanceId, String)>,
    },
}

/// One concrete execution unit after expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
    /// Deterministic instance identity.
    pub id: InstanceId,
    /// The owning node definition.
    pub node_id: NodeId,
    /// Position in the expansion state-space.
    pub state_index: StateIndex,
    /// Resolved source for each bound input port. Ports absent here are
    /// presented to the step as missing.
    pub inputs: BTreeMap<String, InputSource>,
}

impl NodeInstance {
    /// Upstream instances this instance depends on, in deterministic order.
    #[must_use]
    pub fn upstream_instances(&self) -> Vec<&InstanceId> {
        let mut out = Vec::new();
        for source in self.inputs.values() {
            match source {
                InputSource::Literal { .. } => {}
                InputSource::Upstream { instance, .. } => out.push(instance),
                InputSource::Gather { sources } => {
                    out.extend(sources.iter().map(|(id, _)| id));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn singleton_instance_id_is_bare_node_id() {
        let node = NodeId::v4();
        let id = InstanceId::derive(node, &StateIndex::empty());
        assert_eq!(id.as_str(), node.to_string());
    }

    #[test]
    fn expanded_instance_id_carries_assignments() {
        let node = NodeId::v4();
        let index = StateIndex(vec![AxisAssignment {
            axis: AxisId::new(node, "a"),
            index: 2,
        }]);
        let id = InstanceId::derive(node, &index);
        assert_eq!(id.as_str(), format!("{node}[a=2]"));
    }

    #[test]
    fn inherited_axis_is_qualified_with_owner() {
        let upstream = NodeId::v4();
        let node = NodeId::v4();
        let index = StateIndex(vec![AxisAssignment {
            axis: AxisId::new(upstream, "a"),
            index: 0,
        }]);
        let id = InstanceId::derive(node, &index);
        assert_eq!(id.as_str(), format!("{node}[a@{upstream}=0]"));
    }

    #[test]
    fn derive_is_deterministic() {
        let node = NodeId::v4();
        let index = StateIndex(vec![
            AxisAssignment {
                axis: AxisId::new(node, "a"),
                index: 1,
            },
            AxisAssignment {
                axis: AxisId::new(node, "b"),
                index: 0,
            },
        ]);
        assert_eq!(
            InstanceId::derive(node, &index),
            InstanceId::derive(node, &index)
        );
    }

    #[test]
    fn state_index_lookup() {
        let node = NodeId::v4();
        let axis = AxisId::new(node, "a");
        let index = StateIndex(vec![AxisAssignment {
            axis: axis.clone(),
            index: 3,
        }]);
        assert_eq!(index.index_on(&axis), Some(3));
        assert_eq!(index.index_on(&AxisId::new(node, "b")), None);
    }

    #[test]
    fn upstream_instances_cover_all_source_kinds() {
        let node = NodeId::v4();
        let up_a = InstanceId::derive(NodeId::v4(), &StateIndex::empty());
        let up_b = InstanceId::derive(NodeId::v4(), &StateIndex::empty());
        let up_c = InstanceId::derive(NodeId::v4(), &StateIndex::empty());

        let mut inputs = BTreeMap::new();
        inputs.insert(
            "x".to_string(),
            InputSource::Literal {
                value: serde_json::json!(1),
            },
        );
        inputs.insert(
            "y".to_string(),
            InputSource::Upstream {
                instance: up_a.clone(),
                port: "out".into(),
            },
        );
        inputs.insert(
            "z".to_string(),
            InputSource::Gather {
                sources: vec![(up_b.clone(), "out".into()), (up_c.clone(), "out".into())],
            },
        );

        let instance = NodeInstance {
            id: InstanceId::derive(node, &StateIndex::empty()),
            node_id: node,
            state_index: StateIndex::empty(),
            inputs,
        };

        let upstream = instance.upstream_instances();
        assert_eq!(upstream, vec![&up_a, &up_b, &up_c]);
    }

    #[test]
    fn instance_serde_roundtrip() {
        let node = NodeId::v4();
        let index = StateIndex(vec![AxisAssignment {
            axis: AxisId::new(node, "a"),
            index: 1,
        }]);
        let instance = NodeInstance {
            id: InstanceId::derive(node, &index),
            node_id: node,
            state_index: index,
            inputs: BTreeMap::new(),
        };

        let json = serde_json::to_string(&instance).unwrap();
        let back: NodeInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, instance.id);
        assert_eq!(back.state_index, instance.state_index);
    }
}
