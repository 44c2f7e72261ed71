//! Mapper expressions: declarative fan-out rules for workflow nodes.
//!
//! A mapper describes how a node's multi-valued inputs expand into multiple
//! concrete instances. It is a small tagged AST built once at definition
//! time; the expander interprets it, nothing re-parses strings at run time.

use cascade_core::NodeId;
use serde::{Deserialize, Serialize};

/// A reference to one expansion axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AxisRef {
    /// One of the node's own input ports, whose default value must be a
    /// JSON array — each element becomes one point on the axis.
    Input {
        /// The input port name.
        port: String,
    },
    /// The sibling set of an upstream expanded node.
    Node {
        /// The upstream node whose expansion this axis follows.
        node_id: NodeId,
    },
}

/// A mapper expression over one or more axes.
///
/// Three combination policies are supported:
///
/// - [`Mapper::Product`] — independent axes; the instance set is their
///   Cartesian product, enumerated row-major with the outermost axis first.
/// - [`Mapper::Zip`] — synchronized axes; elements are paired positionally
///   and mismatched lengths are an expansion error.
/// - [`Mapper::Outer`] — an explicit full cross, forcing a Cartesian
///   product even when an operand is derived from an upstream expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mapper {
    /// A single axis.
    Axis {
        /// The referenced axis.
        axis: AxisRef,
    },
    /// Independent combination: Cartesian product of the operand axes.
    Product {
        /// The independent operands.
        axes: Vec<Mapper>,
    },
    /// Synchronized combination: positional pairing of equal-length axes.
    Zip {
        /// The synchronized operands.
        axes: Vec<Mapper>,
    },
    /// Explicit outer product, crossing operands that would otherwise be
    /// inherited element-wise from an upstream expansion.
    Outer {
        /// The crossed operands.
        axes: Vec<Mapper>,
    },
}

impl Mapper {
    /// An axis over one of the node's own input ports.
    #[must_use]
    pub fn input(port: impl Into<String>) -> Self {
        Self::Axis {
            axis: AxisRef::Input { port: port.into() },
        }
    }

    /// An axis over an upstream node's sibling set.
    #[must_use]
    pub fn node(node_id: NodeId) -> Self {
        Self::Axis {
            axis: AxisRef::Node { node_id },
        }
    }

    /// Independent product of the given operands.
    #[must_use]
    pub fn product(axes: impl IntoIterator<Item = Mapper>) -> Self {
        Self::Product {
            axes: axes.into_iter().collect(),
        }
    }

    /// Synchronized zip of the given operands.
    #[must_use]
    pub fn zip(axes: impl IntoIterator<Item = Mapper>) -> Self {
        Self::Zip {
            axes: axes.into_iter().collect(),
        }
    }

    /// Explicit outer product of the given operands.
    #[must_use]
    pub fn outer(axes: impl IntoIterator<Item = Mapper>) -> Self {
        Self::Outer {
            axes: axes.into_iter().collect(),
        }
    }

    /// All input port names referenced anywhere in this expression.
    #[must_use]
    pub fn referenced_inputs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_inputs(&mut out);
        out
    }

    /// All upstream node ids referenced anywhere in this expression.
    #[must_use]
    pub fn referenced_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_nodes(&mut out);
        out
    }

    fn collect_inputs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Axis {
                axis: AxisRef::Input { port },
            } => out.push(port),
            Self::Axis { .. } => {}
            Self::Product { axes } | Self::Zip { axes } | Self::Outer { axes } => {
                for axis in axes {
                    axis.collect_inputs(out);
                }
            }
        }
    }

    fn collect_nodes(&self, out: &mut Vec<NodeId>) {
        match self {
            Self::Axis {
                axis: AxisRef::Node { node_id },
            } => out.push(*node_id),
            Self::Axis { .. } => {}
            Self::Product { axes } | Self::Zip { axes } | Self::Outer { axes } => {
                for axis in axes {
                    axis.collect_nodes(out);
                }
            }
        }
    }
}
