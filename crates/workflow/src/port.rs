//! Static input/output port schemas for workflow nodes.
//!
//! Every node declares its ports up front; the graph builder validates
//! connections against these declarations instead of discovering them at
//! runtime.

use serde::{Deserialize, Serialize};

/// The value kind a port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    /// An arbitrary JSON value, passed by value between nodes.
    #[default]
    Json,
    /// A filesystem path. File ports are fingerprinted by content, not path.
    File,
}

/// How many upstream values a port consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PortArity {
    /// Exactly one value from a single upstream instance.
    #[default]
    Single,
    /// The ordered collection of every sibling instance of an upstream
    /// fan-out. A gather port is the join-node mechanism: the instance
    /// carrying it barrier-waits on all siblings.
    Gather,
}

/// Declaration of one named input or output port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port name, unique among the node's ports of the same direction.
    pub name: String,
    /// The value kind this port carries.
    #[serde(default)]
    pub ty: PortType,
    /// Single-value or gathering port.
    #[serde(default)]
    pub arity: PortArity,
}

impl PortSpec {
    /// Declare a single-valued JSON port.
    #[must_use]
    pub fn json(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: PortType::Json,
            arity: PortArity::Single,
        }
    }

    /// Declare a single-valued file port.
    #[must_use]
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: PortType::File,
            arity: PortArity::Single,
        }
    }

    /// Declare a gathering JSON port (consumes an entire fan-out).
    #[must_use]
    pub fn gather(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: PortType::Json,
            arity: PortArity::Gather,
        }
    }

    /// Returns `true` if this port gathers a fan-out.
    #[must_use]
    pub fn is_gather(&self) -> bool {
        self.arity == PortArity::Gather
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_port_defaults() {
        let port = PortSpec::json("volume");
        assert_eq!(port.name, "volume");
        assert_eq!(port.ty, PortType::Json);
        assert_eq!(port.arity, PortArity::Single);
        assert!(!port.is_gather());
    }

    #[test]
    fn file_port() {
        let port = PortSpec::file("image");
        assert_eq!(port.ty, PortType::File);
        assert_eq!(port.arity, PortArity::Single);
    }

    #[test]
    fn gather_port() {
        let port = PortSpec::gather("results");
        assert!(port.is_gather());
    }

    #[test]
    fn serde_defaults_fill_in() {
        let port: PortSpec = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert_eq!(port.ty, PortType::Json);
        assert_eq!(port.arity, PortArity::Single);
    }

    #[test]
    fn serde_roundtrip() {
        let port = PortSpec::gather("collected");
        let json = serde_json::to_string(&port).unwrap();
        let back: PortSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(port, back);
    }
}
