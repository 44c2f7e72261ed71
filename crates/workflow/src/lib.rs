#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Cascade Workflow
//!
//! Workflow definition, port schemas, mapper expressions, and DAG validation
//! for the Cascade engine.
//!
//! This crate provides the types for defining workflows as directed acyclic
//! graphs (DAGs) of step nodes connected port-to-port. It includes:
//!
//! - [`WorkflowDefinition`] and supporting config types
//! - [`NodeDefinition`] with static [`PortSpec`] input/output schemas
//! - [`Mapper`] — the fan-out expression AST (product / zip / outer)
//! - [`Connection`] for port-to-port edges between nodes
//! - [`DependencyGraph`] (a `petgraph` wrapper) for topological sorting and
//!   cycle reporting
//! - [`WorkflowBuilder`] for fluent, validated construction
//! - [`validate_workflow`] for comprehensive multi-error validation
//! - [`NodeState`] for tracking execution progress

pub mod builder;
pub mod connection;
pub mod definition;
pub mod error;
pub mod graph;
pub mod mapper;
pub mod node;
pub mod port;
pub mod state;
pub mod validate;

pub use builder::WorkflowBuilder;
pub use connection::Connection;
pub use definition::{RetryConfig, WorkflowConfig, WorkflowDefinition};
pub use error::WorkflowError;
pub use graph::DependencyGraph;
pub use mapper::{AxisRef, Mapper};
pub use node::NodeDefinition;
pub use port::{PortArity, PortSpec, PortType};
pub use state::NodeState;
pub use validate::validate_workflow;

/// Serde helper for `Option<Duration>` serialized as milliseconds.
pub(crate) mod serde_duration_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serialize an `Option<Duration>` as an optional integer of milliseconds.
    pub fn serialize<S: Serializer>(duration: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => (d.as_millis() as u64).serialize(s),
            None => s.serialize_none(),
        }
    }

    /// Deserialize an optional integer of milliseconds into `Option<Duration>`.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let opt: Option<u64> = Option::deserialize(d)?;
        Ok(opt.map(Duration::from_millis))
    }
}
