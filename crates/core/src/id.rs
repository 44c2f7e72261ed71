//! Unique identifiers for Cascade entities.
//!
//! This module provides strongly-typed UUID identifiers using
//! [`domain-key`](https://crates.io/crates/domain-key) `Uuid<D>` wrappers.
//! Each identifier type is parameterized by a unique domain marker, so a
//! [`NodeId`] can never be passed where a [`WorkflowId`] is expected.
//!
//! All ID types are `Copy` (16 bytes, stack-allocated) and support:
//! - `v4()` for random UUID generation
//! - `nil()` for zero-valued default
//! - `parse(&str)` for string parsing
//! - Full serde support (serializes as UUID string)
//! - `Display`, `FromStr`, `Eq`, `Ord`, `Hash`

use domain_key::define_uuid;

// Re-export for downstream parse error handling
pub use domain_key::UuidParseError;

// Entity identifiers — UUID-based, Copy, 16 bytes each
define_uuid!(pub WorkflowIdDomain => WorkflowId);
define_uuid!(pub ExecutionIdDomain => ExecutionId);
define_uuid!(pub NodeIdDomain => NodeId);
define_uuid!(pub StepIdDomain => StepId);
