#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Cascade Core
//!
//! Core identifier and key types for the Cascade workflow engine.
//! This crate provides the fundamental building blocks used by all other
//! Cascade crates.
//!
//! ## Key Components
//!
//! - **Identifiers**: [`WorkflowId`], [`ExecutionId`], [`NodeId`], [`StepId`]
//!   — strongly-typed UUIDs that cannot be mixed up at compile time
//! - **Registry keys**: [`StepKey`] — normalized string keys that bind
//!   workflow nodes to step implementations
//! - **Versioning**: [`Version`] (re-exported from `semver`) for workflow
//!   and step versions, which participate in cache fingerprints

pub mod id;
pub mod keys;

pub use id::{ExecutionId, NodeId, StepId, UuidParseError, WorkflowId};
pub use keys::{StepKey, StepKeyError};

pub use semver::Version;
