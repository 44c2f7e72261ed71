#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Cascade Execution
//!
//! Instance expansion, execution plans, fingerprints, and the run ledger for
//! the Cascade workflow engine.
//!
//! This crate models execution-time concepts — it does NOT contain the
//! scheduler or executors. It defines:
//!
//! - [`NodeInstance`], [`InstanceId`], [`StateIndex`] — concrete execution
//!   units with deterministic identity
//! - [`expand`](expand::expand) — mapper expansion (product / zip / outer,
//!   gather edges, empty propagation)
//! - [`ExecutionPlan`] — the frozen instance DAG for one run
//! - [`Fingerprint`] — content-addressed cache keys with canonical
//!   serialization
//! - [`RunRecord`] and [`RunLedger`] — the persisted, resumable memoization
//!   store
//! - [`ExecutionState`] and [`ExecutionStatus`] — validated state machines
//!   for the run and its instances

pub mod error;
pub mod expand;
pub mod fingerprint;
pub mod instance;
pub mod ledger;
pub mod plan;
pub mod state;
pub mod status;
pub mod transition;

pub use error::ExecutionError;
pub use expand::ExpandError;
pub use fingerprint::{Fingerprint, FingerprintInput, canonical_json, hash_file};
pub use instance::{AxisAssignment, AxisId, InputSource, InstanceId, NodeInstance, StateIndex};
pub use ledger::{RunLedger, RunRecord};
pub use plan::ExecutionPlan;
pub use state::{ExecutionState, InstanceExecutionState};
pub use status::ExecutionStatus;
