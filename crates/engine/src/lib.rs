#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Cascade Engine
//!
//! Scheduler, step contract, and pluggable executor backends for the
//! Cascade workflow engine.
//!
//! The engine consumes a validated [`WorkflowDefinition`]
//! (`cascade-workflow`), expands it into an instance plan
//! (`cascade-execution`), and drives every instance to a terminal state:
//!
//! - [`Step`] / [`StepRegistry`] — the black-box contract for executable
//!   work
//! - [`Executor`] — the uniform submission contract, with
//!   [`SerialExecutor`], [`WorkerPoolExecutor`], and [`ClusterExecutor`]
//!   backends
//! - [`WorkflowEngine`] — the validate → expand → schedule → report facade
//! - [`ExecutionReport`] — the partial-success outcome of one run
//!
//! [`WorkflowDefinition`]: cascade_workflow::WorkflowDefinition

pub mod engine;
pub mod error;
pub mod executor;
pub mod result;
mod scheduler;
pub mod step;

pub use engine::WorkflowEngine;
pub use error::EngineError;
pub use executor::{
    ClusterExecutor, Executor, SerialExecutor, SpoolRequest, SpoolResponse, SpoolWorker,
    StepInvocation, WorkerPoolExecutor, submit_with_retry,
};
pub use result::ExecutionReport;
pub use step::{Step, StepContext, StepError, StepInputs, StepOutputs, StepRegistry};
