//! Execution error types.

use thiserror::Error;

use crate::expand::ExpandError;
use crate::instance::InstanceId;
use crate::status::ExecutionStatus;

/// Errors that can occur during workflow execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A state transition is not valid for the current status.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Attempted target status.
        to: String,
    },

    /// A referenced instance does not exist in the execution state.
    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// The execution plan failed validation.
    #[error("plan validation: {0}")]
    PlanValidation(String),

    /// Mapper expansion failed.
    #[error("expansion: {0}")]
    Expansion(#[from] ExpandError),

    /// A serialization or deserialization error.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The execution was cancelled.
    #[error("execution cancelled")]
    Cancelled,
}

impl ExecutionError {
    /// Create an invalid-transition error from execution statuses.
    #[must_use]
    pub fn invalid_execution_transition(from: ExecutionStatus, to: ExecutionStatus) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
