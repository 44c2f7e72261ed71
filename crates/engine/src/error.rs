//! Engine error types.

use cascade_core::StepKey;
use cascade_execution::ExecutionError;
use thiserror::Error;

/// Errors from the engine layer.
///
/// Step failures are NOT engine errors: they are recorded per instance and
/// reported through the [`ExecutionReport`](crate::ExecutionReport). An
/// `EngineError` means the run could not proceed at all.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A node references a step key with no registered implementation.
    #[error("no step registered for key '{key}'")]
    StepNotRegistered {
        /// The unresolved key.
        key: StepKey,
    },

    /// Planning or expansion failed before execution started.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// An internal invariant was violated.
    #[error("internal engine error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_not_registered_display() {
        let err = EngineError::StepNotRegistered {
            key: StepKey::new("missing_tool").unwrap(),
        };
        assert_eq!(err.to_string(), "no step registered for key 'missing_tool'");
    }

    #[test]
    fn execution_error_is_wrapped() {
        let err = EngineError::from(ExecutionError::PlanValidation("no nodes".into()));
        assert!(err.to_string().contains("no nodes"));
    }

    #[test]
    fn internal_display() {
        let err = EngineError::Internal("lost instance".into());
        assert_eq!(err.to_string(), "internal engine error: lost instance");
    }
}
