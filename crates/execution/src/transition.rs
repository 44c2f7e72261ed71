//! State machine transition validation for execution and instance states.

use cascade_workflow::NodeState;

use crate::error::ExecutionError;
use crate::status::ExecutionStatus;

/// Returns `true` if the execution-level transition from `from` to `to` is valid.
#[must_use]
pub fn can_transition_execution(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    matches!(
        (from, to),
        (ExecutionStatus::Created, ExecutionStatus::Running)
            | (ExecutionStatus::Running, ExecutionStatus::Cancelling)
            | (ExecutionStatus::Running, ExecutionStatus::Completed)
            | (ExecutionStatus::Running, ExecutionStatus::Failed)
            | (ExecutionStatus::Cancelling, ExecutionStatus::Cancelled)
            | (ExecutionStatus::Cancelling, ExecutionStatus::Failed)
    )
}

/// Validate an execution-level transition, returning an error if invalid.
pub fn validate_execution_transition(
    from: ExecutionStatus,
    to: ExecutionStatus,
) -> Result<(), ExecutionError> {
    if can_transition_execution(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::invalid_execution_transition(from, to))
    }
}

/// Returns `true` if the instance-level transition from `from` to `to` is valid.
///
/// The happy path is `Pending → Ready → Running → Completed`, with
/// `Ready → Cached` as the fast path on a ledger hit. `Blocked` is reached
/// when an ancestor fails or is blocked; `Cancelled` is reachable from any
/// non-terminal state.
#[must_use]
pub fn can_transition_node(from: NodeState, to: NodeState) -> bool {
    matches!(
        (from, to),
        (NodeState::Pending, NodeState::Ready)
            | (NodeState::Pending, NodeState::Blocked)
            | (NodeState::Pending, NodeState::Cancelled)
            | (NodeState::Ready, NodeState::Running)
            | (NodeState::Ready, NodeState::Cached)
            | (NodeState::Ready, NodeState::Blocked)
            | (NodeState::Ready, NodeState::Cancelled)
            | (NodeState::Running, NodeState::Completed)
            | (NodeState::Running, NodeState::Failed)
            | (NodeState::Running, NodeState::Cancelled)
    )
}

/// Validate an instance-level transition, returning an error if invalid.
pub fn validate_node_transition(from: NodeState, to: NodeState) -> Result<(), ExecutionError> {
    if can_transition_node(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ExecutionStatus::Created, ExecutionStatus::Running)]
    #[case(ExecutionStatus::Running, ExecutionStatus::Completed)]
    #[case(ExecutionStatus::Running, ExecutionStatus::Failed)]
    #[case(ExecutionStatus::Running, ExecutionStatus::Cancelling)]
    #[case(ExecutionStatus::Cancelling, ExecutionStatus::Cancelled)]
    #[case(ExecutionStatus::Cancelling, ExecutionStatus::Failed)]
    fn valid_execution_transitions(#[case] from: ExecutionStatus, #[case] to: ExecutionStatus) {
        assert!(can_transition_execution(from, to));
        assert!(validate_execution_transition(from, to).is_ok());
    }

    #[rstest]
    #[case(ExecutionStatus::Created, ExecutionStatus::Completed)]
    #[case(ExecutionStatus::Completed, ExecutionStatus::Running)]
    #[case(ExecutionStatus::Cancelled, ExecutionStatus::Running)]
    #[case(ExecutionStatus::Created, ExecutionStatus::Created)]
    fn invalid_execution_transitions(#[case] from: ExecutionStatus, #[case] to: ExecutionStatus) {
        assert!(!can_transition_execution(from, to));
        let err = validate_execution_transition(from, to).unwrap_err();
        assert!(err.to_string().contains("invalid transition"));
    }

    #[rstest]
    #[case(NodeState::Pending, NodeState::Ready)]
    #[case(NodeState::Pending, NodeState::Blocked)]
    #[case(NodeState::Pending, NodeState::Cancelled)]
    #[case(NodeState::Ready, NodeState::Running)]
    #[case(NodeState::Ready, NodeState::Cached)]
    #[case(NodeState::Ready, NodeState::Blocked)]
    #[case(NodeState::Ready, NodeState::Cancelled)]
    #[case(NodeState::Running, NodeState::Completed)]
    #[case(NodeState::Running, NodeState::Failed)]
    #[case(NodeState::Running, NodeState::Cancelled)]
    fn valid_node_transitions(#[case] from: NodeState, #[case] to: NodeState) {
        assert!(can_transition_node(from, to));
        assert!(validate_node_transition(from, to).is_ok());
    }

    #[rstest]
    #[case(NodeState::Pending, NodeState::Running)]
    #[case(NodeState::Pending, NodeState::Cached)]
    #[case(NodeState::Pending, NodeState::Completed)]
    #[case(NodeState::Running, NodeState::Cached)]
    #[case(NodeState::Completed, NodeState::Running)]
    #[case(NodeState::Cached, NodeState::Running)]
    #[case(NodeState::Failed, NodeState::Running)]
    #[case(NodeState::Blocked, NodeState::Ready)]
    #[case(NodeState::Cancelled, NodeState::Ready)]
    fn invalid_node_transitions(#[case] from: NodeState, #[case] to: NodeState) {
        assert!(!can_transition_node(from, to));
        assert!(validate_node_transition(from, to).is_err());
    }
}
