//! Execution result types.

use std::collections::HashMap;
use std::time::Duration;

use cascade_core::ExecutionId;
use cascade_execution::{ExecutionState, ExecutionStatus, InstanceId};
use cascade_workflow::NodeState;

use crate::step::StepOutputs;

/// The final result of a workflow execution: a partial-success report.
///
/// A run that had failures still completes; this report enumerates every
/// instance by outcome so callers can see exactly which subtrees succeeded,
/// which were served from the cache, and which failed or were blocked by an
/// upstream failure.
#[derive(Debug)]
pub struct ExecutionReport {
    /// Unique execution identifier.
    pub execution_id: ExecutionId,
    /// Final execution status.
    pub status: ExecutionStatus,
    /// Instances that executed successfully.
    pub completed: Vec<InstanceId>,
    /// Instances served from the run ledger without executing.
    pub cached: Vec<InstanceId>,
    /// Instances that executed and failed.
    pub failed: Vec<InstanceId>,
    /// Instances that never ran because an ancestor failed.
    pub blocked: Vec<InstanceId>,
    /// Instances cancelled before completion.
    pub cancelled: Vec<InstanceId>,
    /// Output values of successful instances (executed or cached).
    pub outputs: HashMap<InstanceId, StepOutputs>,
    /// Per-instance error messages for failed and blocked instances.
    pub errors: HashMap<InstanceId, String>,
    /// Wall-clock duration of the execution.
    pub duration: Duration,
}

impl ExecutionReport {
    /// Assemble a report from the final execution state and outputs.
    #[must_use]
    pub fn from_state(
        state: &ExecutionState,
        outputs: HashMap<InstanceId, StepOutputs>,
        duration: Duration,
    ) -> Self {
        let errors = state
            .instance_states
            .iter()
            .filter_map(|(id, s)| s.error_message.clone().map(|m| (id.clone(), m)))
            .collect();

        Self {
            execution_id: state.execution_id,
            status: state.status,
            completed: state.ids_in(NodeState::Completed),
            cached: state.ids_in(NodeState::Cached),
            failed: state.ids_in(NodeState::Failed),
            blocked: state.ids_in(NodeState::Blocked),
            cancelled: state.ids_in(NodeState::Cancelled),
            outputs,
            errors,
            duration,
        }
    }

    /// Whether every instance completed or was served from the cache.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether any instance failed or was blocked.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Get one output value of an instance.
    #[must_use]
    pub fn output(&self, instance: &InstanceId, port: &str) -> Option<&serde_json::Value> {
        self.outputs.get(instance).and_then(|o| o.get(port))
    }

    /// Total number of instances in the report.
    #[must_use]
    pub fn total_instances(&self) -> usize {
        self.completed.len()
            + self.cached.len()
            + self.failed.len()
            + self.blocked.len()
            + self.cancelled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::{NodeId, WorkflowId};
    use cascade_execution::StateIndex;
    use pretty_assertions::assert_eq;

    fn instance_id() -> InstanceId {
        InstanceId::derive(NodeId::v4(), &StateIndex::empty())
    }

    #[test]
    fn report_from_state_partitions_instances() {
        let done = instance_id();
        let cached = instance_id();
        let failed = instance_id();
        let blocked = instance_id();

        let mut state = ExecutionState::new(
            ExecutionId::v4(),
            WorkflowId::v4(),
            &[done.clone(), cached.clone(), failed.clone(), blocked.clone()],
        );
        state.transition_status(ExecutionStatus::Running).unwrap();

        state.transition_instance(&done, NodeState::Ready).unwrap();
        state.transition_instance(&done, NodeState::Running).unwrap();
        state
            .transition_instance(&done, NodeState::Completed)
            .unwrap();

        state.transition_instance(&cached, NodeState::Ready).unwrap();
        state
            .transition_instance(&cached, NodeState::Cached)
            .unwrap();

        state.transition_instance(&failed, NodeState::Ready).unwrap();
        state
            .transition_instance(&failed, NodeState::Running)
            .unwrap();
        state
            .transition_instance(&failed, NodeState::Failed)
            .unwrap();
        state
            .instance_states
            .get_mut(&failed)
            .unwrap()
            .error_message = Some("tool exited 1".into());

        state
            .transition_instance(&blocked, NodeState::Blocked)
            .unwrap();
        state.transition_status(ExecutionStatus::Failed).unwrap();

        let mut outputs = HashMap::new();
        outputs.insert(
            done.clone(),
            StepOutputs::from([("out".to_string(), serde_json::json!(7))]),
        );

        let report = ExecutionReport::from_state(&state, outputs, Duration::from_millis(40));

        assert_eq!(report.completed, vec![done.clone()]);
        assert_eq!(report.cached, vec![cached]);
        assert_eq!(report.failed, vec![failed.clone()]);
        assert_eq!(report.blocked, vec![blocked]);
        assert!(report.cancelled.is_empty());
        assert_eq!(report.total_instances(), 4);

        assert!(report.is_failure());
        assert!(!report.is_success());
        assert_eq!(report.output(&done, "out"), Some(&serde_json::json!(7)));
        assert!(report.errors[&failed].contains("tool exited 1"));
    }
}
