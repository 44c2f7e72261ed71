//! Execution state tracking for a run and its instances.

use std::collections::HashMap;

use cascade_core::{ExecutionId, WorkflowId};
use cascade_workflow::NodeState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::fingerprint::Fingerprint;
use crate::instance::InstanceId;
use crate::status::ExecutionStatus;
use crate::transition::{validate_execution_transition, validate_node_transition};

/// The execution state of a single instance within a running workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceExecutionState {
    /// Current state of the instance.
    pub state: NodeState,
    /// Content fingerprint, computed when the instance became ready.
    #[serde(default)]
    pub fingerprint: Option<Fingerprint>,
    /// Number of submission attempts (infrastructure retries included).
    pub attempts: u32,
    /// Error message if the instance failed or was blocked.
    #[serde(default)]
    pub error_message: Option<String>,
    /// When this instance became ready.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When this instance started executing.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When this instance reached a terminal state.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl InstanceExecutionState {
    /// Create a new instance state in the Pending state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: NodeState::Pending,
            fingerprint: None,
            attempts: 0,
            error_message: None,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Transition to a new state, validating the transition.
    pub fn transition_to(&mut self, new_state: NodeState) -> Result<(), ExecutionError> {
        validate_node_transition(self.state, new_state)?;
        self.state = new_state;

        if new_state == NodeState::Ready {
            self.scheduled_at = Some(Utc::now());
        }
        if new_state == NodeState::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if new_state.is_terminal() {
            self.completed_at = Some(Utc::now());
        }

        Ok(())
    }
}

impl Default for InstanceExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

/// The complete execution state of a running workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Unique identifier for this execution.
    pub execution_id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// Current execution status.
    pub status: ExecutionStatus,
    /// Per-instance execution states.
    pub instance_states: HashMap<InstanceId, InstanceExecutionState>,
    /// Optimistic concurrency version (bumped on each state change).
    pub version: u64,
    /// When the execution was created.
    pub created_at: DateTime<Utc>,
    /// When the execution was last updated.
    pub updated_at: DateTime<Utc>,
    /// When the execution started running.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution completed.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    /// Create a new execution state with every instance Pending.
    #[must_use]
    pub fn new(
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        instance_ids: &[InstanceId],
    ) -> Self {
        let now = Utc::now();
        let mut instance_states = HashMap::new();
        for id in instance_ids {
            instance_states.insert(id.clone(), InstanceExecutionState::new());
        }

        Self {
            execution_id,
            workflow_id,
            status: ExecutionStatus::Created,
            instance_states,
            version: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Get an instance's execution state.
    #[must_use]
    pub fn instance_state(&self, id: &InstanceId) -> Option<&InstanceExecutionState> {
        self.instance_states.get(id)
    }

    /// The current state of an instance, if tracked.
    #[must_use]
    pub fn state_of(&self, id: &InstanceId) -> Option<NodeState> {
        self.instance_states.get(id).map(|s| s.state)
    }

    /// Transition an instance, validating the transition and bumping the
    /// state version.
    pub fn transition_instance(
        &mut self,
        id: &InstanceId,
        new_state: NodeState,
    ) -> Result<(), ExecutionError> {
        let instance = self
            .instance_states
            .get_mut(id)
            .ok_or_else(|| ExecutionError::InstanceNotFound(id.clone()))?;
        instance.transition_to(new_state)?;
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Returns `true` if all instances are in terminal states.
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.instance_states.values().all(|s| s.state.is_terminal())
    }

    /// Ids of all instances currently in the given state, sorted for
    /// deterministic reporting.
    #[must_use]
    pub fn ids_in(&self, state: NodeState) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self
            .instance_states
            .iter()
            .filter(|(_, s)| s.state == state)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of instances currently in the given state.
    #[must_use]
    pub fn count_in(&self, state: NodeState) -> usize {
        self.instance_states
            .values()
            .filter(|s| s.state == state)
            .count()
    }

    /// Transition the execution status, validating the transition and bumping the version.
    pub fn transition_status(&mut self, new_status: ExecutionStatus) -> Result<(), ExecutionError> {
        validate_execution_transition(self.status, new_status)?;
        self.status = new_status;
        self.version += 1;
        self.updated_at = Utc::now();

        if new_status == ExecutionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if new_status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::NodeId;
    use crate::instance::StateIndex;

    fn instance_id() -> InstanceId {
        InstanceId::derive(NodeId::v4(), &StateIndex::empty())
    }

    fn make_state() -> (ExecutionState, InstanceId, InstanceId) {
        let i1 = instance_id();
        let i2 = instance_id();
        let state = ExecutionState::new(
            ExecutionId::v4(),
            WorkflowId::v4(),
            &[i1.clone(), i2.clone()],
        );
        (state, i1, i2)
    }

    #[test]
    fn new_execution_state() {
        let (state, i1, _i2) = make_state();
        assert_eq!(state.status, ExecutionStatus::Created);
        assert_eq!(state.version, 0);
        assert_eq!(state.instance_states.len(), 2);
        assert_eq!(state.state_of(&i1), Some(NodeState::Pending));
    }

    #[test]
    fn instance_transition_happy_path() {
        let (mut state, i1, _i2) = make_state();
        state.transition_instance(&i1, NodeState::Ready).unwrap();
        state.transition_instance(&i1, NodeState::Running).unwrap();
        state
            .transition_instance(&i1, NodeState::Completed)
            .unwrap();

        let instance = state.instance_state(&i1).unwrap();
        assert!(instance.scheduled_at.is_some());
        assert!(instance.started_at.is_some());
        assert!(instance.completed_at.is_some());
        assert_eq!(state.version, 3);
    }

    #[test]
    fn cached_fast_path_sets_completed_at() {
        let (mut state, i1, _i2) = make_state();
        state.transition_instance(&i1, NodeState::Ready).unwrap();
        state.transition_instance(&i1, NodeState::Cached).unwrap();

        let instance = state.instance_state(&i1).unwrap();
        assert!(instance.completed_at.is_some());
        assert!(instance.started_at.is_none());
    }

    #[test]
    fn invalid_instance_transition() {
        let (mut state, i1, _i2) = make_state();
        let err = state
            .transition_instance(&i1, NodeState::Completed)
            .unwrap_err();
        assert!(err.to_string().contains("invalid transition"));
        assert_eq!(state.version, 0); // version not bumped
    }

    #[test]
    fn unknown_instance_transition() {
        let (mut state, _i1, _i2) = make_state();
        let ghost = instance_id();
        let err = state
            .transition_instance(&ghost, NodeState::Ready)
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InstanceNotFound(_)));
    }

    #[test]
    fn all_terminal() {
        let (mut state, i1, i2) = make_state();
        assert!(!state.all_terminal());

        state.transition_instance(&i1, NodeState::Ready).unwrap();
        state.transition_instance(&i1, NodeState::Cached).unwrap();
        state.transition_instance(&i2, NodeState::Blocked).unwrap();
        assert!(state.all_terminal());
    }

    #[test]
    fn ids_in_and_count_in() {
        let (mut state, i1, i2) = make_state();
        state.transition_instance(&i1, NodeState::Ready).unwrap();

        assert_eq!(state.ids_in(NodeState::Ready), vec![i1]);
        assert_eq!(state.count_in(NodeState::Pending), 1);
        assert_eq!(state.ids_in(NodeState::Pending), vec![i2]);
    }

    #[test]
    fn transition_status_valid() {
        let (mut state, _i1, _i2) = make_state();
        assert!(state.transition_status(ExecutionStatus::Running).is_ok());
        assert_eq!(state.status, ExecutionStatus::Running);
        assert!(state.started_at.is_some());
    }

    #[test]
    fn transition_status_invalid() {
        let (mut state, _i1, _i2) = make_state();
        let err = state
            .transition_status(ExecutionStatus::Completed)
            .unwrap_err();
        assert!(err.to_string().contains("invalid transition"));
    }

    #[test]
    fn transition_status_terminal_sets_completed_at() {
        let (mut state, _i1, _i2) = make_state();
        state.transition_status(ExecutionStatus::Running).unwrap();
        state.transition_status(ExecutionStatus::Completed).unwrap();
        assert!(state.completed_at.is_some());
    }

    #[test]
    fn serde_roundtrip() {
        let (state, _i1, _i2) = make_state();
        let json = serde_json::to_string(&state).unwrap();
        let back: ExecutionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.execution_id, state.execution_id);
        assert_eq!(back.workflow_id, state.workflow_id);
        assert_eq!(back.status, state.status);
        assert_eq!(back.instance_states.len(), state.instance_states.len());
    }
}
