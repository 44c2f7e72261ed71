//! The workflow engine facade.
//!
//! Ties the pieces together: validate → expand → schedule → report. The
//! engine owns no global state; the registry, ledger, and executor are
//! injected at construction so runs are isolated and testable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use cascade_core::ExecutionId;
use cascade_execution::{ExecutionPlan, RunLedger};
use cascade_workflow::WorkflowDefinition;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::executor::Executor;
use crate::result::ExecutionReport;
use crate::scheduler::Scheduler;
use crate::step::StepRegistry;

/// The workflow execution engine.
///
/// Orchestrates end-to-end execution of workflow definitions by:
///
/// 1. Checking every node's step key against the registry
/// 2. Building the execution plan (expansion + instance DAG)
/// 3. Scheduling instances readiness-first with ledger memoization
/// 4. Dispatching cache misses to the configured executor backend
/// 5. Reporting per-instance outcomes
pub struct WorkflowEngine {
    registry: Arc<StepRegistry>,
    ledger: Arc<RunLedger>,
    executor: Arc<dyn Executor>,
    workdir_root: Option<PathBuf>,
}

impl WorkflowEngine {
    /// Create an engine from its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<StepRegistry>,
        ledger: Arc<RunLedger>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            registry,
            ledger,
            executor,
            workdir_root: None,
        }
    }

    /// Give instances scratch directories under the given root.
    #[must_use]
    pub fn with_workdir_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workdir_root = Some(root.into());
        self
    }

    /// Access the step registry.
    #[must_use]
    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Execute a workflow from start to finish.
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
    ) -> Result<ExecutionReport, EngineError> {
        self.execute_with_cancellation(workflow, CancellationToken::new())
            .await
    }

    /// Execute a workflow, stopping early if the token is cancelled.
    ///
    /// Cancellation is cooperative: in-flight instances are signalled and
    /// drained, pending instances are marked cancelled, and already-recorded
    /// ledger entries are untouched.
    pub async fn execute_with_cancellation(
        &self,
        workflow: &WorkflowDefinition,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport, EngineError> {
        let started = Instant::now();
        let execution_id = ExecutionId::v4();

        // Fail fast on unregistered steps before anything is planned.
        for node in &workflow.nodes {
            if !self.registry.contains(&node.step) {
                return Err(EngineError::StepNotRegistered {
                    key: node.step.clone(),
                });
            }
        }

        let plan = ExecutionPlan::from_workflow(workflow)?;

        let scheduler = Scheduler::new(
            workflow,
            &plan,
            &self.registry,
            self.executor.clone(),
            &self.ledger,
            cancel,
            self.workdir_root.clone(),
            execution_id,
        );
        let (state, outputs) = scheduler.run().await?;

        Ok(ExecutionReport::from_state(
            &state,
            outputs,
            started.elapsed(),
        ))
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("registry", &self.registry)
            .field("workdir_root", &self.workdir_root)
            .finish_non_exhaustive()
    }
}
