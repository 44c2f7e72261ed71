//! The readiness-driven scheduler.
//!
//! The scheduler is single-writer over run state: one loop promotes
//! instances through their state machine, consults the ledger, and hands
//! cache misses to the executor. Many instances may be running concurrently
//! through the executor; completions are drained through a [`JoinSet`] and
//! each one re-evaluates readiness.
//!
//! Failure is local: a failed instance blocks its descendants and nothing
//! else. Independent branches and fan-out siblings keep running.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use cascade_core::ExecutionId;
use cascade_execution::{
    ExecutionPlan, ExecutionState, ExecutionStatus, Fingerprint, FingerprintInput, InputSource,
    InstanceId, NodeInstance, RunLedger, RunRecord, hash_file,
};
use cascade_workflow::{NodeDefinition, NodeState, PortType, RetryConfig, WorkflowDefinition};
use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::executor::{Executor, StepInvocation, submit_with_retry};
use crate::step::{Step, StepContext, StepError, StepInputs, StepOutputs, StepRegistry};

type TaskOutcome = (InstanceId, u32, Result<StepOutputs, StepError>);

pub(crate) struct Scheduler<'a> {
    definition: &'a WorkflowDefinition,
    plan: &'a ExecutionPlan,
    registry: &'a StepRegistry,
    executor: Arc<dyn Executor>,
    ledger: &'a RunLedger,
    cancel: CancellationToken,
    workdir_root: Option<PathBuf>,
    execution_id: ExecutionId,

    state: ExecutionState,
    outputs: HashMap<InstanceId, StepOutputs>,
    fingerprints: HashMap<InstanceId, Fingerprint>,
    /// Fingerprints with an execution in flight, and the owning instance.
    running: HashMap<Fingerprint, InstanceId>,
    /// Ready instances waiting on an identical in-flight fingerprint.
    waiters: HashMap<Fingerprint, Vec<InstanceId>>,
    tasks: JoinSet<TaskOutcome>,
    cancelling: bool,
}

impl<'a> Scheduler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        definition: &'a WorkflowDefinition,
        plan: &'a ExecutionPlan,
        registry: &'a StepRegistry,
        executor: Arc<dyn Executor>,
        ledger: &'a RunLedger,
        cancel: CancellationToken,
        workdir_root: Option<PathBuf>,
        execution_id: ExecutionId,
    ) -> Self {
        let ids: Vec<InstanceId> = plan.instances().iter().map(|i| i.id.clone()).collect();
        let state = ExecutionState::new(execution_id, plan.workflow_id, &ids);

        Self {
            definition,
            plan,
            registry,
            executor,
            ledger,
            cancel,
            workdir_root,
            execution_id,
            state,
            outputs: HashMap::new(),
            fingerprints: HashMap::new(),
            running: HashMap::new(),
            waiters: HashMap::new(),
            tasks: JoinSet::new(),
            cancelling: false,
        }
    }

    /// Drive the run to completion.
    pub(crate) async fn run(
        mut self,
    ) -> Result<(ExecutionState, HashMap<InstanceId, StepOutputs>), EngineError> {
        self.state.transition_status(ExecutionStatus::Running)?;
        tracing::info!(
            execution = %self.execution_id,
            workflow = %self.plan.workflow_id,
            instances = self.plan.len(),
            "execution started"
        );

        loop {
            if self.cancel.is_cancelled() && !self.cancelling {
                self.begin_cancellation()?;
            }

            let progressed = if self.cancelling {
                false
            } else {
                self.schedule_ready()?
            };

            if self.state.all_terminal() {
                break;
            }

            if !progressed {
                match self.tasks.join_next().await {
                    Some(joined) => self.handle_joined(joined)?,
                    None if self.state.all_terminal() => break,
                    None => {
                        // Nothing runnable, nothing in flight, instances left:
                        // cannot happen on a validated DAG, but never hang.
                        tracing::error!(
                            execution = %self.execution_id,
                            "scheduler stranded with non-terminal instances"
                        );
                        self.mark_stranded()?;
                        break;
                    }
                }
            }
        }

        let final_status = self.final_status();
        self.state.transition_status(final_status)?;
        tracing::info!(
            execution = %self.execution_id,
            status = %final_status,
            completed = self.state.count_in(NodeState::Completed),
            cached = self.state.count_in(NodeState::Cached),
            failed = self.state.count_in(NodeState::Failed),
            blocked = self.state.count_in(NodeState::Blocked),
            "execution finished"
        );

        Ok((self.state, self.outputs))
    }

    /// One readiness pass over the plan. Returns `true` if any instance
    /// changed state.
    fn schedule_ready(&mut self) -> Result<bool, EngineError> {
        let mut progressed = false;

        for instance in self.plan.instances() {
            if self.state.state_of(&instance.id) != Some(NodeState::Pending) {
                continue;
            }

            let predecessors = self.plan.predecessors(&instance.id);
            let mut blocked_by = None;
            let mut all_done = true;
            for pred in &predecessors {
                match self.state.state_of(pred) {
                    Some(state) if state.is_success() => {}
                    Some(NodeState::Failed | NodeState::Blocked | NodeState::Cancelled) => {
                        blocked_by = Some(pred.clone());
                        break;
                    }
                    _ => {
                        all_done = false;
                        break;
                    }
                }
            }

            if let Some(upstream) = blocked_by {
                self.state
                    .transition_instance(&instance.id, NodeState::Blocked)?;
                if let Some(s) = self.state.instance_states.get_mut(&instance.id) {
                    s.error_message = Some(format!("upstream instance {upstream} did not complete"));
                }
                tracing::debug!(instance = %instance.id, %upstream, "instance blocked");
                progressed = true;
            } else if all_done {
                self.promote_ready(instance)?;
                progressed = true;
            }
        }

        Ok(progressed)
    }

    /// Promote one Pending instance: resolve inputs, fingerprint, check the
    /// cache, and submit on a miss.
    fn promote_ready(&mut self, instance: &NodeInstance) -> Result<(), EngineError> {
        let node = self
            .definition
            .node(instance.node_id)
            .ok_or_else(|| EngineError::Internal(format!("unknown node {}", instance.node_id)))?;
        let step = self
            .registry
            .get(&node.step)
            .ok_or_else(|| EngineError::StepNotRegistered {
                key: node.step.clone(),
            })?;

        self.state
            .transition_instance(&instance.id, NodeState::Ready)?;

        let resolved = match self.resolve_inputs(instance, node) {
            Ok(resolved) => resolved,
            Err(error) => {
                // Input resolution failed (unreadable file, missing upstream
                // output). The instance fails without a submission.
                self.state
                    .transition_instance(&instance.id, NodeState::Running)?;
                self.state
                    .transition_instance(&instance.id, NodeState::Failed)?;
                if let Some(s) = self.state.instance_states.get_mut(&instance.id) {
                    s.error_message = Some(error.to_string());
                }
                tracing::warn!(instance = %instance.id, %error, "input resolution failed");
                return Ok(());
            }
        };

        let fingerprint = Fingerprint::compute(&FingerprintInput {
            step: &node.step,
            step_version: &node.step_version,
            literals: &resolved.canonical_literals,
            upstream: &resolved.upstream_fingerprints,
        });
        self.fingerprints
            .insert(instance.id.clone(), fingerprint.clone());
        if let Some(s) = self.state.instance_states.get_mut(&instance.id) {
            s.fingerprint = Some(fingerprint.clone());
        }

        let deterministic = step.deterministic();

        if deterministic
            && let Some(record) = self.ledger.cached(&fingerprint)
        {
            tracing::info!(
                instance = %instance.id,
                fingerprint = %fingerprint,
                "cache hit, skipping execution"
            );
            self.outputs.insert(instance.id.clone(), record.outputs);
            self.state
                .transition_instance(&instance.id, NodeState::Cached)?;
            return Ok(());
        }

        if deterministic && self.running.contains_key(&fingerprint) {
            // Identical work is already in flight: wait for its outcome
            // instead of executing the same fingerprint twice.
            tracing::debug!(
                instance = %instance.id,
                fingerprint = %fingerprint,
                "awaiting identical in-flight execution"
            );
            self.waiters
                .entry(fingerprint)
                .or_default()
                .push(instance.id.clone());
            return Ok(());
        }

        self.submit(instance, node, step, resolved.inputs, fingerprint, deterministic)
    }

    fn submit(
        &mut self,
        instance: &NodeInstance,
        node: &NodeDefinition,
        step: Arc<dyn Step>,
        inputs: StepInputs,
        fingerprint: Fingerprint,
        deterministic: bool,
    ) -> Result<(), EngineError> {
        self.state
            .transition_instance(&instance.id, NodeState::Running)?;

        let workdir = match self.prepare_workdir(&instance.id) {
            Ok(dir) => dir,
            Err(error) => {
                self.state
                    .transition_instance(&instance.id, NodeState::Failed)?;
                if let Some(s) = self.state.instance_states.get_mut(&instance.id) {
                    s.error_message = Some(format!("cannot create working directory: {error}"));
                }
                return Ok(());
            }
        };

        let ctx = StepContext {
            execution_id: self.execution_id,
            instance_id: instance.id.clone(),
            workdir,
            cancellation: self.cancel.child_token(),
        };
        let invocation = StepInvocation {
            step_key: node.step.clone(),
            step,
            inputs,
            ctx,
            timeout: node.timeout.or(self.definition.config.step_timeout),
        };
        let retry: Option<RetryConfig> = node
            .retry_policy
            .clone()
            .or_else(|| self.definition.config.retry_policy.clone());

        if deterministic {
            self.running
                .insert(fingerprint, instance.id.clone());
        }

        let executor = self.executor.clone();
        let instance_id = instance.id.clone();
        tracing::debug!(instance = %instance_id, step = %node.step, "submitting instance");
        self.tasks.spawn(async move {
            let (attempts, result) =
                submit_with_retry(executor.as_ref(), invocation, retry.as_ref()).await;
            (instance_id, attempts, result)
        });

        Ok(())
    }

    /// Scratch directory exclusively owned by one instance for this run.
    fn prepare_workdir(&self, instance_id: &InstanceId) -> std::io::Result<Option<PathBuf>> {
        let Some(root) = &self.workdir_root else {
            return Ok(None);
        };
        let sanitized: String = instance_id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let dir = root.join("work").join(sanitized);
        std::fs::create_dir_all(&dir)?;
        Ok(Some(dir))
    }

    fn handle_joined(
        &mut self,
        joined: Result<TaskOutcome, tokio::task::JoinError>,
    ) -> Result<(), EngineError> {
        match joined {
            Ok((instance_id, attempts, result)) => {
                self.handle_completion(&instance_id, attempts, result)
            }
            Err(join_error) => {
                // The task itself died; its instance is resolved by the
                // stranded check once the remaining tasks drain.
                tracing::error!(%join_error, "instance task panicked");
                Ok(())
            }
        }
    }

    fn handle_completion(
        &mut self,
        instance_id: &InstanceId,
        attempts: u32,
        result: Result<StepOutputs, StepError>,
    ) -> Result<(), EngineError> {
        let fingerprint = self.fingerprints.get(instance_id).cloned();
        let node = self
            .plan
            .instance(instance_id)
            .and_then(|i| self.definition.node(i.node_id));
        let deterministic = node
            .and_then(|n| self.registry.get(&n.step))
            .is_none_or(|s| s.deterministic());

        if let Some(s) = self.state.instance_states.get_mut(instance_id) {
            s.attempts = attempts;
        }
        let started_at = self
            .state
            .instance_state(instance_id)
            .and_then(|s| s.started_at)
            .unwrap_or_else(Utc::now);

        // A step that ran but dropped declared output ports produced
        // malformed output.
        let result = result.and_then(|outputs| {
            if let Some(node) = node
                && let Some(missing) = node.outputs.iter().find(|p| !outputs.contains_key(&p.name))
            {
                return Err(StepError::MalformedOutput {
                    message: format!("declared output port '{}' missing", missing.name),
                });
            }
            Ok(outputs)
        });

        match result {
            Ok(outputs) => {
                if let Some(fp) = &fingerprint {
                    let mut record =
                        RunRecord::success(fp.clone(), outputs.clone(), started_at);
                    if !deterministic {
                        record = record.non_cacheable();
                    }
                    self.ledger.record(record);
                }
                self.outputs.insert(instance_id.clone(), outputs.clone());
                self.state
                    .transition_instance(instance_id, NodeState::Completed)?;
                tracing::debug!(instance = %instance_id, "instance completed");

                if let Some(fp) = &fingerprint {
                    self.settle_waiters_success(fp, &outputs)?;
                }
            }
            Err(error) => {
                let cancelled = matches!(error, StepError::Cancelled);
                if cancelled {
                    self.state
                        .transition_instance(instance_id, NodeState::Cancelled)?;
                    tracing::debug!(instance = %instance_id, "instance cancelled");
                } else {
                    if let Some(fp) = &fingerprint {
                        self.ledger
                            .record(RunRecord::failure(fp.clone(), error.to_string(), started_at));
                    }
                    self.state
                        .transition_instance(instance_id, NodeState::Failed)?;
                    if let Some(s) = self.state.instance_states.get_mut(instance_id) {
                        s.error_message = Some(error.to_string());
                    }
                    tracing::warn!(instance = %instance_id, %error, "instance failed");
                }

                if let Some(fp) = &fingerprint {
                    self.settle_waiters_failure(fp, &error)?;
                }
            }
        }

        if let Some(fp) = &fingerprint
            && self.running.get(fp).is_some_and(|owner| owner == instance_id)
        {
            self.running.remove(fp);
        }

        Ok(())
    }

    fn settle_waiters_success(
        &mut self,
        fingerprint: &Fingerprint,
        outputs: &StepOutputs,
    ) -> Result<(), EngineError> {
        let Some(waiting) = self.waiters.remove(fingerprint) else {
            return Ok(());
        };
        for waiter in waiting {
            self.outputs.insert(waiter.clone(), outputs.clone());
            self.state.transition_instance(&waiter, NodeState::Cached)?;
            tracing::debug!(instance = %waiter, "adopted in-flight result");
        }
        Ok(())
    }

    fn settle_waiters_failure(
        &mut self,
        fingerprint: &Fingerprint,
        error: &StepError,
    ) -> Result<(), EngineError> {
        let Some(waiting) = self.waiters.remove(fingerprint) else {
            return Ok(());
        };
        for waiter in waiting {
            self.state
                .transition_instance(&waiter, NodeState::Blocked)?;
            if let Some(s) = self.state.instance_states.get_mut(&waiter) {
                s.error_message = Some(format!("shared execution failed: {error}"));
            }
        }
        Ok(())
    }

    fn begin_cancellation(&mut self) -> Result<(), EngineError> {
        self.cancelling = true;
        self.state.transition_status(ExecutionStatus::Cancelling)?;
        tracing::info!(execution = %self.execution_id, "cancellation requested");

        for state in [NodeState::Pending, NodeState::Ready] {
            for id in self.state.ids_in(state) {
                self.state.transition_instance(&id, NodeState::Cancelled)?;
            }
        }
        self.waiters.clear();
        Ok(())
    }

    fn mark_stranded(&mut self) -> Result<(), EngineError> {
        for id in self.state.ids_in(NodeState::Pending) {
            self.state.transition_instance(&id, NodeState::Blocked)?;
        }
        for id in self.state.ids_in(NodeState::Ready) {
            self.state.transition_instance(&id, NodeState::Blocked)?;
        }
        for id in self.state.ids_in(NodeState::Running) {
            self.state.transition_instance(&id, NodeState::Failed)?;
            if let Some(s) = self.state.instance_states.get_mut(&id) {
                s.error_message = Some("instance task was lost".into());
            }
        }
        Ok(())
    }

    fn final_status(&self) -> ExecutionStatus {
        if self.state.status == ExecutionStatus::Cancelling {
            ExecutionStatus::Cancelled
        } else if self.state.count_in(NodeState::Failed) > 0
            || self.state.count_in(NodeState::Blocked) > 0
        {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        }
    }

    fn resolve_inputs(
        &self,
        instance: &NodeInstance,
        node: &NodeDefinition,
    ) -> Result<ResolvedInputs, StepError> {
        let mut inputs = StepInputs::new();
        let mut canonical_literals = BTreeMap::new();
        let mut upstream_fingerprints: BTreeMap<String, Vec<Fingerprint>> = BTreeMap::new();

        for (port, source) in &instance.inputs {
            match source {
                InputSource::Literal { value } => {
                    inputs.insert(port.clone(), value.clone());
                    canonical_literals
                        .insert(port.clone(), self.canonicalize_literal(node, port, value)?);
                }
                InputSource::Upstream {
                    instance: upstream,
                    port: upstream_port,
                } => {
                    let value = self
                        .outputs
                        .get(upstream)
                        .and_then(|o| o.get(upstream_port))
                        .ok_or_else(|| StepError::MissingInput { port: port.clone() })?
                        .clone();
                    inputs.insert(port.clone(), value);
                    upstream_fingerprints
                        .insert(port.clone(), vec![self.upstream_fingerprint(upstream, port)?]);
                }
                InputSource::Gather { sources } => {
                    let mut values = Vec::with_capacity(sources.len());
                    let mut fingerprints = Vec::with_capacity(sources.len());
                    for (upstream, upstream_port) in sources {
                        let value = self
                            .outputs
                            .get(upstream)
                            .and_then(|o| o.get(upstream_port))
                            .ok_or_else(|| StepError::MissingInput { port: port.clone() })?
                            .clone();
                        values.push(value);
                        fingerprints.push(self.upstream_fingerprint(upstream, port)?);
                    }
                    inputs.insert(port.clone(), serde_json::Value::Array(values));
                    upstream_fingerprints.insert(port.clone(), fingerprints);
                }
            }
        }

        Ok(ResolvedInputs {
            inputs,
            canonical_literals,
            upstream_fingerprints,
        })
    }

    fn upstream_fingerprint(
        &self,
        upstream: &InstanceId,
        port: &str,
    ) -> Result<Fingerprint, StepError> {
        self.fingerprints
            .get(upstream)
            .cloned()
            .ok_or_else(|| StepError::MissingInput { port: port.to_string() })
    }

    /// Canonical form of a literal for fingerprinting. File-typed inputs
    /// contribute their content hash, not their path.
    fn canonicalize_literal(
        &self,
        node: &NodeDefinition,
        port: &str,
        value: &serde_json::Value,
    ) -> Result<serde_json::Value, StepError> {
        let is_file = node
            .input(port)
            .is_some_and(|spec| spec.ty == PortType::File);
        if !is_file {
            return Ok(value.clone());
        }
        let Some(path) = value.as_str() else {
            return Err(StepError::MissingInput {
                port: port.to_string(),
            });
        };
        let digest = hash_file(path).map_err(|e| {
            StepError::failed(format!("cannot hash file input '{path}' on port '{port}': {e}"))
        })?;
        Ok(serde_json::json!({ "content_sha256": digest }))
    }
}

/// Inputs resolved for one ready instance.
struct ResolvedInputs {
    inputs: StepInputs,
    canonical_literals: BTreeMap<String, serde_json::Value>,
    upstream_fingerprints: BTreeMap<String, Vec<Fingerprint>>,
}
