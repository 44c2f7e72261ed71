//! Pluggable execution backends.
//!
//! Every backend implements the same [`Executor`] contract: submit one
//! resolved invocation, await its outcome. Backends differ only in where
//! and with how much concurrency the step runs:
//!
//! - [`SerialExecutor`] — one invocation at a time, in-process.
//! - [`WorkerPoolExecutor`] — a bounded pool of concurrent in-process
//!   workers; `submit` waits for a free slot (backpressure).
//! - [`ClusterExecutor`] — serializes the invocation to a spool directory
//!   and polls for the result file, modelling submission to an external
//!   batch system. A [`SpoolWorker`] drains the spool on the remote side.
//!
//! All backends honor the invocation's timeout and cancellation token.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cascade_core::{ExecutionId, StepKey};
use cascade_execution::InstanceId;
use cascade_workflow::RetryConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::step::{Step, StepContext, StepError, StepInputs, StepOutputs, StepRegistry};

/// A fully resolved, ready-to-run step invocation.
#[derive(Clone)]
pub struct StepInvocation {
    /// Registry key of the step, for backends that re-resolve remotely.
    pub step_key: StepKey,
    /// The in-process step implementation.
    pub step: Arc<dyn Step>,
    /// Resolved input values.
    pub inputs: StepInputs,
    /// Invocation context (cancellation, scratch dir).
    pub ctx: StepContext,
    /// Per-invocation timeout, if any.
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for StepInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepInvocation")
            .field("step_key", &self.step_key)
            .field("instance_id", &self.ctx.instance_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Uniform submission contract across backends.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run one invocation to completion and return its outcome.
    async fn submit(&self, invocation: StepInvocation) -> Result<StepOutputs, StepError>;
}

/// Run an invocation in-process, honoring timeout and cancellation.
async fn run_local(invocation: StepInvocation) -> Result<StepOutputs, StepError> {
    let timeout = invocation.timeout;
    let cancel = invocation.ctx.cancellation.clone();
    let StepInvocation {
        step, inputs, ctx, ..
    } = invocation;
    let work = step.run(inputs, ctx);

    match timeout {
        Some(limit) => tokio::select! {
            () = cancel.cancelled() => Err(StepError::Cancelled),
            result = tokio::time::timeout(limit, work) => {
                result.unwrap_or(Err(StepError::Timeout { timeout: limit }))
            }
        },
        None => tokio::select! {
            () = cancel.cancelled() => Err(StepError::Cancelled),
            result = work => result,
        },
    }
}

/// Runs each submitted invocation synchronously, one at a time.
#[derive(Debug, Default)]
pub struct SerialExecutor {
    lock: Mutex<()>,
}

impl SerialExecutor {
    /// Create a serial executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Executor for SerialExecutor {
    async fn submit(&self, invocation: StepInvocation) -> Result<StepOutputs, StepError> {
        let _serial = self.lock.lock().await;
        run_local(invocation).await
    }
}

/// Dispatches invocations to a bounded set of concurrent workers.
///
/// `submit` waits for a free worker slot before dispatching, so a saturated
/// pool applies backpressure to the scheduler instead of queueing unboundedly.
#[derive(Debug)]
pub struct WorkerPoolExecutor {
    workers: Arc<Semaphore>,
}

impl WorkerPoolExecutor {
    /// Create a pool with the given number of worker slots (minimum 1).
    #[must_use]
    pub fn new(pool_size: usize) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }
}

#[async_trait]
impl Executor for WorkerPoolExecutor {
    async fn submit(&self, invocation: StepInvocation) -> Result<StepOutputs, StepError> {
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StepError::infrastructure("worker pool is closed"))?;

        let handle = tokio::spawn(async move {
            let _slot = permit;
            run_local(invocation).await
        });

        handle
            .await
            .map_err(|e| StepError::infrastructure(format!("worker task panicked: {e}")))?
    }
}

/// Serialized invocation written to the spool by [`ClusterExecutor`].
#[derive(Debug, Serialize, Deserialize)]
pub struct SpoolRequest {
    /// The run this invocation belongs to.
    pub execution_id: ExecutionId,
    /// The instance being executed.
    pub instance_id: InstanceId,
    /// Registry key for the worker to resolve.
    pub step_key: StepKey,
    /// Resolved input values.
    pub inputs: StepInputs,
}

/// Serialized outcome written to the spool by [`SpoolWorker`].
#[derive(Debug, Serialize, Deserialize)]
pub struct SpoolResponse {
    /// The invocation outcome.
    pub result: Result<StepOutputs, StepError>,
}

/// Submits invocations to an external batch system through a spool
/// directory and awaits the result file.
#[derive(Debug)]
pub struct ClusterExecutor {
    spool_dir: PathBuf,
    poll_interval: Duration,
}

impl ClusterExecutor {
    /// Create a cluster executor spooling into the given directory.
    #[must_use]
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            poll_interval: Duration::from_millis(250),
        }
    }

    /// Override the result polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn await_response(&self, name: &str) -> Result<StepOutputs, StepError> {
        let response_path = self.spool_dir.join(format!("{name}.response.json"));
        loop {
            if tokio::fs::try_exists(&response_path)
                .await
                .map_err(|e| StepError::infrastructure(format!("spool poll failed: {e}")))?
            {
                let raw = tokio::fs::read_to_string(&response_path)
                    .await
                    .map_err(|e| StepError::infrastructure(format!("spool read failed: {e}")))?;
                let _ = tokio::fs::remove_file(&response_path).await;
                let response: SpoolResponse = serde_json::from_str(&raw).map_err(|e| {
                    StepError::MalformedOutput {
                        message: format!("unparsable spool response: {e}"),
                    }
                })?;
                return response.result;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Executor for ClusterExecutor {
    async fn submit(&self, invocation: StepInvocation) -> Result<StepOutputs, StepError> {
        tokio::fs::create_dir_all(&self.spool_dir)
            .await
            .map_err(|e| StepError::infrastructure(format!("cannot create spool dir: {e}")))?;

        let name = spool_name(&invocation.ctx.instance_id);
        let request = SpoolRequest {
            execution_id: invocation.ctx.execution_id,
            instance_id: invocation.ctx.instance_id.clone(),
            step_key: invocation.step_key.clone(),
            inputs: invocation.inputs.clone(),
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| StepError::infrastructure(format!("cannot serialize request: {e}")))?;
        // Write-then-rename so the worker never reads a partial request.
        let tmp_path = self.spool_dir.join(format!("{name}.request.tmp"));
        let request_path = self.spool_dir.join(format!("{name}.request.json"));
        tokio::fs::write(&tmp_path, body)
            .await
            .map_err(|e| StepError::infrastructure(format!("spool write failed: {e}")))?;
        tokio::fs::rename(&tmp_path, &request_path)
            .await
            .map_err(|e| StepError::infrastructure(format!("spool rename failed: {e}")))?;

        let cancel = invocation.ctx.cancellation.clone();
        let waited = self.await_response(&name);

        let outcome = match invocation.timeout {
            Some(limit) => tokio::select! {
                () = cancel.cancelled() => Err(StepError::Cancelled),
                result = tokio::time::timeout(limit, waited) => {
                    result.unwrap_or(Err(StepError::Timeout { timeout: limit }))
                }
            },
            None => tokio::select! {
                () = cancel.cancelled() => Err(StepError::Cancelled),
                result = waited => result,
            },
        };

        if matches!(outcome, Err(StepError::Cancelled | StepError::Timeout { .. })) {
            // Best-effort: tell the worker the result is no longer wanted.
            let marker = self.spool_dir.join(format!("{name}.cancel"));
            let _ = tokio::fs::write(&marker, b"").await;
        }
        outcome
    }
}

/// Drains a cluster spool directory: the remote half of [`ClusterExecutor`].
///
/// Deployments run one or more workers on the batch system; tests drive
/// [`SpoolWorker::drain_once`] directly.
#[derive(Debug)]
pub struct SpoolWorker {
    spool_dir: PathBuf,
    registry: Arc<StepRegistry>,
    poll_interval: Duration,
}

impl SpoolWorker {
    /// Create a worker over the given spool directory.
    #[must_use]
    pub fn new(spool_dir: impl Into<PathBuf>, registry: Arc<StepRegistry>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            registry,
            poll_interval: Duration::from_millis(250),
        }
    }

    /// Override the request polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Poll the spool until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {
                    self.drain_once().await;
                }
            }
        }
    }

    /// Process every pending request once, returning how many were handled.
    pub async fn drain_once(&self) -> usize {
        let Ok(mut entries) = tokio::fs::read_dir(&self.spool_dir).await else {
            return 0;
        };

        let mut handled = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(name) = request_name(&path) else {
                continue;
            };
            self.handle_request(&path, &name).await;
            handled += 1;
        }
        handled
    }

    async fn handle_request(&self, request_path: &Path, name: &str) {
        let cancel_marker = self.spool_dir.join(format!("{name}.cancel"));
        let response_path = self.spool_dir.join(format!("{name}.response.json"));

        let result = if tokio::fs::try_exists(&cancel_marker).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&cancel_marker).await;
            Err(StepError::Cancelled)
        } else {
            self.execute_request(request_path).await
        };

        let _ = tokio::fs::remove_file(request_path).await;
        match serde_json::to_string(&SpoolResponse { result }) {
            Ok(body) => {
                // Write-then-rename so the submitter never reads a partial
                // response.
                let tmp_path = self.spool_dir.join(format!("{name}.response.tmp"));
                let written = tokio::fs::write(&tmp_path, body).await;
                let renamed = match written {
                    Ok(()) => tokio::fs::rename(&tmp_path, &response_path).await,
                    Err(e) => Err(e),
                };
                if let Err(error) = renamed {
                    tracing::warn!(%error, name, "failed to write spool response");
                }
            }
            Err(error) => {
                tracing::warn!(%error, name, "failed to serialize spool response");
            }
        }
    }

    async fn execute_request(&self, request_path: &Path) -> Result<StepOutputs, StepError> {
        let raw = tokio::fs::read_to_string(request_path)
            .await
            .map_err(|e| StepError::infrastructure(format!("spool read failed: {e}")))?;
        let request: SpoolRequest = serde_json::from_str(&raw)
            .map_err(|e| StepError::infrastructure(format!("unparsable spool request: {e}")))?;

        let step = self
            .registry
            .get(&request.step_key)
            .ok_or_else(|| StepError::infrastructure(format!(
                "no step registered for key '{}'",
                request.step_key
            )))?;

        let ctx = StepContext::new(request.execution_id, request.instance_id);
        step.run(request.inputs, ctx).await
    }
}

/// Stable, filesystem-safe spool name for an instance.
fn spool_name(instance_id: &InstanceId) -> String {
    let sanitized: String = instance_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if sanitized.len() <= 120 {
        sanitized
    } else {
        // Deep fan-outs produce long ids; keep a readable prefix and
        // disambiguate with a digest of the full id.
        use sha2::{Digest, Sha256};
        let digest = hex::encode(Sha256::digest(instance_id.as_str().as_bytes()));
        format!("{}_{}", &sanitized[..96], &digest[..16])
    }
}

fn request_name(path: &Path) -> Option<String> {
    let file = path.file_name()?.to_str()?;
    file.strip_suffix(".request.json").map(ToString::to_string)
}

/// Submit with bounded retries for infrastructure failures.
///
/// Step failures and timeouts are final: a step that ran and failed is
/// never silently retried. Returns the number of attempts made together
/// with the final outcome.
pub async fn submit_with_retry(
    executor: &dyn Executor,
    invocation: StepInvocation,
    retry: Option<&RetryConfig>,
) -> (u32, Result<StepOutputs, StepError>) {
    let max_attempts = retry.map_or(1, |r| r.max_attempts.max(1));
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = executor.submit(invocation.clone()).await;
        match &result {
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                let delay = retry
                    .map(|r| r.delay_for_attempt(attempt - 1))
                    .unwrap_or_default();
                tracing::warn!(
                    instance = %invocation.ctx.instance_id,
                    attempt,
                    max_attempts,
                    %error,
                    delay_ms = delay.as_millis() as u64,
                    "infrastructure error, retrying submission"
                );
                tokio::time::sleep(delay).await;
            }
            _ => return (attempt, result),
        }
    }
}
