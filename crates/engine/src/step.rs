//! The step contract: the boundary between the engine and executable work.
//!
//! The engine treats a step as a black box behind [`Step::run`]: resolved
//! inputs go in, output values come out. For caching to be correct a step
//! must be a pure function of its inputs; a step that is not declares so
//! via [`Step::deterministic`] and is re-executed on every run.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cascade_core::{ExecutionId, StepKey};
use cascade_execution::InstanceId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Resolved input values per port. Ports the workflow left unbound are
/// simply absent; the step decides whether that is acceptable.
pub type StepInputs = BTreeMap<String, serde_json::Value>;

/// Output values per declared output port.
pub type StepOutputs = BTreeMap<String, serde_json::Value>;

/// Why a step invocation failed.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    /// The step ran and reported failure (tool non-zero exit, bad data).
    #[error("step failed: {message}")]
    Failed {
        /// Failure detail.
        message: String,
    },

    /// A required input port was missing or held an unusable value.
    #[error("missing or invalid input '{port}'")]
    MissingInput {
        /// The offending port.
        port: String,
    },

    /// The step produced output the engine could not accept.
    #[error("malformed output: {message}")]
    MalformedOutput {
        /// Failure detail.
        message: String,
    },

    /// The invocation exceeded its timeout.
    #[error("step timed out after {timeout:?}")]
    Timeout {
        /// The enforced timeout.
        timeout: Duration,
    },

    /// The invocation was cancelled before completing.
    #[error("step cancelled")]
    Cancelled,

    /// The execution backend failed before the step could run.
    ///
    /// Unlike [`StepError::Failed`], infrastructure errors are retried with
    /// backoff: the step itself never ran, so retrying cannot mask a
    /// deterministic failure.
    #[error("infrastructure: {message}")]
    Infrastructure {
        /// Failure detail.
        message: String,
    },
}

impl StepError {
    /// Build a plain failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Build an infrastructure failure.
    #[must_use]
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::Infrastructure {
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the submission may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Infrastructure { .. })
    }
}

/// Per-invocation context handed to a step.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The run this invocation belongs to.
    pub execution_id: ExecutionId,
    /// The instance being executed.
    pub instance_id: InstanceId,
    /// Scratch directory exclusively owned by this invocation, when the run
    /// has a working root. Never shared between instances.
    pub workdir: Option<PathBuf>,
    /// Cooperative cancellation. Steps should check this at their own
    /// suspension points (subprocess waits, polling loops).
    pub cancellation: CancellationToken,
}

impl StepContext {
    /// Create a context for one invocation.
    #[must_use]
    pub fn new(execution_id: ExecutionId, instance_id: InstanceId) -> Self {
        Self {
            execution_id,
            instance_id,
            workdir: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Attach a scratch directory.
    #[must_use]
    pub fn with_workdir(mut self, dir: PathBuf) -> Self {
        self.workdir = Some(dir);
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// One executable unit of work.
#[async_trait]
pub trait Step: Send + Sync {
    /// Execute the step with fully resolved inputs.
    async fn run(&self, inputs: StepInputs, ctx: StepContext) -> Result<StepOutputs, StepError>;

    /// Whether the step is a pure function of its inputs.
    ///
    /// Non-deterministic steps are executed on every run and their results
    /// are never served from the cache.
    fn deterministic(&self) -> bool {
        true
    }
}

/// Registry mapping step keys to implementations.
#[derive(Default)]
pub struct StepRegistry {
    steps: DashMap<StepKey, Arc<dyn Step>>,
}

impl StepRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step implementation under a key, replacing any previous
    /// registration.
    pub fn register(&self, key: StepKey, step: Arc<dyn Step>) {
        self.steps.insert(key, step);
    }

    /// Look up a step implementation.
    #[must_use]
    pub fn get(&self, key: &StepKey) -> Option<Arc<dyn Step>> {
        self.steps.get(key).map(|entry| entry.value().clone())
    }

    /// Returns `true` if the key has a registered implementation.
    #[must_use]
    pub fn contains(&self, key: &StepKey) -> bool {
        self.steps.contains_key(key)
    }

    /// Number of registered steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if no steps are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("len", &self.steps.len())
            .finish()
    }
}
