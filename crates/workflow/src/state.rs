//! Node execution state tracking.

use serde::{Deserialize, Serialize};

/// The execution state of a single node instance within a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Not yet evaluated; waiting for predecessors.
    Pending,
    /// All predecessors completed; eligible for execution.
    Ready,
    /// Currently executing.
    Running,
    /// Resolved from the run ledger without executing.
    Cached,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Will never run because an ancestor failed or was blocked.
    Blocked,
    /// Cancelled by the user or by a shutdown signal.
    Cancelled,
}

impl NodeState {
    /// Returns `true` if the node has reached a final state and will not transition again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Cached | Self::Completed | Self::Failed | Self::Blocked | Self::Cancelled
        )
    }

    /// Returns `true` if the node is currently doing work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns `true` if the node produced usable outputs (ran or hit the cache).
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Cached)
    }

    /// Returns `true` if the node ended in a failure state.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Cached => write!(f, "cached"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Blocked => write!(f, "blocked"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
