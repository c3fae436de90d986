//! Stage outcome, lifecycle state and failure classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The final outcome of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Stage ran and exited zero.
    Succeeded,
    /// Stage ran (or tried to) and failed.
    Failed,
    /// Stage was never executed.
    Skipped,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageOutcome {
    /// Returns true if the outcome is a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Scheduler-side lifecycle state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Waiting on dependencies.
    #[default]
    Pending,
    /// All dependencies succeeded; waiting for a worker slot.
    Ready,
    /// Currently executing.
    Running,
    /// A result has been recorded.
    Done,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl StageState {
    /// Returns true if the state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Why a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The process (or container) exited non-zero.
    ProcessExit,
    /// The stage timeout or a container readiness wait expired.
    Timeout,
    /// The service container could not be started.
    ContainerStart,
    /// The command could not be spawned at all.
    Spawn,
    /// The run was cancelled while the stage was running.
    Cancelled,
    /// The stage task panicked or could not be joined.
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessExit => write!(f, "process_exit"),
            Self::Timeout => write!(f, "timeout"),
            Self::ContainerStart => write!(f, "container_start"),
            Self::Spawn => write!(f, "spawn"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Why a stage was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "reason", content = "stage", rename_all = "snake_case")]
pub enum SkipReason {
    /// An upstream stage failed or was skipped; carries the originating stage.
    DependencyFailed(String),
    /// The run was cancelled before the stage started.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DependencyFailed(stage) => write!(f, "dependency '{stage}' did not succeed"),
            Self::Cancelled => write!(f, "run cancelled"),
        }
    }
}
