//! Typed error hierarchy for the tend orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `DispatchError` — task-dispatcher contract violations
//! - `WorkspaceError` — git working-tree and repository failures
//! - `CycleError` — cycle-infrastructure failures outside the stage machine
//!
//! Stage-level failures (plan rejected, strategy missing, validation failed)
//! are *not* errors: they travel as `(reason, context)` pairs through the
//! cycle state machine. Only infrastructure defects use these types.

use thiserror::Error;
use uuid::Uuid;

/// Errors from the task dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Duplicate task id {task_id} within one submission")]
    DuplicateTaskId { task_id: Uuid },
}

/// Errors from the git workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to open git repository at {path}: {source}")]
    Open {
        path: std::path::PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("Git operation '{operation}' failed: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: git2::Error,
    },
}

/// Errors from cycle infrastructure (persistence, wiring).
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Cycle state missing {what} - sequencer contract violated")]
    MissingState { what: &'static str },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
