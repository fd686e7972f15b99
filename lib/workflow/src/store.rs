//! Persistence abstraction for workflows and run records.

use crate::definition::Workflow;
use crate::execution::WorkflowRun;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use taskloom_core::RunId;

/// Errors from store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No workflow with this name exists.
    WorkflowNotFound { name: String },
    /// No run with this id exists.
    RunNotFound { run_id: String },
    /// A stored document could not be parsed or serialized.
    Format { path: PathBuf, reason: String },
    /// The underlying storage failed.
    Io { path: PathBuf, reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { name } => write!(f, "Workflow '{name}' not found"),
            Self::RunNotFound { run_id } => write!(f, "run '{run_id}' not found"),
            Self::Format { path, reason } => {
                write!(f, "invalid document {}: {reason}", path.display())
            }
            Self::Io { path, reason } => write!(f, "{}: {reason}", path.display()),
        }
    }
}

impl std::error::Error for StoreError {}

/// Stores workflow definitions, run records and run logs.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Loads a workflow definition by name.
    async fn load_workflow(&self, name: &str) -> Result<Workflow, StoreError>;

    /// Creates or overwrites the record of a run.
    async fn save_run(&self, run: &WorkflowRun) -> Result<(), StoreError>;

    /// Lists runs of a workflow, most recent first.
    async fn list_runs(&self, workflow: &str, limit: usize)
    -> Result<Vec<WorkflowRun>, StoreError>;

    /// Directory holding the logs of one run.
    fn run_log_directory(&self, workflow: &str, run_id: RunId) -> PathBuf;

    /// Deletes all but the `keep` most recent runs of a workflow. Returns the
    /// number of runs deleted.
    async fn prune_runs(&self, workflow: &str, keep: usize) -> Result<usize, StoreError>;
}
