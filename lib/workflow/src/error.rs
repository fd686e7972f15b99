//! Error types for the workflow crate.
//!
//! - `GraphError`: structural problems in a workflow's job graph
//! - `WorkflowError`: loading or serializing workflow definitions
//! - `SchedulerError`: run-level failures that abort a run
//!
//! Collaborator errors live next to their traits
//! (`AgentError`, `StoreError`, `TemplateError`) and expression errors in
//! the expression module.

use std::fmt;

/// Structural errors in a workflow's job graph.
///
/// Raised before any job runs; a workflow with a structural error is never
/// executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The job defines none of goals, prompt or agent.
    MissingExecutionMode { job: String },
    /// A `needs` entry names a job that does not exist.
    UnknownDependency { job: String, dependency: String },
    /// The dependency graph contains a cycle. The path ends with the node
    /// that closed the cycle.
    CycleDetected { path: Vec<String> },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingExecutionMode { job } => {
                write!(f, "job '{job}' must have 'goals', 'prompt', or 'agent'")
            }
            Self::UnknownDependency { job, dependency } => {
                write!(f, "job '{job}' depends on unknown job '{dependency}'")
            }
            Self::CycleDetected { path } => {
                write!(f, "circular dependency detected: {}", path.join(" -> "))
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors loading or saving workflow definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// The definition could not be parsed.
    Parse { reason: String },
    /// The definition parsed but its job graph is invalid.
    Invalid { name: String, reason: String },
    /// The definition could not be serialized.
    Serialize { reason: String },
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { reason } => write!(f, "invalid workflow definition: {reason}"),
            Self::Invalid { name, reason } => {
                write!(f, "workflow '{name}' is invalid: {reason}")
            }
            Self::Serialize { reason } => write!(f, "failed to serialize workflow: {reason}"),
        }
    }
}

impl std::error::Error for WorkflowError {}

/// Run-level errors.
///
/// These abort the scheduling loop; the run is marked failed with the
/// error text while completed job results are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The workflow could not be loaded from the store.
    Load { workflow: String, reason: String },
    /// The workflow failed validation.
    Invalid(GraphError),
    /// The run record could not be persisted.
    Persist { reason: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { workflow, reason } => {
                write!(f, "failed to load workflow '{workflow}': {reason}")
            }
            Self::Invalid(e) => write!(f, "invalid workflow: {e}"),
            Self::Persist { reason } => write!(f, "failed to save run: {reason}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<GraphError> for SchedulerError {
    fn from(e: GraphError) -> Self {
        Self::Invalid(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_joins_path() {
        let err = GraphError::CycleDetected {
            path: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "circular dependency detected: a -> b -> a");
    }

    #[test]
    fn unknown_dependency_names_both_jobs() {
        let err = GraphError::UnknownDependency {
            job: "review".to_string(),
            dependency: "ghost".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("review"));
        assert!(msg.contains("ghost"));
    }

    #[test]
    fn scheduler_error_wraps_graph_error() {
        let err: SchedulerError = GraphError::MissingExecutionMode {
            job: "a".to_string(),
        }
        .into();
        assert!(err.to_string().starts_with("invalid workflow: job 'a'"));
    }
}
