//! Workflow execution engine for taskloom.
//!
//! This crate provides the engine that runs a workflow of jobs, including:
//!
//! - **Definitions**: Workflows, jobs and their effective settings, loaded from YAML
//! - **Graph**: Dependency validation, ordering and traversal using petgraph
//! - **Expressions**: Guard conditions and `${{ }}` interpolation between jobs
//! - **Extraction**: Turning executor responses into named outputs
//! - **Execution**: Job runner and bounded-parallel scheduler
//! - **Collaborators**: Traits for the executor, shell, template and run stores

pub mod definition;
pub mod error;
pub mod execution;
pub mod executor;
pub mod expression;
pub mod extract;
pub mod graph;
pub mod job;
pub mod report;
pub mod scheduler;
pub mod shell;
pub mod store;
pub mod template;

pub use definition::{ContextCommands, ExecutionMode, Job, Workflow, WorkflowDefaults};
pub use error::{GraphError, SchedulerError, WorkflowError};
pub use execution::{JobResult, JobStatus, RunStatus, WorkflowRun};
pub use executor::{AgentError, AgentExecutor, AgentResponse, ExecutorConfig};
pub use expression::{ExpressionContext, ExpressionError};
pub use job::{JobRequest, JobRunner};
pub use report::plan_report;
pub use scheduler::{RunOptions, Scheduler, SchedulerConfig, StatusCallback};
pub use shell::ShellRunner;
pub use store::{StoreError, WorkflowStore};
pub use template::{AgentTemplate, TemplateError, TemplateStore};
