//! Values visible to expressions during a run.

use crate::execution::JobStatus;
use std::collections::HashMap;
use std::path::Path;

/// Per-run evaluation context.
///
/// Owned by the scheduler; each job evaluates against a clone taken when
/// it starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionContext {
    job_outputs: HashMap<String, HashMap<String, String>>,
    job_statuses: HashMap<String, JobStatus>,
    step_outputs: HashMap<String, HashMap<String, String>>,
    step_statuses: HashMap<String, String>,
    variables: HashMap<String, String>,
    current_job: HashMap<String, String>,
}

impl ExpressionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a job's outputs, replacing earlier ones.
    pub fn set_outputs<I, K, V>(&mut self, job: &str, outputs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let outputs = outputs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.job_outputs.insert(job.to_string(), outputs);
    }

    /// Records a job's status.
    pub fn set_status(&mut self, job: &str, status: JobStatus) {
        self.job_statuses.insert(job.to_string(), status);
    }

    pub fn set_step_outputs<I, K, V>(&mut self, step: &str, outputs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let outputs = outputs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.step_outputs.insert(step.to_string(), outputs);
    }

    pub fn set_step_status(&mut self, step: &str, status: impl Into<String>) {
        self.step_statuses.insert(step.to_string(), status.into());
    }

    pub fn clear_steps(&mut self) {
        self.step_outputs.clear();
        self.step_statuses.clear();
    }

    /// Sets a free variable.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Scopes the context to a job whose scratch directory is `output_dir`.
    pub fn set_current_job(&mut self, output_dir: &Path) {
        self.current_job.clear();
        self.current_job
            .insert("output_dir".to_string(), output_dir.display().to_string());
    }

    pub fn clear_current_job(&mut self) {
        self.current_job.clear();
    }

    /// Recorded job statuses.
    pub fn job_statuses(&self) -> impl Iterator<Item = JobStatus> + '_ {
        self.job_statuses.values().copied()
    }

    /// Resolves a dotted path. Returns `None` when nothing matches.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&str> {
        let parts: Vec<&str> = path.split('.').collect();
        match parts.as_slice() {
            ["job", key] => self.current_job.get(*key).map(String::as_str),
            ["jobs", job, "outputs", key] => self
                .job_outputs
                .get(*job)
                .and_then(|o| o.get(*key))
                .map(String::as_str),
            ["jobs", job, "status"] => self.job_statuses.get(*job).map(JobStatus::as_str),
            ["steps", step, "outputs", key] => self
                .step_outputs
                .get(*step)
                .and_then(|o| o.get(*key))
                .map(String::as_str),
            ["steps", step, "status"] => self.step_statuses.get(*step).map(String::as_str),
            _ => self.variables.get(path).map(String::as_str),
        }
    }
}
