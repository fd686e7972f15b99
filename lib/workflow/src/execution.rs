//! Run and job result records.
//!
//! A `WorkflowRun` holds one `JobResult` per job. Job results follow the
//! state machine `Pending -> Running -> {Completed | Failed | Skipped |
//! Cancelled}`; once terminal, a result never transitions again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use taskloom_core::RunId;

/// The state of a single job within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for dependencies.
    Pending,
    /// Executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Not executed (guard false or a dependency failed).
    Skipped,
    /// Stopped before finishing.
    Cancelled,
}

impl JobStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Returns true if dependents may run after this status.
    #[must_use]
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    /// Lowercase name, as used in expressions and summaries.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }

    /// Single-character marker used in summaries and progress output.
    #[must_use]
    pub fn icon(self) -> char {
        match self {
            Self::Pending => '○',
            Self::Running => '◐',
            Self::Completed => '●',
            Self::Failed => '✗',
            Self::Skipped => '⊘',
            Self::Cancelled => '◌',
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The overall state of a run. Runs are never skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_name: String,
    pub status: JobStatus,
    /// Extracted outputs, keyed by declared output name.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub cost: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub error_message: Option<String>,
    pub log_file: Option<PathBuf>,
    /// Raw response text from the executor, or the dry-run preview.
    pub response: Option<String>,
    /// Scratch directory created for the job.
    pub output_dir: Option<PathBuf>,
    /// Continuation token for resuming the executor session.
    pub session_id: Option<String>,
}

impl JobResult {
    /// Creates a pending result.
    #[must_use]
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            status: JobStatus::Pending,
            outputs: BTreeMap::new(),
            start_time: None,
            end_time: None,
            cost: None,
            input_tokens: None,
            output_tokens: None,
            error_message: None,
            log_file: None,
            response: None,
            output_dir: None,
            session_id: None,
        }
    }

    /// Marks the job running. Returns false if already terminal.
    pub fn mark_started(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Running;
        self.start_time = Some(Utc::now());
        true
    }

    /// Marks the job completed. Empty outputs leave existing outputs alone.
    pub fn mark_completed(
        &mut self,
        outputs: BTreeMap<String, String>,
        response: Option<String>,
    ) -> bool {
        if !self.finish(JobStatus::Completed) {
            return false;
        }
        if !outputs.is_empty() {
            self.outputs = outputs;
        }
        if let Some(response) = response.filter(|r| !r.is_empty()) {
            self.response = Some(response);
        }
        true
    }

    /// Marks the job failed.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> bool {
        if !self.finish(JobStatus::Failed) {
            return false;
        }
        self.error_message = Some(error.into());
        true
    }

    /// Marks the job skipped, recording `Skipped: <reason>` when given.
    pub fn mark_skipped(&mut self, reason: Option<&str>) -> bool {
        if !self.finish(JobStatus::Skipped) {
            return false;
        }
        if let Some(reason) = reason.filter(|r| !r.is_empty()) {
            self.error_message = Some(format!("Skipped: {reason}"));
        }
        true
    }

    /// Marks the job cancelled.
    pub fn mark_cancelled(&mut self) -> bool {
        self.finish(JobStatus::Cancelled)
    }

    fn finish(&mut self, status: JobStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.end_time = Some(Utc::now());
        true
    }

    /// Records token and cost counters.
    pub fn update_stats(
        &mut self,
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
        cost: Option<f64>,
    ) {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.cost = cost;
    }

    /// Wall time between start and end, in seconds.
    #[must_use]
    pub fn duration(&self) -> Option<f64> {
        Some(seconds_between(self.start_time?, self.end_time?))
    }

    /// Input plus output tokens, when both are known.
    #[must_use]
    pub fn total_tokens(&self) -> Option<u64> {
        Some(self.input_tokens? + self.output_tokens?)
    }

    /// Returns true once the job reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true if the job completed.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// One execution of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: RunId,
    pub workflow_name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub job_results: BTreeMap<String, JobResult>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub is_dry_run: bool,
}

impl WorkflowRun {
    /// Creates a pending run with a pending result per job.
    #[must_use]
    pub fn new<I, S>(workflow_name: impl Into<String>, job_names: I, is_dry_run: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let job_results = job_names
            .into_iter()
            .map(|name| {
                let name = name.into();
                (name.clone(), JobResult::new(name))
            })
            .collect();
        Self {
            id: RunId::new(),
            workflow_name: workflow_name.into(),
            status: RunStatus::Pending,
            job_results,
            start_time: Utc::now(),
            end_time: None,
            error_message: None,
            is_dry_run,
        }
    }

    /// Starts the run.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.start_time = Utc::now();
    }

    /// Marks the run completed.
    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.end_time = Some(Utc::now());
    }

    /// Marks the run failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.end_time = Some(Utc::now());
        self.error_message = Some(error.into());
    }

    /// Marks the run cancelled.
    pub fn cancel(&mut self) {
        self.status = RunStatus::Cancelled;
        self.end_time = Some(Utc::now());
    }

    /// Returns the result for a job.
    #[must_use]
    pub fn job_result(&self, name: &str) -> Option<&JobResult> {
        self.job_results.get(name)
    }

    /// Records a job result, replacing any earlier one for the same job.
    pub fn record(&mut self, result: JobResult) {
        self.job_results.insert(result.job_name.clone(), result);
    }

    /// Returns one output of a job.
    #[must_use]
    pub fn output(&self, job_name: &str, key: &str) -> Option<&str> {
        self.job_results
            .get(job_name)
            .and_then(|r| r.outputs.get(key))
            .map(String::as_str)
    }

    /// Sum of all job costs.
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.job_results.values().filter_map(|r| r.cost).sum()
    }

    /// Sum of all job token totals.
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.job_results.values().filter_map(JobResult::total_tokens).sum()
    }

    #[must_use]
    pub fn total_input_tokens(&self) -> u64 {
        self.job_results.values().filter_map(|r| r.input_tokens).sum()
    }

    #[must_use]
    pub fn total_output_tokens(&self) -> u64 {
        self.job_results.values().filter_map(|r| r.output_tokens).sum()
    }

    /// Number of jobs with the given status.
    #[must_use]
    pub fn count(&self, status: JobStatus) -> usize {
        self.job_results
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    #[must_use]
    pub fn completed_job_count(&self) -> usize {
        self.count(JobStatus::Completed)
    }

    #[must_use]
    pub fn failed_job_count(&self) -> usize {
        self.count(JobStatus::Failed)
    }

    #[must_use]
    pub fn skipped_job_count(&self) -> usize {
        self.count(JobStatus::Skipped)
    }

    /// Returns true when every job reached a terminal state.
    #[must_use]
    pub fn all_jobs_finished(&self) -> bool {
        self.job_results.values().all(JobResult::is_finished)
    }

    /// Wall time of the run in seconds, once it has ended.
    #[must_use]
    pub fn duration(&self) -> Option<f64> {
        Some(seconds_between(self.start_time, self.end_time?))
    }

    /// Human-readable multi-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Workflow: {}", self.workflow_name),
            format!("Status: {}", self.status),
            format!("Run ID: {}", self.id),
        ];
        if let Some(duration) = self.duration() {
            lines.push(format!("Duration: {duration:.1}s"));
        }

        lines.push(String::new());
        lines.push("Jobs:".to_string());
        for (name, result) in &self.job_results {
            let mut line = format!("  {} {name}: {}", result.status.icon(), result.status);
            if let Some(duration) = result.duration() {
                line.push_str(&format!(" ({duration:.1}s)"));
            }
            if let Some(cost) = result.cost {
                line.push_str(&format!(" ${cost:.4}"));
            }
            lines.push(line);

            if result.status == JobStatus::Failed
                && let Some(error) = &result.error_message
            {
                lines.push(format!("      Error: {error}"));
            }
        }

        lines.push(String::new());
        lines.push(format!("Total Cost: ${:.4}", self.total_cost()));
        lines.push(format!(
            "Total Tokens: {} ({} input, {} output)",
            self.total_tokens(),
            self.total_input_tokens(),
            self.total_output_tokens()
        ));
        lines.join("\n")
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}
