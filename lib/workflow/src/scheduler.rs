//! Workflow scheduler.
//!
//! The scheduler runs the control loop for one workflow run:
//! 1. Start every pending job whose dependencies are all settled
//! 2. Wait for a running job to finish, in completion order
//! 3. Publish its outputs and status into the shared context
//! 4. Persist the run and cascade-skip dependents of failed jobs
//! 5. Finalize the run once nothing is pending or running
//!
//! Jobs run as futures in a `FuturesUnordered`, each holding a semaphore
//! permit taken by the loop. Only the loop mutates the context and the run;
//! each job sees a snapshot of the context taken when it starts, which
//! includes every job that settled before it got its permit.

use crate::definition::Workflow;
use crate::error::SchedulerError;
use crate::execution::{JobResult, JobStatus, WorkflowRun};
use crate::executor::AgentExecutor;
use crate::expression::ExpressionContext;
use crate::job::{JobRequest, JobRunner};
use crate::shell::ShellRunner;
use crate::store::WorkflowStore;
use crate::template::TemplateStore;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Semaphore;

/// Observer notified whenever a job changes status.
pub type StatusCallback<'a> = &'a (dyn Fn(&str, JobStatus) + Send + Sync);

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_keep_runs() -> usize {
    50
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of jobs running at once. Values below 1 act as 1.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Number of most recent runs kept per workflow.
    #[serde(default = "default_keep_runs")]
    pub keep_runs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            keep_runs: default_keep_runs(),
        }
    }
}

/// Per-run options.
#[derive(Clone, Copy, Default)]
pub struct RunOptions<'a> {
    /// Assemble instructions without dispatching them.
    pub dry_run: bool,
    /// Run only this job, ignoring its dependencies.
    pub single_job: Option<&'a str>,
    pub callback: Option<StatusCallback<'a>>,
}

impl<'a> RunOptions<'a> {
    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    #[must_use]
    pub fn only(mut self, job_name: &'a str) -> Self {
        self.single_job = Some(job_name);
        self
    }

    #[must_use]
    pub fn on_status(mut self, callback: StatusCallback<'a>) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// Drives workflow runs.
pub struct Scheduler<W, E, T, S>
where
    W: WorkflowStore,
    E: AgentExecutor,
    T: TemplateStore,
    S: ShellRunner,
{
    store: W,
    runner: JobRunner<E, T, S>,
    config: SchedulerConfig,
}

impl<W, E, T, S> Scheduler<W, E, T, S>
where
    W: WorkflowStore,
    E: AgentExecutor,
    T: TemplateStore,
    S: ShellRunner,
{
    pub fn new(store: W, runner: JobRunner<E, T, S>, config: SchedulerConfig) -> Self {
        Self {
            store,
            runner,
            config,
        }
    }

    /// Returns the store.
    pub fn store(&self) -> &W {
        &self.store
    }

    /// Loads a workflow by name, validates it and runs it.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow cannot be loaded or is structurally
    /// invalid. Job failures are reported in the returned run.
    pub async fn run_by_name(
        &self,
        name: &str,
        options: RunOptions<'_>,
    ) -> Result<WorkflowRun, Report<SchedulerError>> {
        let workflow =
            self.store
                .load_workflow(name)
                .await
                .map_err(|e| SchedulerError::Load {
                    workflow: name.to_string(),
                    reason: e.to_string(),
                })?;
        workflow.validate().map_err(SchedulerError::from)?;
        Ok(self.run(&workflow, options).await)
    }

    /// Runs a workflow to completion and returns the finalized run.
    ///
    /// The run is persisted when it starts, after every job settles and once
    /// more at the end. Errors from the final save and from pruning old runs
    /// are logged.
    pub async fn run(&self, workflow: &Workflow, options: RunOptions<'_>) -> WorkflowRun {
        let job_names: Vec<String> = match options.single_job {
            Some(name) => vec![name.to_string()],
            None => workflow.job_names().map(String::from).collect(),
        };
        let mut run = WorkflowRun::new(&workflow.name, job_names, options.dry_run);
        run.start();
        tracing::info!(
            workflow = %workflow.name,
            run_id = %run.id,
            dry_run = options.dry_run,
            "workflow run started"
        );

        let outcome = match self.persist(&run).await {
            Ok(()) => match options.single_job {
                Some(name) => self.run_single(workflow, &mut run, name, options).await,
                None => {
                    self.run_all(
                        workflow,
                        &mut run,
                        self.config.max_concurrent_jobs,
                        options.dry_run,
                        options.callback,
                    )
                    .await
                }
            },
            Err(e) => Err(e),
        };

        let failed = run.failed_job_count();
        match outcome {
            Err(e) => run.fail(e.to_string()),
            Ok(()) if failed > 0 => run.fail(format!("{failed} job(s) failed")),
            Ok(()) => run.complete(),
        }
        tracing::info!(
            workflow = %workflow.name,
            run_id = %run.id,
            status = %run.status,
            cost = run.total_cost(),
            "workflow run finished"
        );

        if let Err(e) = self.store.save_run(&run).await {
            tracing::error!(run_id = %run.id, error = %e, "failed to save final run record");
        }
        match self
            .store
            .prune_runs(&workflow.name, self.config.keep_runs)
            .await
        {
            Ok(0) => {}
            Ok(pruned) => tracing::debug!(workflow = %workflow.name, pruned, "pruned old runs"),
            Err(e) => tracing::warn!(workflow = %workflow.name, error = %e, "failed to prune runs"),
        }
        run
    }

    /// Runs every job of `workflow`, recording results into `run`.
    ///
    /// At most `concurrency_limit` jobs run at once. A job becomes ready when
    /// every job it needs has completed or been skipped. When a job fails, all
    /// of its pending transitive dependents are skipped. Jobs that can never
    /// become ready are skipped at the end.
    ///
    /// # Errors
    ///
    /// Returns an error if the run cannot be persisted. Results recorded
    /// before the error are kept in `run`.
    pub async fn run_all(
        &self,
        workflow: &Workflow,
        run: &mut WorkflowRun,
        concurrency_limit: usize,
        dry_run: bool,
        callback: Option<StatusCallback<'_>>,
    ) -> Result<(), SchedulerError> {
        let semaphore = Semaphore::new(concurrency_limit.max(1));
        let log_dir = self.store.run_log_directory(&workflow.name, run.id);
        let run_id = run.id;

        let mut pending: BTreeSet<String> = workflow.job_names().map(String::from).collect();
        let mut statuses: HashMap<String, JobStatus> = HashMap::new();
        let mut ctx = ExpressionContext::new();
        let mut tokens: HashMap<String, String> = HashMap::new();
        let mut running = FuturesUnordered::new();

        loop {
            let ready: Vec<String> = pending
                .iter()
                .filter(|name| {
                    workflow.job(name).is_some_and(|job| {
                        job.needs.iter().all(|dependency| {
                            statuses
                                .get(dependency)
                                .is_some_and(JobStatus::satisfies_dependents)
                        })
                    })
                })
                .cloned()
                .collect();

            for name in ready {
                let Some(job) = workflow.job(&name) else {
                    continue;
                };
                // Jobs without a free permit stay pending and are reconsidered
                // after the next completion, against the context as it is then.
                let Ok(permit) = semaphore.try_acquire() else {
                    break;
                };
                pending.remove(&name);
                notify(callback, &name, JobStatus::Running);
                let snapshot = ctx.clone();
                let tokens = tokens.clone();
                let log_dir = log_dir.clone();
                let runner = &self.runner;
                running.push(async move {
                    let _permit = permit;
                    let request = JobRequest {
                        job_name: &name,
                        job,
                        workflow,
                        log_dir: &log_dir,
                        dry_run,
                        run_id: Some(run_id),
                        continuation_tokens: &tokens,
                    };
                    runner.run(request, snapshot).await
                });
            }

            if running.is_empty() {
                for name in std::mem::take(&mut pending) {
                    tracing::warn!(job = %name, "skipping job with unsatisfied dependencies");
                    let mut result = JobResult::new(&name);
                    result.mark_skipped(Some("dependencies not satisfied"));
                    run.record(result);
                    notify(callback, &name, JobStatus::Skipped);
                }
                break;
            }

            let Some(result) = running.next().await else {
                break;
            };
            let name = result.job_name.clone();
            let status = result.status;
            tracing::info!(job = %name, status = %status, "job settled");

            ctx.set_outputs(&name, result.outputs.clone());
            ctx.set_status(&name, status);
            statuses.insert(name.clone(), status);
            if let Some(token) = &result.session_id {
                tokens.insert(name.clone(), token.clone());
            }
            run.record(result);
            self.persist(run).await?;
            notify(callback, &name, status);

            if status == JobStatus::Failed {
                let skipped = cascade_skip(workflow, &name, &mut pending);
                if skipped.is_empty() {
                    continue;
                }
                let mut skipped_names = Vec::with_capacity(skipped.len());
                for result in skipped {
                    let skipped_name = result.job_name.clone();
                    tracing::info!(job = %skipped_name, failed = %name, "skipping dependent of failed job");
                    ctx.set_status(&skipped_name, JobStatus::Skipped);
                    statuses.insert(skipped_name.clone(), JobStatus::Skipped);
                    run.record(result);
                    skipped_names.push(skipped_name);
                }
                self.persist(run).await?;
                for skipped_name in skipped_names {
                    notify(callback, &skipped_name, JobStatus::Skipped);
                }
            }
        }
        Ok(())
    }

    /// Runs one job by itself.
    async fn run_single(
        &self,
        workflow: &Workflow,
        run: &mut WorkflowRun,
        name: &str,
        options: RunOptions<'_>,
    ) -> Result<(), SchedulerError> {
        let Some(job) = workflow.job(name) else {
            let mut result = JobResult::new(name);
            result.mark_failed(format!("Job '{name}' not found"));
            run.record(result);
            notify(options.callback, name, JobStatus::Failed);
            return Ok(());
        };
        if job.has_dependencies() {
            tracing::warn!(
                job = %name,
                needs = ?job.needs,
                "running single job without its dependencies"
            );
        }

        notify(options.callback, name, JobStatus::Running);
        let log_dir = self.store.run_log_directory(&workflow.name, run.id);
        let tokens = HashMap::new();
        let request = JobRequest {
            job_name: name,
            job,
            workflow,
            log_dir: &log_dir,
            dry_run: options.dry_run,
            run_id: Some(run.id),
            continuation_tokens: &tokens,
        };
        let result = self.runner.run(request, ExpressionContext::new()).await;
        let status = result.status;
        run.record(result);
        self.persist(run).await?;
        notify(options.callback, name, status);
        Ok(())
    }

    async fn persist(&self, run: &WorkflowRun) -> Result<(), SchedulerError> {
        self.store
            .save_run(run)
            .await
            .map_err(|e| SchedulerError::Persist {
                reason: e.to_string(),
            })
    }
}

fn notify(callback: Option<StatusCallback<'_>>, name: &str, status: JobStatus) {
    if let Some(callback) = callback {
        callback(name, status);
    }
}

/// Removes every pending transitive dependent of `failed` and returns a
/// skipped result for each, naming the dependency that failed or was skipped
/// before it. Dependents are visited depth-first in lexical order.
fn cascade_skip(workflow: &Workflow, failed: &str, pending: &mut BTreeSet<String>) -> Vec<JobResult> {
    let mut skipped = Vec::new();
    let mut stack: Vec<(String, Vec<String>, usize)> =
        vec![(failed.to_string(), workflow.dependents(failed), 0)];

    while let Some(frame) = stack.last_mut() {
        let Some(child) = frame.1.get(frame.2).cloned() else {
            stack.pop();
            continue;
        };
        frame.2 += 1;
        if !pending.remove(&child) {
            continue;
        }
        let mut result = JobResult::new(&child);
        result.mark_skipped(Some(&format!("dependency '{}' failed", frame.0)));
        skipped.push(result);
        let grandchildren = workflow.dependents(&child);
        stack.push((child, grandchildren, 0));
    }
    skipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Job;
    use crate::execution::RunStatus;
    use crate::executor::{AgentError, AgentResponse, ExecutorConfig};
    use crate::store::StoreError;
    use crate::template::{AgentTemplate, TemplateError};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use taskloom_core::RunId;

    /// Executor double. Prompts containing "FAIL" fail; every other prompt
    /// echoes back as the response with a `<value>` tag holding the prompt.
    #[derive(Clone, Default)]
    struct ScriptedExecutor {
        prompts: Arc<Mutex<Vec<String>>>,
        tokens: Arc<Mutex<Vec<Option<String>>>>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl AgentExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            prompt: &str,
            _config: &ExecutorConfig,
            _log_file: &Path,
            continuation_token: Option<&str>,
        ) -> Result<AgentResponse, AgentError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            self.prompts.lock().unwrap().push(prompt.to_string());
            self.tokens
                .lock()
                .unwrap()
                .push(continuation_token.map(String::from));
            if prompt.contains("FAIL") {
                return Err(AgentError::Failed {
                    reason: "executor exploded".to_string(),
                });
            }
            let first_line = prompt.lines().next().unwrap_or_default();
            Ok(AgentResponse {
                result: format!("<value>{first_line}</value>"),
                session_id: Some(format!("session-{first_line}")),
                cost_usd: Some(0.5),
                ..AgentResponse::default()
            })
        }
    }

    struct NoTemplates;

    #[async_trait]
    impl TemplateStore for NoTemplates {
        async fn load_agent(&self, name: &str) -> Result<AgentTemplate, TemplateError> {
            Err(TemplateError::NotFound {
                name: name.to_string(),
            })
        }
    }

    struct QuietShell;

    #[async_trait]
    impl crate::shell::ShellRunner for QuietShell {
        async fn run(&self, _command: &str, _working_dir: &Path) -> String {
            crate::shell::NO_OUTPUT.to_string()
        }
    }

    /// Store double keeping workflows and saved runs in memory.
    #[derive(Clone, Default)]
    struct InMemoryStore {
        workflows: Arc<Mutex<Vec<Workflow>>>,
        saved: Arc<Mutex<Vec<WorkflowRun>>>,
        fail_saves_after: Option<usize>,
        log_root: PathBuf,
    }

    impl InMemoryStore {
        fn new(log_root: &Path) -> Self {
            Self {
                log_root: log_root.to_path_buf(),
                ..Self::default()
            }
        }

        fn save_count(&self) -> usize {
            self.saved.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl WorkflowStore for InMemoryStore {
        async fn load_workflow(&self, name: &str) -> Result<Workflow, StoreError> {
            self.workflows
                .lock()
                .unwrap()
                .iter()
                .find(|w| w.name == name)
                .cloned()
                .ok_or_else(|| StoreError::WorkflowNotFound {
                    name: name.to_string(),
                })
        }

        async fn save_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
            let mut saved = self.saved.lock().unwrap();
            if self.fail_saves_after.is_some_and(|limit| saved.len() >= limit) {
                return Err(StoreError::Io {
                    path: self.log_root.clone(),
                    reason: "disk full".to_string(),
                });
            }
            saved.push(run.clone());
            Ok(())
        }

        async fn list_runs(
            &self,
            workflow: &str,
            limit: usize,
        ) -> Result<Vec<WorkflowRun>, StoreError> {
            Ok(self
                .saved
                .lock()
                .unwrap()
                .iter()
                .rev()
                .filter(|r| r.workflow_name == workflow)
                .take(limit)
                .cloned()
                .collect())
        }

        fn run_log_directory(&self, workflow: &str, run_id: RunId) -> PathBuf {
            self.log_root.join(workflow).join(run_id.to_string())
        }

        async fn prune_runs(&self, _workflow: &str, _keep: usize) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    type TestScheduler = Scheduler<InMemoryStore, ScriptedExecutor, NoTemplates, QuietShell>;

    struct Harness {
        store: InMemoryStore,
        executor: ScriptedExecutor,
        scheduler: TestScheduler,
        _logs: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self::build(ScriptedExecutor::default(), SchedulerConfig::default(), None)
        }

        fn build(
            executor: ScriptedExecutor,
            config: SchedulerConfig,
            fail_saves_after: Option<usize>,
        ) -> Self {
            let logs = tempfile::tempdir().expect("tempdir");
            let mut store = InMemoryStore::new(logs.path());
            store.fail_saves_after = fail_saves_after;
            let runner = JobRunner::new(executor.clone(), NoTemplates, QuietShell);
            Self {
                scheduler: Scheduler::new(store.clone(), runner, config),
                store,
                executor,
                _logs: logs,
            }
        }
    }

    /// Records every status notification.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, JobStatus)>>,
    }

    impl Recorder {
        fn record(&self, name: &str, status: JobStatus) {
            self.events.lock().unwrap().push((name.to_string(), status));
        }

        fn events(&self) -> Vec<(String, JobStatus)> {
            self.events.lock().unwrap().clone()
        }
    }

    fn status(run: &WorkflowRun, job: &str) -> JobStatus {
        run.job_result(job).expect("job result").status
    }

    fn error(run: &WorkflowRun, job: &str) -> Option<String> {
        run.job_result(job).expect("job result").error_message.clone()
    }

    #[tokio::test]
    async fn diamond_passes_outputs_downstream() {
        let harness = Harness::new();
        let workflow = Workflow::new("diamond")
            .with_job("a", Job::with_prompt("A").reporting(["value"]))
            .with_job(
                "b",
                Job::with_prompt("B got ${{ jobs.a.outputs.value }}").needs(["a"]),
            )
            .with_job("c", Job::with_prompt("C").needs(["a"]))
            .with_job("d", Job::with_prompt("D").needs(["b", "c"]));

        let run = harness.scheduler.run(&workflow, RunOptions::default()).await;

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.completed_job_count(), 4);
        assert_eq!(run.output("a", "value"), Some("A"));
        assert_eq!(run.total_cost(), 2.0);

        let prompts = harness.executor.prompts.lock().unwrap().clone();
        assert_eq!(prompts.first().map(String::as_str), Some("A\n\nIMPORTANT: At the end of your response, provide the following outputs in this exact format:\n\n<value>your value here</value>\n\nRequired outputs:\n- value\n"));
        assert!(prompts.contains(&"B got A".to_string()));
        assert_eq!(prompts.last().map(String::as_str), Some("D"));
    }

    #[tokio::test]
    async fn failure_cascades_to_transitive_dependents() {
        let harness = Harness::new();
        let recorder = Recorder::default();
        let callback = |name: &str, status: JobStatus| recorder.record(name, status);
        let workflow = Workflow::new("cascade")
            .with_job("a", Job::with_prompt("FAIL"))
            .with_job("b", Job::with_prompt("B").needs(["a"]))
            .with_job("c", Job::with_prompt("C").needs(["b"]))
            .with_job("independent", Job::with_prompt("I"));

        let run = harness
            .scheduler
            .run(&workflow, RunOptions::default().on_status(&callback))
            .await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("1 job(s) failed"));
        assert_eq!(status(&run, "a"), JobStatus::Failed);
        assert_eq!(error(&run, "a").as_deref(), Some("executor exploded"));
        assert_eq!(status(&run, "b"), JobStatus::Skipped);
        assert_eq!(
            error(&run, "b").as_deref(),
            Some("Skipped: dependency 'a' failed")
        );
        assert_eq!(
            error(&run, "c").as_deref(),
            Some("Skipped: dependency 'b' failed")
        );
        assert_eq!(status(&run, "independent"), JobStatus::Completed);

        let events = recorder.events();
        assert!(events.contains(&("a".to_string(), JobStatus::Running)));
        assert!(events.contains(&("a".to_string(), JobStatus::Failed)));
        assert!(events.contains(&("b".to_string(), JobStatus::Skipped)));
        assert!(events.contains(&("c".to_string(), JobStatus::Skipped)));
        assert!(!events.contains(&("b".to_string(), JobStatus::Running)));
    }

    #[tokio::test]
    async fn cascade_names_first_failed_path_for_shared_dependents() {
        let workflow = Workflow::new("wf")
            .with_job("a", Job::with_prompt("A"))
            .with_job("b", Job::with_prompt("B").needs(["a"]))
            .with_job("c", Job::with_prompt("C").needs(["a"]))
            .with_job("d", Job::with_prompt("D").needs(["c", "b"]));
        let mut pending: BTreeSet<String> = ["b", "c", "d"].into_iter().map(String::from).collect();

        let skipped = cascade_skip(&workflow, "a", &mut pending);

        let reasons: Vec<(String, Option<String>)> = skipped
            .into_iter()
            .map(|r| (r.job_name, r.error_message))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("b".to_string(), Some("Skipped: dependency 'a' failed".to_string())),
                ("d".to_string(), Some("Skipped: dependency 'b' failed".to_string())),
                ("c".to_string(), Some("Skipped: dependency 'a' failed".to_string())),
            ]
        );
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn guard_skip_lets_dependents_run() {
        let harness = Harness::new();
        let workflow = Workflow::new("wf")
            .with_job("check", Job::with_prompt("check").reporting(["value"]))
            .with_job(
                "fix",
                Job::with_prompt("fix")
                    .needs(["check"])
                    .when("jobs.check.outputs.value == 'broken'"),
            )
            .with_job("notify", Job::with_prompt("notify").needs(["fix"]));

        let run = harness.scheduler.run(&workflow, RunOptions::default()).await;

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(status(&run, "fix"), JobStatus::Skipped);
        assert_eq!(status(&run, "notify"), JobStatus::Completed);
    }

    fn single_slot() -> Harness {
        let config = SchedulerConfig {
            max_concurrent_jobs: 1,
            ..SchedulerConfig::default()
        };
        Harness::build(ScriptedExecutor::default(), config, None)
    }

    #[tokio::test]
    async fn failure_builtin_sees_failed_sibling() {
        // One slot: `a` settles before `b`, and `b` before `cleanup` starts.
        let harness = single_slot();
        let workflow = Workflow::new("wf")
            .with_job("a", Job::with_prompt("FAIL"))
            .with_job("b", Job::with_prompt("B"))
            .with_job(
                "cleanup",
                Job::with_prompt("cleanup")
                    .needs(["b"])
                    .when("failure() && jobs.a.status == 'failed'"),
            );

        let run = harness.scheduler.run(&workflow, RunOptions::default()).await;

        assert_eq!(status(&run, "a"), JobStatus::Failed);
        assert_eq!(status(&run, "cleanup"), JobStatus::Completed);
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn queued_job_guard_sees_jobs_settled_while_waiting() {
        let harness = single_slot();
        let workflow = Workflow::new("wf")
            .with_job("a", Job::with_prompt("FAIL"))
            .with_job(
                "z",
                Job::with_prompt("recover").when("failure() && jobs.a.status == 'failed'"),
            );

        let run = harness.scheduler.run(&workflow, RunOptions::default()).await;

        assert_eq!(status(&run, "a"), JobStatus::Failed);
        assert_eq!(status(&run, "z"), JobStatus::Completed, "{:?}", error(&run, "z"));
        assert_eq!(
            harness.executor.prompts.lock().unwrap().clone(),
            vec!["FAIL", "recover"]
        );
    }

    #[tokio::test]
    async fn queued_job_interpolates_outputs_settled_while_waiting() {
        let harness = single_slot();
        let workflow = Workflow::new("wf")
            .with_job("a", Job::with_prompt("alpha").reporting(["value"]))
            .with_job("b", Job::with_prompt("saw ${{ jobs.a.outputs.value }}"));

        harness.scheduler.run(&workflow, RunOptions::default()).await;

        let prompts = harness.executor.prompts.lock().unwrap().clone();
        assert_eq!(prompts.last().map(String::as_str), Some("saw alpha"));
    }

    #[tokio::test]
    async fn concurrency_limit_is_respected() {
        let executor = ScriptedExecutor {
            delay: Some(Duration::from_millis(20)),
            ..ScriptedExecutor::default()
        };
        let config = SchedulerConfig {
            max_concurrent_jobs: 2,
            ..SchedulerConfig::default()
        };
        let harness = Harness::build(executor, config, None);
        let mut workflow = Workflow::new("wide");
        for name in ["a", "b", "c", "d", "e", "f"] {
            workflow = workflow.with_job(name, Job::with_prompt(name));
        }

        let run = harness.scheduler.run(&workflow, RunOptions::default()).await;

        assert_eq!(run.completed_job_count(), 6);
        let max = harness.executor.max_active.load(Ordering::SeqCst);
        assert!(max <= 2, "saw {max} concurrent jobs");
        assert!(max >= 1);
    }

    #[tokio::test]
    async fn zero_concurrency_acts_as_one() {
        let executor = ScriptedExecutor {
            delay: Some(Duration::from_millis(5)),
            ..ScriptedExecutor::default()
        };
        let config = SchedulerConfig {
            max_concurrent_jobs: 0,
            ..SchedulerConfig::default()
        };
        let harness = Harness::build(executor, config, None);
        let workflow = Workflow::new("wf")
            .with_job("a", Job::with_prompt("a"))
            .with_job("b", Job::with_prompt("b"));

        let run = harness.scheduler.run(&workflow, RunOptions::default()).await;

        assert_eq!(run.completed_job_count(), 2);
        assert_eq!(harness.executor.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsatisfiable_dependencies_are_skipped() {
        let harness = Harness::new();
        let mut run = WorkflowRun::new("wf", ["a", "b"], false);
        let workflow = Workflow::new("wf")
            .with_job("a", Job::with_prompt("a"))
            .with_job("b", Job::with_prompt("b").needs(["ghost"]));

        harness
            .scheduler
            .run_all(&workflow, &mut run, 4, false, None)
            .await
            .expect("run_all");

        assert_eq!(status(&run, "a"), JobStatus::Completed);
        assert_eq!(status(&run, "b"), JobStatus::Skipped);
        assert_eq!(
            error(&run, "b").as_deref(),
            Some("Skipped: dependencies not satisfied")
        );
    }

    #[tokio::test]
    async fn continuation_tokens_flow_to_later_jobs() {
        let harness = Harness::new();
        let workflow = Workflow::new("wf")
            .with_job("plan", Job::with_prompt("plan"))
            .with_job("build", Job::with_prompt("build").needs(["plan"]).continuing("plan"));

        harness.scheduler.run(&workflow, RunOptions::default()).await;

        let tokens = harness.executor.tokens.lock().unwrap().clone();
        assert_eq!(tokens, vec![None, Some("session-plan".to_string())]);
    }

    #[tokio::test]
    async fn persistence_failure_fails_run_but_keeps_results() {
        // Start save succeeds, the save after the first job fails.
        let harness = Harness::build(
            ScriptedExecutor::default(),
            SchedulerConfig::default(),
            Some(1),
        );
        let workflow = Workflow::new("wf")
            .with_job("a", Job::with_prompt("a"))
            .with_job("b", Job::with_prompt("b").needs(["a"]));

        let run = harness.scheduler.run(&workflow, RunOptions::default()).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.error_message.as_deref(),
            Some(format!("failed to save run: {}: disk full", harness.store.log_root.display()).as_str())
        );
        assert_eq!(status(&run, "a"), JobStatus::Completed);
        assert_eq!(status(&run, "b"), JobStatus::Pending);
    }

    #[tokio::test]
    async fn run_is_saved_at_start_per_job_and_at_end() {
        let harness = Harness::new();
        let workflow = Workflow::new("wf")
            .with_job("a", Job::with_prompt("a"))
            .with_job("b", Job::with_prompt("b"));

        harness.scheduler.run(&workflow, RunOptions::default()).await;

        assert_eq!(harness.store.save_count(), 4);
        let saved = harness.store.saved.lock().unwrap();
        assert_eq!(saved[0].status, RunStatus::Running);
        assert_eq!(saved[3].status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn cascade_skips_are_saved_before_the_final_save() {
        let harness = Harness::new();
        let workflow = Workflow::new("wf")
            .with_job("a", Job::with_prompt("FAIL"))
            .with_job("b", Job::with_prompt("b").needs(["a"]));

        harness.scheduler.run(&workflow, RunOptions::default()).await;

        let saved = harness.store.saved.lock().unwrap();
        assert_eq!(saved.len(), 4);
        let after_failure = &saved[1];
        assert_eq!(status(after_failure, "a"), JobStatus::Failed);
        assert_eq!(status(after_failure, "b"), JobStatus::Pending);
        let after_cascade = &saved[2];
        assert_eq!(status(after_cascade, "b"), JobStatus::Skipped);
        assert_eq!(after_cascade.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn single_job_ignores_dependencies() {
        let harness = Harness::new();
        let workflow = Workflow::new("wf")
            .with_job("a", Job::with_prompt("a"))
            .with_job("b", Job::with_prompt("b").needs(["a"]));

        let run = harness
            .scheduler
            .run(&workflow, RunOptions::default().only("b"))
            .await;

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.job_results.len(), 1);
        assert_eq!(status(&run, "b"), JobStatus::Completed);
        assert_eq!(harness.executor.prompts.lock().unwrap().clone(), vec!["b"]);
    }

    #[tokio::test]
    async fn single_unknown_job_fails() {
        let harness = Harness::new();
        let workflow = Workflow::new("wf").with_job("a", Job::with_prompt("a"));

        let run = harness
            .scheduler
            .run(&workflow, RunOptions::default().only("ghost"))
            .await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(error(&run, "ghost").as_deref(), Some("Job 'ghost' not found"));
    }

    #[tokio::test]
    async fn dry_run_dispatches_nothing() {
        let harness = Harness::new();
        let workflow = Workflow::new("wf")
            .with_job("a", Job::with_prompt("a"))
            .with_job("b", Job::with_prompt("b").needs(["a"]));

        let run = harness
            .scheduler
            .run(&workflow, RunOptions::default().dry_run())
            .await;

        assert!(run.is_dry_run);
        assert_eq!(run.completed_job_count(), 2);
        assert!(harness.executor.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_by_name_rejects_invalid_workflows() {
        let harness = Harness::new();
        harness.store.workflows.lock().unwrap().push(
            Workflow::new("loop")
                .with_job("a", Job::with_prompt("a").needs(["b"]))
                .with_job("b", Job::with_prompt("b").needs(["a"])),
        );

        let err = harness
            .scheduler
            .run_by_name("loop", RunOptions::default())
            .await
            .expect_err("cycle");
        assert!(err.to_string().contains("circular dependency detected"));

        let err = harness
            .scheduler
            .run_by_name("missing", RunOptions::default())
            .await
            .expect_err("missing");
        assert!(err.to_string().contains("failed to load workflow 'missing'"));
    }
}
