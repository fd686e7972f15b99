//! Single-job execution.
//!
//! The job runner:
//! 1. Creates the job's scratch directory and scopes the context to it
//! 2. Evaluates the guard expression
//! 3. Assembles the instruction (gathering side-channel context for goals)
//! 4. Dispatches once to the executor, unless this is a dry run
//! 5. Extracts declared outputs from the response

use crate::definition::{ExecutionMode, Job, Workflow};
use crate::executor::{AgentExecutor, ExecutorConfig, expand_home};
use crate::execution::JobResult;
use crate::expression::{self, ExpressionContext};
use crate::extract;
use crate::shell::ShellRunner;
use crate::template::TemplateStore;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use taskloom_core::RunId;

const PREVIEW_CHARS: usize = 200;
const GOALS_PREVIEW_CHARS: usize = 500;

/// Everything the runner needs to know about one job invocation.
#[derive(Debug, Clone, Copy)]
pub struct JobRequest<'a> {
    pub job_name: &'a str,
    pub job: &'a Job,
    pub workflow: &'a Workflow,
    /// Directory for the job's log file.
    pub log_dir: &'a Path,
    pub dry_run: bool,
    /// Run the job belongs to; enables the scratch directory.
    pub run_id: Option<RunId>,
    /// Continuation tokens of earlier jobs, keyed by job name.
    pub continuation_tokens: &'a HashMap<String, String>,
}

/// An assembled instruction and the settings to dispatch it with.
struct Dispatch {
    prompt: String,
    config: ExecutorConfig,
    preview: String,
}

/// Runs individual jobs against an executor.
pub struct JobRunner<E: AgentExecutor, T: TemplateStore, S: ShellRunner> {
    executor: E,
    templates: T,
    shell: S,
    scratch_root: Option<PathBuf>,
}

impl<E: AgentExecutor, T: TemplateStore, S: ShellRunner> JobRunner<E, T, S> {
    /// Creates a runner with no scratch root.
    pub fn new(executor: E, templates: T, shell: S) -> Self {
        Self {
            executor,
            templates,
            shell,
            scratch_root: None,
        }
    }

    /// Sets the root under which per-job scratch directories are created
    /// as `<root>/<run_id>/<job_name>`.
    #[must_use]
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// Runs one job. Failures are reported in the result, never raised.
    pub async fn run(&self, request: JobRequest<'_>, mut ctx: ExpressionContext) -> JobResult {
        let JobRequest { job_name, job, .. } = request;
        let mut result = JobResult::new(job_name);
        result.mark_started();
        tracing::info!(job = %job_name, dry_run = request.dry_run, "job started");

        match self.prepare_scratch_dir(job_name, request.run_id).await {
            Ok(Some(dir)) => {
                ctx.set_current_job(&dir);
                result.output_dir = Some(dir);
            }
            Ok(None) => ctx.clear_current_job(),
            Err(e) => {
                result.mark_failed(format!("Failed to create scratch directory: {e}"));
                return result;
            }
        }

        if let Some(condition) = &job.if_condition {
            match expression::evaluate(condition, &ctx) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(job = %job_name, condition = %condition, "job skipped by condition");
                    result.mark_skipped(Some(&format!(
                        "Condition '{condition}' evaluated to false"
                    )));
                    return result;
                }
                Err(e) => {
                    result.mark_failed(format!("Failed to evaluate condition: {e}"));
                    return result;
                }
            }
        }

        let dispatch = match job.execution_mode() {
            Some(ExecutionMode::Goals(goals)) => {
                self.assemble_goals(&request, goals, &ctx, result.output_dir.as_deref())
                    .await
            }
            Some(ExecutionMode::Agent(agent)) => self.assemble_agent(&request, agent, &ctx).await,
            Some(ExecutionMode::Prompt(prompt)) => Ok(assemble_prompt(&request, prompt, &ctx)),
            None => Err(format!(
                "Job '{job_name}' has neither 'agent' nor 'prompt' defined"
            )),
        };
        let dispatch = match dispatch {
            Ok(dispatch) => dispatch,
            Err(e) => {
                result.mark_failed(e);
                return result;
            }
        };

        if request.dry_run {
            result.mark_completed(BTreeMap::new(), Some(dispatch.preview));
            return result;
        }

        self.dispatch(&request, dispatch, result).await
    }

    async fn prepare_scratch_dir(
        &self,
        job_name: &str,
        run_id: Option<RunId>,
    ) -> std::io::Result<Option<PathBuf>> {
        let (Some(root), Some(run_id)) = (&self.scratch_root, run_id) else {
            return Ok(None);
        };
        let dir = root.join(run_id.to_string()).join(job_name);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Some(dir))
    }

    async fn assemble_goals(
        &self,
        request: &JobRequest<'_>,
        goals: &[String],
        ctx: &ExpressionContext,
        output_dir: Option<&Path>,
    ) -> Result<Dispatch, String> {
        let JobRequest {
            job_name,
            job,
            workflow,
            ..
        } = *request;
        let working_dir = expand_home(&workflow.working_directory(job_name));

        let gathered: Vec<(String, String)> = match &job.context {
            Some(commands) if request.dry_run => commands
                .iter()
                .map(|(name, command)| {
                    (name.to_string(), format!("[DRY RUN] Would run: {command}"))
                })
                .collect(),
            Some(commands) => {
                let working_dir = &working_dir;
                join_all(commands.iter().map(|(name, command)| async move {
                    tracing::debug!(job = %job_name, context = %name, "gathering context");
                    (name.to_string(), self.shell.run(command, working_dir).await)
                }))
                .await
            }
            None => Vec::new(),
        };

        let mut prompt = goals_prompt(goals, &gathered, output_dir, ctx);
        let outputs = job.declared_outputs();
        if !outputs.is_empty() {
            match output_dir {
                Some(dir) => prompt.push_str(&extract::sidecar_instructions(outputs, dir)),
                None => prompt.push_str(&extract::output_instructions(outputs)),
            }
        }

        let mut config = ExecutorConfig::new(
            working_dir,
            workflow.allowed_tools(job_name),
            workflow.max_turns(job_name),
            workflow.max_budget(job_name),
        );
        config.permission_mode = workflow.permission_mode(job_name);
        config.model = workflow.model(job_name);

        let preview = format!(
            "[DRY RUN] Would execute with context:\n{}...",
            truncate(&prompt, GOALS_PREVIEW_CHARS)
        );
        Ok(Dispatch {
            prompt,
            config,
            preview,
        })
    }

    async fn assemble_agent(
        &self,
        request: &JobRequest<'_>,
        agent: &str,
        ctx: &ExpressionContext,
    ) -> Result<Dispatch, String> {
        let JobRequest {
            job_name,
            job,
            workflow,
            ..
        } = *request;
        let template = self
            .templates
            .load_agent(agent)
            .await
            .map_err(|e| e.to_string())?;

        let working_dir = job
            .working_directory
            .clone()
            .unwrap_or(template.working_directory);
        let mut config = ExecutorConfig::new(
            expand_home(&working_dir),
            job.allowed_tools.clone().unwrap_or(template.allowed_tools),
            job.max_turns.unwrap_or(template.max_turns),
            job.max_budget_usd.unwrap_or(template.max_budget_usd),
        );
        config.permission_mode = workflow.permission_mode(job_name);
        config.model = workflow.model(job_name);
        config.extra_env = template.integrations.resolve_env();

        Ok(instruction(job, &template.prompt, ctx, config))
    }

    async fn dispatch(
        &self,
        request: &JobRequest<'_>,
        dispatch: Dispatch,
        mut result: JobResult,
    ) -> JobResult {
        let JobRequest {
            job_name,
            job,
            log_dir,
            ..
        } = *request;

        if let Err(e) = tokio::fs::create_dir_all(log_dir).await {
            result.mark_failed(format!(
                "Failed to create log directory {}: {e}",
                log_dir.display()
            ));
            return result;
        }
        let log_file = log_dir.join(format!("{job_name}.log"));
        let continuation_token = job
            .continue_session
            .as_ref()
            .and_then(|source| request.continuation_tokens.get(source))
            .map(String::as_str);

        tracing::debug!(
            job = %job_name,
            resume = continuation_token.is_some(),
            "dispatching to executor"
        );
        let response = match self
            .executor
            .execute(
                &dispatch.prompt,
                &dispatch.config,
                &log_file,
                continuation_token,
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(job = %job_name, error = %e, "executor failed");
                result.mark_failed(e.to_string());
                return result;
            }
        };

        result.update_stats(
            response.input_tokens,
            response.output_tokens,
            response.cost_usd,
        );
        result.log_file = Some(log_file);
        result.session_id = response.session_id;

        let declared = job.declared_outputs();
        let outputs = if declared.is_empty() {
            BTreeMap::new()
        } else {
            extract::extract_with_sidecar(&response.result, declared, result.output_dir.as_deref())
                .await
        };
        result.mark_completed(outputs, Some(response.result));
        tracing::info!(job = %job_name, cost = ?result.cost, "job completed");
        result
    }
}

/// Inline-prompt jobs use the workflow's settings.
fn assemble_prompt(request: &JobRequest<'_>, prompt: &str, ctx: &ExpressionContext) -> Dispatch {
    let JobRequest {
        job_name,
        job,
        workflow,
        ..
    } = *request;
    let mut config = ExecutorConfig::new(
        expand_home(&workflow.working_directory(job_name)),
        workflow.allowed_tools(job_name),
        workflow.max_turns(job_name),
        workflow.max_budget(job_name),
    );
    config.permission_mode = workflow.permission_mode(job_name);
    config.model = workflow.model(job_name);
    instruction(job, prompt, ctx, config)
}

/// Interpolates a single instruction and appends output instructions.
fn instruction(job: &Job, text: &str, ctx: &ExpressionContext, config: ExecutorConfig) -> Dispatch {
    let mut prompt = expression::interpolate(text, ctx);
    prompt.push_str(&extract::output_instructions(job.declared_outputs()));
    let preview = format!(
        "[DRY RUN] Would execute: {}...",
        truncate(&prompt, PREVIEW_CHARS)
    );
    Dispatch {
        prompt,
        config,
        preview,
    }
}

/// Builds the instruction for a goals-based job.
fn goals_prompt(
    goals: &[String],
    gathered: &[(String, String)],
    output_dir: Option<&Path>,
    ctx: &ExpressionContext,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !gathered.is_empty() {
        parts.push("## Current Context\n".to_string());
        for (name, output) in gathered {
            parts.push(format!("### {name}\n```\n{output}\n```\n"));
        }
    }

    if let Some(dir) = output_dir {
        parts.push("## Output Directory\n".to_string());
        parts.push(format!(
            "Your scratch directory for this job is: `{}`\n",
            dir.display()
        ));
        parts.push("Use this directory for any files you need to create.\n\n".to_string());
    }

    parts.push("## Goals\n".to_string());
    parts.push("Accomplish the following goals:\n".to_string());
    for (i, goal) in goals.iter().enumerate() {
        parts.push(format!("{}. {}\n", i + 1, expression::interpolate(goal, ctx)));
    }
    parts.push("\nUse your judgment on how best to achieve these goals. ".to_string());
    parts.push("You have full autonomy to determine the approach.\n".to_string());

    parts.join("\n")
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
