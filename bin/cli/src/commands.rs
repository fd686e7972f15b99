//! Subcommand handlers.
//!
//! Handlers write their report to `out`; live job progress goes to stderr.

use crate::config::AppConfig;
use crate::error::CliError;
use crate::{Cli, Command};
use std::io::Write;
use std::process::ExitCode;
use taskloom_agent::{ClaudeCli, SystemShell};
use taskloom_store::FileStore;
use taskloom_workflow::{
    JobRunner, JobStatus, RunOptions, RunStatus, Scheduler, Workflow, WorkflowStore, plan_report,
};

type CliResult<T> = taskloom_core::Result<T, CliError>;

/// Runs the parsed command line.
///
/// # Errors
///
/// Returns an error if configuration is invalid, a workflow cannot be
/// loaded, or the store fails. A run whose jobs fail is not an error; it
/// yields a failing exit code.
pub async fn execute(cli: Cli, out: &mut dyn Write) -> CliResult<ExitCode> {
    let config = AppConfig::load(cli.config.as_deref()).map_err(|e| CliError::Config {
        reason: e.to_string(),
    })?;
    let store = FileStore::new(&config.home);
    tracing::debug!(home = %config.home.display(), "using store");

    match cli.command {
        Command::Run {
            workflow,
            dry_run,
            job,
            json,
        } => run(&config, store, &workflow, dry_run, job.as_deref(), json, out).await,
        Command::Plan { workflow } => {
            let loaded = load_valid(&store, &workflow).await?;
            emit(out, &plan_report(&loaded))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { workflow } => {
            let loaded = load_valid(&store, &workflow).await?;
            emit(
                out,
                &format!(
                    "Workflow '{}' is valid ({} jobs)",
                    loaded.name,
                    loaded.jobs.len()
                ),
            )?;
            Ok(ExitCode::SUCCESS)
        }
        Command::List => list(&store, out).await,
        Command::Runs {
            workflow,
            limit,
            json,
        } => runs(&store, &workflow, limit, json, out).await,
        Command::Show { workflow, run_id } => {
            let run = store
                .load_run(&workflow, &run_id)
                .await
                .map_err(|e| store_error(&e))?;
            emit(out, &run.summary())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Delete { workflow } => {
            store
                .delete_workflow(&workflow)
                .await
                .map_err(|e| store_error(&e))?;
            emit(out, &format!("Deleted workflow '{workflow}'"))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::New { name, multi, force } => {
            if !force && store.load_workflow(&name).await.is_ok() {
                return Err(CliError::AlreadyExists { name }.into());
            }
            let workflow = if multi {
                Workflow::multi_job_template(&name)
            } else {
                Workflow::template(&name)
            };
            let path = store
                .save_workflow(&workflow)
                .await
                .map_err(|e| store_error(&e))?;
            emit(
                out,
                &format!("Created workflow '{name}' at {}", path.display()),
            )?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(
    config: &AppConfig,
    store: FileStore,
    workflow: &str,
    dry_run: bool,
    job: Option<&str>,
    json: bool,
    out: &mut dyn Write,
) -> CliResult<ExitCode> {
    let runner = JobRunner::new(
        ClaudeCli::new(&config.claude_path),
        store.clone(),
        SystemShell,
    )
    .with_scratch_root(config.scratch_root());
    let scheduler = Scheduler::new(store, runner, config.scheduler);

    let progress = |name: &str, status: JobStatus| {
        eprintln!("  {} {name}: {status}", status.icon());
    };
    let mut options = RunOptions::default().on_status(&progress);
    if dry_run {
        options = options.dry_run();
    }
    if let Some(job) = job {
        options = options.only(job);
    }

    let run = scheduler
        .run_by_name(workflow, options)
        .await
        .map_err(|e| CliError::Workflow {
            name: workflow.to_string(),
            reason: e.to_string(),
        })?;

    let report = if json {
        serde_json::to_string_pretty(&run).map_err(|e| output_error(&e))?
    } else {
        run.summary()
    };
    emit(out, &report)?;

    Ok(if run.status == RunStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn list(store: &FileStore, out: &mut dyn Write) -> CliResult<ExitCode> {
    let names = store
        .list_workflow_names()
        .await
        .map_err(|e| store_error(&e))?;
    if names.is_empty() {
        emit(out, "No workflows found")?;
        return Ok(ExitCode::SUCCESS);
    }
    for name in names {
        let line = match store.load_workflow(&name).await {
            Ok(workflow) => {
                let schedule = if workflow.triggers.has_schedule() {
                    " [scheduled]"
                } else {
                    ""
                };
                format!(
                    "{name} ({} jobs){schedule} {}",
                    workflow.jobs.len(),
                    workflow.description.as_deref().unwrap_or_default()
                )
            }
            Err(e) => format!("{name} (invalid: {e})"),
        };
        emit(out, line.trim_end())?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn runs(
    store: &FileStore,
    workflow: &str,
    limit: usize,
    json: bool,
    out: &mut dyn Write,
) -> CliResult<ExitCode> {
    let runs = store
        .list_runs(workflow, limit)
        .await
        .map_err(|e| store_error(&e))?;
    if json {
        let text = serde_json::to_string_pretty(&runs).map_err(|e| output_error(&e))?;
        emit(out, &text)?;
        return Ok(ExitCode::SUCCESS);
    }
    if runs.is_empty() {
        emit(out, &format!("No runs for workflow '{workflow}'"))?;
        return Ok(ExitCode::SUCCESS);
    }
    for run in runs {
        let duration = run
            .duration()
            .map_or_else(|| "-".to_string(), |d| format!("{d:.1}s"));
        let dry = if run.is_dry_run { " (dry run)" } else { "" };
        emit(
            out,
            &format!(
                "{}  {:<9}  {}  {duration:>8}  ${:.4}{dry}",
                run.id,
                run.status.as_str(),
                run.start_time.format("%Y-%m-%d %H:%M:%S"),
                run.total_cost()
            ),
        )?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn load_valid(store: &FileStore, name: &str) -> CliResult<Workflow> {
    let workflow_error = |reason: String| CliError::Workflow {
        name: name.to_string(),
        reason,
    };
    let workflow = store
        .load_workflow(name)
        .await
        .map_err(|e| workflow_error(e.to_string()))?;
    workflow
        .validate()
        .map_err(|e| workflow_error(e.to_string()))?;
    Ok(workflow)
}

fn emit(out: &mut dyn Write, text: &str) -> CliResult<()> {
    writeln!(out, "{text}").map_err(|e| output_error(&e).into())
}

fn store_error(e: &impl std::fmt::Display) -> CliError {
    CliError::Store {
        reason: e.to_string(),
    }
}

fn output_error(e: &impl std::fmt::Display) -> CliError {
    CliError::Output {
        reason: e.to_string(),
    }
}
