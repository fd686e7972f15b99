//! Plan report for a workflow, shown before (or instead of) running it.

use crate::definition::{ExecutionMode, Workflow};
use std::fmt::Write as _;

const PROMPT_PREVIEW_CHARS: usize = 50;

/// Renders the execution plan: jobs in dependency order with their
/// effective settings, followed by the root jobs and the cost ceiling.
#[must_use]
pub fn plan_report(workflow: &Workflow) -> String {
    let mut out = format!("Workflow: {}\n", workflow.name);
    if let Some(description) = workflow.description.as_deref().filter(|d| !d.is_empty()) {
        let _ = writeln!(out, "Description: {description}");
    }
    let _ = writeln!(out, "\nJobs ({} total):\n", workflow.jobs.len());

    for (i, name) in workflow.topological_order().iter().enumerate() {
        let Some(job) = workflow.job(name) else {
            continue;
        };
        let _ = writeln!(out, "{}. {name}", i + 1);
        match job.execution_mode() {
            Some(ExecutionMode::Goals(goals)) => {
                let _ = writeln!(out, "   Goals: {}", goals.len());
                if let Some(context) = &job.context {
                    let names: Vec<&str> = context.iter().map(|(name, _)| name).collect();
                    let _ = writeln!(out, "   Context: {}", names.join(", "));
                }
            }
            Some(ExecutionMode::Agent(agent)) => {
                let _ = writeln!(out, "   Agent: {agent}");
            }
            Some(ExecutionMode::Prompt(prompt)) => {
                let _ = writeln!(out, "   Prompt: {}", preview(prompt));
            }
            None => {}
        }
        if job.has_dependencies() {
            let _ = writeln!(out, "   Depends on: {}", job.needs.join(", "));
        }
        if let Some(condition) = &job.if_condition {
            let _ = writeln!(out, "   Condition: {condition}");
        }
        let outputs = job.declared_outputs();
        if !outputs.is_empty() {
            let _ = writeln!(out, "   Outputs: {}", outputs.join(", "));
        }
        let _ = writeln!(out, "   Max budget: ${:.2}", workflow.max_budget(name));
        let _ = writeln!(out, "   Max turns: {}\n", workflow.max_turns(name));
    }

    out.push_str("Execution Plan:\n");
    let _ = write!(
        out,
        "  Root jobs (can start immediately): {}",
        workflow.root_jobs().join(", ")
    );
    if let Some(max_cost) = workflow.max_cost_usd.filter(|c| *c > 0.0) {
        let _ = write!(out, "\n  Maximum workflow cost: ${max_cost:.2}");
    }
    out
}

fn preview(prompt: &str) -> String {
    if prompt.chars().count() > PROMPT_PREVIEW_CHARS {
        let head: String = prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        prompt.to_string()
    }
}
