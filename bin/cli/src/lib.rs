//! Command-line runner for taskloom workflows.

pub mod commands;
pub mod config;
pub mod error;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "taskloom", version, about = "Run dependency-ordered agent workflows")]
pub struct Cli {
    /// Configuration file (defaults to ./taskloom.toml when present).
    #[arg(long, global = true, env = "TASKLOOM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a workflow.
    Run {
        workflow: String,
        /// Assemble instructions without dispatching them.
        #[arg(long)]
        dry_run: bool,
        /// Run only this job, ignoring its dependencies.
        #[arg(long)]
        job: Option<String>,
        /// Print the finished run as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the execution plan of a workflow.
    Plan { workflow: String },
    /// Check a workflow's structure.
    Validate { workflow: String },
    /// List stored workflows.
    List,
    /// List recent runs of a workflow.
    Runs {
        workflow: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show one run of a workflow.
    Show { workflow: String, run_id: String },
    /// Delete a workflow definition. Its run history is kept.
    Delete { workflow: String },
    /// Create a starter workflow.
    New {
        name: String,
        /// Use the multi-job starter.
        #[arg(long)]
        multi: bool,
        /// Overwrite an existing workflow.
        #[arg(long)]
        force: bool,
    },
}
