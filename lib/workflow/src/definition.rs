//! Workflow definition types.
//!
//! A workflow is a named collection of jobs that consists of:
//! - Metadata (name, description, optional cost ceiling)
//! - Trigger configuration (schedules, manual runs)
//! - Defaults applied to every job unless the job overrides them
//! - The jobs themselves, keyed by name, forming a dependency graph

use crate::error::{GraphError, WorkflowError};
use crate::graph;
use rootcause::Report;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Working directory used when neither the job nor the workflow sets one.
pub const DEFAULT_WORKING_DIRECTORY: &str = "~/";
/// Budget (USD) used when neither the job nor the workflow sets one.
pub const DEFAULT_MAX_BUDGET_USD: f64 = 1.0;
/// Turn cap used when neither the job nor the workflow sets one.
pub const DEFAULT_MAX_TURNS: u32 = 10;
/// Capabilities granted when neither the job nor the workflow lists any.
pub const DEFAULT_ALLOWED_TOOLS: [&str; 3] = ["Read", "Grep", "Glob"];

/// A cron schedule entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cron expression (e.g., "0 7 * * *" for 7am daily).
    pub cron: String,
}

/// Trigger configuration for a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTriggers {
    /// Periodic schedules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Vec<ScheduleConfig>>,
    /// Whether manual runs are allowed. Absent means allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual: Option<bool>,
}

impl WorkflowTriggers {
    /// Returns true if the workflow may be started manually.
    #[must_use]
    pub fn is_manual_enabled(&self) -> bool {
        self.manual.unwrap_or(true)
    }

    /// Returns true if the workflow has at least one schedule.
    #[must_use]
    pub fn has_schedule(&self) -> bool {
        self.schedule.as_ref().is_some_and(|s| !s.is_empty())
    }
}

/// Default settings applied to every job in a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    /// Model selector ("opus", "sonnet", "haiku" or a full model id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Side-channel context commands for a goals-based job.
///
/// Maps a section name to a shell command. Declaration order is preserved
/// because it determines the order of sections in the assembled prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextCommands(Vec<(String, String)>);

impl ContextCommands {
    /// Creates an empty set of commands.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command, replacing any earlier command with the same name
    /// in place.
    pub fn insert(&mut self, name: impl Into<String>, command: impl Into<String>) {
        let name = name.into();
        let command = command.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = command,
            None => self.0.push((name, command)),
        }
    }

    /// Iterates `(name, command)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, c)| (n.as_str(), c.as_str()))
    }

    /// Returns the number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, C: Into<String>> FromIterator<(N, C)> for ContextCommands {
    fn from_iter<I: IntoIterator<Item = (N, C)>>(iter: I) -> Self {
        let mut commands = Self::new();
        for (name, command) in iter {
            commands.insert(name, command);
        }
        commands
    }
}

impl Serialize for ContextCommands {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, command) in &self.0 {
            map.serialize_entry(name, command)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ContextCommands {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CommandsVisitor;

        impl<'de> Visitor<'de> for CommandsVisitor {
            type Value = ContextCommands;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a mapping of context names to shell commands")
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut commands = ContextCommands::new();
                while let Some((name, command)) = map.next_entry::<String, String>()? {
                    commands.insert(name, command);
                }
                Ok(commands)
            }
        }

        deserializer.deserialize_map(CommandsVisitor)
    }
}

/// How a job produces the instruction sent to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode<'a> {
    /// Goals plus gathered context are assembled into one instruction.
    Goals(&'a [String]),
    /// A named agent template supplies the instruction.
    Agent(&'a str),
    /// The job carries its own inline instruction.
    Prompt(&'a str),
}

/// A single unit of work within a workflow.
///
/// Jobs can be defined in three ways:
/// 1. Goals-based: goals plus optional context commands
/// 2. Prompt-based: an inline instruction
/// 3. Agent-based: a reference to a reusable agent template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goals: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextCommands>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    /// Jobs that must finish (completed or skipped) before this one starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    /// Guard expression; the job is skipped when it evaluates to false.
    #[serde(
        rename = "if",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub if_condition: Option<String>,

    /// Declared outputs to extract from the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<Vec<String>>,
    /// Older spelling of `report`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,

    /// Name of an earlier job whose executor session this job resumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_session: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Job {
    /// Creates a goals-based job.
    #[must_use]
    pub fn with_goals<I, S>(goals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            goals: Some(goals.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Creates a job with an inline prompt.
    #[must_use]
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    /// Creates a job that runs a named agent template.
    #[must_use]
    pub fn with_agent(agent: impl Into<String>) -> Self {
        Self {
            agent: Some(agent.into()),
            ..Self::default()
        }
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn needs<I, S>(mut self, needs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs = needs.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the guard expression.
    #[must_use]
    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.if_condition = Some(condition.into());
        self
    }

    /// Sets the declared outputs.
    #[must_use]
    pub fn reporting<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.report = Some(outputs.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a context command.
    #[must_use]
    pub fn gather(mut self, name: impl Into<String>, command: impl Into<String>) -> Self {
        self.context
            .get_or_insert_with(ContextCommands::new)
            .insert(name, command);
        self
    }

    /// Resumes the executor session of another job.
    #[must_use]
    pub fn continuing(mut self, job_name: impl Into<String>) -> Self {
        self.continue_session = Some(job_name.into());
        self
    }

    /// Returns true if this job uses goals-based execution.
    #[must_use]
    pub fn has_goals(&self) -> bool {
        self.goals.as_ref().is_some_and(|g| !g.is_empty())
    }

    /// Returns the authoritative execution mode, if any is defined.
    ///
    /// Non-empty goals win over an agent reference, which wins over an
    /// inline prompt.
    #[must_use]
    pub fn execution_mode(&self) -> Option<ExecutionMode<'_>> {
        if let Some(goals) = self.goals.as_deref()
            && !goals.is_empty()
        {
            return Some(ExecutionMode::Goals(goals));
        }
        if let Some(agent) = self.agent.as_deref() {
            return Some(ExecutionMode::Agent(agent));
        }
        self.prompt.as_deref().map(ExecutionMode::Prompt)
    }

    /// Returns the declared outputs. `report` wins when it is non-empty.
    #[must_use]
    pub fn declared_outputs(&self) -> &[String] {
        match self.report.as_deref() {
            Some(report) if !report.is_empty() => report,
            _ => self.outputs.as_deref().unwrap_or_default(),
        }
    }

    /// Returns true if this job has any dependencies.
    #[must_use]
    pub fn has_dependencies(&self) -> bool {
        !self.needs.is_empty()
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name; also the file stem under which it is stored.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Trigger configuration.
    #[serde(rename = "on", default)]
    pub triggers: WorkflowTriggers,
    /// Defaults inherited by every job.
    #[serde(default)]
    pub defaults: WorkflowDefaults,
    /// Jobs keyed by name.
    pub jobs: BTreeMap<String, Job>,
    /// Cost ceiling for the whole workflow, reported in plans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_usd: Option<f64>,
}

impl Workflow {
    /// Creates an empty workflow with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            triggers: WorkflowTriggers::default(),
            defaults: WorkflowDefaults::default(),
            jobs: BTreeMap::new(),
            max_cost_usd: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the trigger configuration.
    #[must_use]
    pub fn with_triggers(mut self, triggers: WorkflowTriggers) -> Self {
        self.triggers = triggers;
        self
    }

    /// Sets the defaults.
    #[must_use]
    pub fn with_defaults(mut self, defaults: WorkflowDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Adds a job.
    #[must_use]
    pub fn with_job(mut self, name: impl Into<String>, job: Job) -> Self {
        self.jobs.insert(name.into(), job);
        self
    }

    /// Parses a workflow from YAML and validates its structure.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or the job graph is invalid.
    pub fn from_yaml(content: &str) -> Result<Self, Report<WorkflowError>> {
        let workflow: Self =
            serde_yaml::from_str(content).map_err(|e| WorkflowError::Parse {
                reason: e.to_string(),
            })?;
        workflow.validate().map_err(|e| WorkflowError::Invalid {
            name: workflow.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(workflow)
    }

    /// Serializes the workflow to YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String, Report<WorkflowError>> {
        serde_yaml::to_string(self).map_err(|e| {
            WorkflowError::Serialize {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the job graph.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found.
    pub fn validate(&self) -> Result<(), GraphError> {
        graph::validate(self)
    }

    /// Returns a job by name.
    #[must_use]
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    /// Returns job names in lexical order.
    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    /// Jobs with no dependencies, in lexical order.
    #[must_use]
    pub fn root_jobs(&self) -> Vec<String> {
        graph::root_jobs(self)
    }

    /// Jobs that list `job_name` directly in their `needs`, in lexical order.
    #[must_use]
    pub fn dependents(&self, job_name: &str) -> Vec<String> {
        graph::dependents(self, job_name)
    }

    /// Jobs in dependency order, for reporting.
    #[must_use]
    pub fn topological_order(&self) -> Vec<String> {
        graph::topological_order(self)
    }

    /// Effective working directory for a job.
    #[must_use]
    pub fn working_directory(&self, job_name: &str) -> String {
        self.job(job_name)
            .and_then(|j| j.working_directory.clone())
            .or_else(|| self.defaults.working_directory.clone())
            .unwrap_or_else(|| DEFAULT_WORKING_DIRECTORY.to_string())
    }

    /// Effective budget for a job.
    #[must_use]
    pub fn max_budget(&self, job_name: &str) -> f64 {
        self.job(job_name)
            .and_then(|j| j.max_budget_usd)
            .or(self.defaults.max_budget_usd)
            .unwrap_or(DEFAULT_MAX_BUDGET_USD)
    }

    /// Effective turn cap for a job.
    #[must_use]
    pub fn max_turns(&self, job_name: &str) -> u32 {
        self.job(job_name)
            .and_then(|j| j.max_turns)
            .or(self.defaults.max_turns)
            .unwrap_or(DEFAULT_MAX_TURNS)
    }

    /// Effective capability list for a job.
    #[must_use]
    pub fn allowed_tools(&self, job_name: &str) -> Vec<String> {
        self.job(job_name)
            .and_then(|j| j.allowed_tools.clone())
            .or_else(|| self.defaults.allowed_tools.clone())
            .unwrap_or_else(|| DEFAULT_ALLOWED_TOOLS.iter().map(ToString::to_string).collect())
    }

    /// Effective permission mode for a job.
    #[must_use]
    pub fn permission_mode(&self, job_name: &str) -> Option<String> {
        self.job(job_name)
            .and_then(|j| j.permission_mode.clone())
            .or_else(|| self.defaults.permission_mode.clone())
    }

    /// Effective model for a job. `None` leaves the executor's default.
    #[must_use]
    pub fn model(&self, job_name: &str) -> Option<String> {
        self.job(job_name)
            .and_then(|j| j.model.clone())
            .or_else(|| self.defaults.model.clone())
    }

    /// A starter workflow with one goals-based job.
    #[must_use]
    pub fn template(name: impl Into<String>) -> Self {
        Self::new(name)
            .with_description("Description of what this workflow does")
            .with_triggers(WorkflowTriggers {
                schedule: None,
                manual: Some(true),
            })
            .with_defaults(WorkflowDefaults {
                working_directory: Some(DEFAULT_WORKING_DIRECTORY.to_string()),
                max_budget_usd: Some(0.5),
                max_turns: Some(20),
                allowed_tools: Some(DEFAULT_ALLOWED_TOOLS.map(String::from).to_vec()),
                ..WorkflowDefaults::default()
            })
            .with_job(
                "main",
                Job::with_goals([
                    "Analyze the current directory structure",
                    "Report any notable findings",
                ])
                .gather("files", "ls -la")
                .gather(
                    "git_status",
                    "git status --short 2>/dev/null || echo '(not a git repo)'",
                )
                .reporting(["summary", "findings"]),
            )
    }

    /// A starter workflow with three dependent jobs, a guard and output
    /// passing.
    #[must_use]
    pub fn multi_job_template(name: impl Into<String>) -> Self {
        let mut analyze = Job::with_goals([
            "Analyze the codebase structure and identify key components",
            "Summarize the project purpose and architecture",
        ])
        .gather("structure", "find . -type f -name '*.rs' | head -20")
        .gather("readme", "cat README.md 2>/dev/null || echo '(no README)'")
        .reporting(["summary", "components"]);
        analyze.allowed_tools = Some(vec!["Read".into(), "Grep".into(), "Glob".into()]);

        let mut review = Job::with_goals([
            "Review code quality based on the analysis: ${{ jobs.analyze.outputs.summary }}",
            "Identify potential improvements",
        ])
        .needs(["analyze"])
        .when("${{ jobs.analyze.outputs.summary != '' }}")
        .reporting(["issues", "recommendations"]);
        review.allowed_tools = Some(vec!["Read".into()]);

        Self::new(name)
            .with_description("Multi-job workflow template with dependencies")
            .with_triggers(WorkflowTriggers {
                schedule: None,
                manual: Some(true),
            })
            .with_defaults(WorkflowDefaults {
                working_directory: Some("~/repos/project".to_string()),
                max_budget_usd: Some(0.5),
                max_turns: Some(20),
                ..WorkflowDefaults::default()
            })
            .with_job("analyze", analyze)
            .with_job("review", review)
            .with_job(
                "report",
                Job::with_goals([
                    "Generate a final report combining findings from analyze and review jobs",
                    "Provide actionable next steps",
                ])
                .needs(["analyze", "review"])
                .reporting(["final_report"]),
            )
    }
}
