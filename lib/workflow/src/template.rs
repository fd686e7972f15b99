//! Reusable agent templates.
//!
//! A job that names an `agent` takes its instruction text and default
//! settings from the template of that name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

fn default_working_directory() -> String {
    "~/".to_string()
}

fn default_max_turns() -> u32 {
    10
}

fn default_max_budget_usd() -> f64 {
    1.0
}

/// An environment variable passed to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Name of the variable in the executor's environment.
    pub name: String,
    /// Literal value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Name of a variable in this process's environment to copy from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_env: Option<String>,
}

impl EnvVar {
    /// Resolves the value: the literal if set, otherwise the named process
    /// variable (defaulting to `name`). `None` when unset.
    #[must_use]
    pub fn resolve(&self) -> Option<String> {
        if let Some(value) = &self.value {
            return Some(value.clone());
        }
        let source = self.from_env.as_deref().unwrap_or(&self.name);
        std::env::var(source).ok()
    }
}

/// External integrations a template needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integrations {
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

impl Integrations {
    /// Resolves every variable that has a value.
    #[must_use]
    pub fn resolve_env(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .filter_map(|var| var.resolve().map(|value| (var.name.clone(), value)))
            .collect()
    }
}

/// A reusable instruction template with default settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_max_budget_usd")]
    pub max_budget_usd: f64,
    #[serde(default = "default_working_directory")]
    pub working_directory: String,
    #[serde(default)]
    pub integrations: Integrations,
}

impl AgentTemplate {
    /// Creates a template with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            prompt: prompt.into(),
            allowed_tools: Vec::new(),
            max_turns: default_max_turns(),
            max_budget_usd: default_max_budget_usd(),
            working_directory: default_working_directory(),
            integrations: Integrations::default(),
        }
    }
}

/// Errors loading templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// No template with this name exists.
    NotFound { name: String },
    /// The template exists but could not be read or parsed.
    Invalid { name: String, reason: String },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "Agent '{name}' not found"),
            Self::Invalid { name, reason } => write!(f, "invalid agent '{name}': {reason}"),
        }
    }
}

impl std::error::Error for TemplateError {}

/// Source of agent templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Loads the template with the given name.
    ///
    /// # Errors
    ///
    /// Returns an error if the template is missing or invalid.
    async fn load_agent(&self, name: &str) -> Result<AgentTemplate, TemplateError>;
}
