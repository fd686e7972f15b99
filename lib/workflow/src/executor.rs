//! Executor abstraction.
//!
//! An executor takes an assembled instruction and carries it out, usually
//! by driving an external agent process. The engine only sees this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Settings for one executor dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Directory the executor runs in, with `~` already expanded.
    pub working_directory: PathBuf,
    /// Capabilities the executor may use.
    pub allowed_tools: Vec<String>,
    pub max_turns: u32,
    pub max_budget_usd: f64,
    pub permission_mode: Option<String>,
    pub model: Option<String>,
    /// Extra environment for the executor process.
    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,
}

impl ExecutorConfig {
    /// Creates a config with no permission mode, model or extra environment.
    #[must_use]
    pub fn new(
        working_directory: impl Into<PathBuf>,
        allowed_tools: Vec<String>,
        max_turns: u32,
        max_budget_usd: f64,
    ) -> Self {
        Self {
            working_directory: working_directory.into(),
            allowed_tools,
            max_turns,
            max_budget_usd,
            permission_mode: None,
            model: None,
            extra_env: BTreeMap::new(),
        }
    }
}

/// A successful executor response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Final response text.
    pub result: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cost_usd: Option<f64>,
    /// Continuation token for resuming this session later.
    pub session_id: Option<String>,
}

/// Errors from executor dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The executor could not be started.
    SpawnFailed { reason: String },
    /// The executor ran and reported failure.
    Failed { reason: String },
    /// The executor's log could not be written.
    LogFailed { path: PathBuf, reason: String },
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnFailed { reason } => write!(f, "failed to start executor: {reason}"),
            Self::Failed { reason } => f.write_str(reason),
            Self::LogFailed { path, reason } => {
                write!(f, "failed to write log {}: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for AgentError {}

/// Carries out an instruction.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Executes `prompt`, appending a record of the exchange to `log_file`.
    ///
    /// When `continuation_token` is given the executor resumes that session.
    ///
    /// # Errors
    ///
    /// Returns an error if the executor cannot run or reports failure.
    async fn execute(
        &self,
        prompt: &str,
        config: &ExecutorConfig,
        log_file: &Path,
        continuation_token: Option<&str>,
    ) -> Result<AgentResponse, AgentError>;
}

/// Expands a leading `~` to the user's home directory.
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    let Some(home) = std::env::var_os("HOME").map(PathBuf::from) else {
        return PathBuf::from(path);
    };
    if path == "~" {
        return home;
    }
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(path),
    }
}
