//! Runner configuration.
//!
//! Loaded via the `config` crate from an optional TOML file and
//! `TASKLOOM__*` environment variables (nested keys separated by `__`,
//! e.g. `TASKLOOM__SCHEDULER__MAX_CONCURRENT_JOBS=2`).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use taskloom_workflow::SchedulerConfig;
use taskloom_workflow::executor::expand_home;

/// File read from the working directory when no file is given.
pub const DEFAULT_CONFIG_FILE: &str = "taskloom.toml";

/// Runner configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Base directory for workflows, runs and agent templates.
    #[serde(default = "default_home")]
    pub home: PathBuf,

    /// Root of per-job scratch directories. Defaults to `<home>/scratch`.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Path of the `claude` executable.
    #[serde(default = "default_claude_path")]
    pub claude_path: PathBuf,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_home() -> PathBuf {
    expand_home("~/.taskloom")
}

fn default_claude_path() -> PathBuf {
    PathBuf::from(taskloom_agent::claude::DEFAULT_CLAUDE_PATH)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            scratch_dir: None,
            claude_path: default_claude_path(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration. An explicitly given file must exist; the
    /// default file is optional.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value is invalid.
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix("TASKLOOM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Root of per-job scratch directories.
    #[must_use]
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| self.home.join("scratch"))
    }
}
