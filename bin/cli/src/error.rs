//! Errors reported by the runner.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliError {
    /// Configuration could not be loaded.
    Config { reason: String },
    /// A workflow could not be loaded, validated or run.
    Workflow { name: String, reason: String },
    /// The store failed.
    Store { reason: String },
    /// A workflow with this name already exists.
    AlreadyExists { name: String },
    /// Writing the report failed.
    Output { reason: String },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "invalid configuration: {reason}"),
            Self::Workflow { name, reason } => write!(f, "workflow '{name}': {reason}"),
            Self::Store { reason } => write!(f, "store error: {reason}"),
            Self::AlreadyExists { name } => write!(f, "Workflow '{name}' already exists"),
            Self::Output { reason } => write!(f, "failed to write output: {reason}"),
        }
    }
}

impl std::error::Error for CliError {}
