//! Shell command abstraction for side-channel context gathering.

use async_trait::async_trait;
use std::path::Path;

/// Runs a shell command and returns its combined output.
///
/// Implementations never fail: errors are reported inline in the returned
/// text as `(error: ...)`, and empty output as `(no output)`.
#[async_trait]
pub trait ShellRunner: Send + Sync {
    async fn run(&self, command: &str, working_dir: &Path) -> String;
}

/// Placeholder text for a command that printed nothing.
pub const NO_OUTPUT: &str = "(no output)";

/// Normalizes captured command output: trimmed, with a placeholder when
/// empty.
#[must_use]
pub fn normalize_output(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        NO_OUTPUT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Inline text for a command that could not run.
#[must_use]
pub fn error_output(error: impl std::fmt::Display) -> String {
    format!("(error: {error})")
}
