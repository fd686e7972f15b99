//! Shell runner for side-channel context commands.

use async_trait::async_trait;
use std::path::Path;
use taskloom_workflow::shell::{ShellRunner, error_output, normalize_output};
use tokio::process::Command;

/// Runs commands through `sh -c` in the given working directory, with
/// stderr merged into stdout in write order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShell;

fn merged(command: &str) -> String {
    format!("{{ {command}\n}} 2>&1")
}

#[async_trait]
impl ShellRunner for SystemShell {
    async fn run(&self, command: &str, working_dir: &Path) -> String {
        let output = Command::new("sh")
            .arg("-c")
            .arg(merged(command))
            .current_dir(working_dir)
            .kill_on_drop(true)
            .output()
            .await;
        match output {
            Ok(output) => normalize_output(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                tracing::warn!(command = %command, error = %e, "context command failed to start");
                error_output(e)
            }
        }
    }
}
