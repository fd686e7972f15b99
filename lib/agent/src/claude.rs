//! Executor backed by the `claude` command-line agent.
//!
//! Each dispatch runs one non-interactive invocation with JSON output and
//! appends the command, exit code and captured streams to the job's log.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Output;
use taskloom_workflow::executor::{AgentError, AgentExecutor, AgentResponse, ExecutorConfig};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Executable used when no path is configured.
pub const DEFAULT_CLAUDE_PATH: &str = "claude";

/// Dispatches instructions to the `claude` CLI.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    path: PathBuf,
}

impl Default for ClaudeCli {
    fn default() -> Self {
        Self::new(DEFAULT_CLAUDE_PATH)
    }
}

impl ClaudeCli {
    /// Creates an executor that runs the CLI at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Command-line arguments for one dispatch.
    #[must_use]
    pub fn args(
        prompt: &str,
        config: &ExecutorConfig,
        continuation_token: Option<&str>,
    ) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ];
        if let Some(token) = continuation_token {
            args.extend(["--resume".to_string(), token.to_string()]);
        }
        args.push(prompt.to_string());
        for tool in &config.allowed_tools {
            args.extend(["--allowedTools".to_string(), tool.clone()]);
        }
        if let Some(mode) = &config.permission_mode {
            args.extend(["--permission-mode".to_string(), mode.clone()]);
        }
        if let Some(model) = &config.model {
            args.extend(["--model".to_string(), model.clone()]);
        }
        args.extend([
            "--max-budget-usd".to_string(),
            format!("{:.2}", config.max_budget_usd),
            "--max-turns".to_string(),
            config.max_turns.to_string(),
        ]);
        args
    }

    async fn append_log(
        &self,
        log_file: &Path,
        args: &[String],
        output: &Output,
    ) -> std::io::Result<()> {
        if let Some(parent) = log_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut entry = format!(
            "Command: {} {}\nExit code: {}\nStdout:\n{}\n",
            self.path.display(),
            args.join(" "),
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout),
        );
        if !output.stderr.is_empty() {
            entry.push_str(&format!(
                "Stderr:\n{}\n",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .await?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl AgentExecutor for ClaudeCli {
    async fn execute(
        &self,
        prompt: &str,
        config: &ExecutorConfig,
        log_file: &Path,
        continuation_token: Option<&str>,
    ) -> Result<AgentResponse, AgentError> {
        let args = Self::args(prompt, config, continuation_token);
        tracing::debug!(
            path = %self.path.display(),
            working_directory = %config.working_directory.display(),
            resume = continuation_token.is_some(),
            "invoking claude"
        );

        let output = Command::new(&self.path)
            .args(&args)
            .current_dir(&config.working_directory)
            .envs(&config.extra_env)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => AgentError::Failed {
                    reason: format!(
                        "Claude CLI not found at '{}'. Is it installed?",
                        self.path.display()
                    ),
                },
                _ => AgentError::SpawnFailed {
                    reason: e.to_string(),
                },
            })?;

        self.append_log(log_file, &args, &output)
            .await
            .map_err(|e| AgentError::LogFailed {
                path: log_file.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(AgentError::Failed {
                reason: format!(
                    "Claude CLI exited with code {code}: {}",
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[derive(Debug, Default, Deserialize)]
struct CliOutput {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    usage: Option<CliUsage>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CliUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    output_tokens: Option<u64>,
}

/// Parses the CLI's stdout. JSON output yields the result text, token
/// counts (cache tokens count as input), cost and session id; anything else
/// is taken as the trimmed result text.
#[must_use]
pub fn parse_output(stdout: &str) -> AgentResponse {
    let Ok(output) = serde_json::from_str::<CliOutput>(stdout) else {
        return AgentResponse {
            result: stdout.trim().to_string(),
            ..AgentResponse::default()
        };
    };
    let input_tokens = output.usage.as_ref().map(|u| {
        u.input_tokens + u.cache_creation_input_tokens + u.cache_read_input_tokens
    });
    AgentResponse {
        result: output.result.unwrap_or_default(),
        input_tokens,
        output_tokens: output.usage.and_then(|u| u.output_tokens),
        cost_usd: output.total_cost_usd,
        session_id: output.session_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPTURED: &str = r#"{
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "duration_ms": 5120,
        "num_turns": 3,
        "result": "Done.\n<summary>all good</summary>",
        "session_id": "6f1c2a9e-5b7d-4d8e-9a3b-1c2d3e4f5a6b",
        "total_cost_usd": 0.0421,
        "usage": {
            "input_tokens": 12,
            "cache_creation_input_tokens": 3000,
            "cache_read_input_tokens": 14000,
            "output_tokens": 410
        }
    }"#;

    #[test]
    fn parses_captured_json() {
        let response = parse_output(CAPTURED);
        assert_eq!(response.result, "Done.\n<summary>all good</summary>");
        assert_eq!(response.input_tokens, Some(17_012));
        assert_eq!(response.output_tokens, Some(410));
        assert_eq!(response.cost_usd, Some(0.0421));
        assert_eq!(
            response.session_id.as_deref(),
            Some("6f1c2a9e-5b7d-4d8e-9a3b-1c2d3e4f5a6b")
        );
    }

    #[test]
    fn json_without_usage_has_no_token_counts() {
        let response = parse_output(r#"{"result": "hi"}"#);
        assert_eq!(response.result, "hi");
        assert_eq!(response.input_tokens, None);
        assert_eq!(response.output_tokens, None);
        assert_eq!(response.cost_usd, None);
    }

    #[test]
    fn plain_text_is_the_result() {
        let response = parse_output("  just text\n");
        assert_eq!(response.result, "just text");
        assert_eq!(response.session_id, None);
    }

    #[test]
    fn args_follow_cli_order() {
        let mut config = ExecutorConfig::new(
            "/tmp",
            vec!["Read".to_string(), "Grep".to_string()],
            7,
            0.5,
        );
        config.model = Some("sonnet".to_string());

        let args = ClaudeCli::args("do it", &config, Some("abc"));

        assert_eq!(
            args,
            [
                "--print",
                "--output-format",
                "json",
                "--resume",
                "abc",
                "do it",
                "--allowedTools",
                "Read",
                "--allowedTools",
                "Grep",
                "--model",
                "sonnet",
                "--max-budget-usd",
                "0.50",
                "--max-turns",
                "7",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_a_fake_cli_and_logs_the_exchange() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("fake-claude");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"result\": \"ok\", \"session_id\": \"s1\"}'\necho warning >&2\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let log = dir.path().join("logs").join("job.log");
        let config = ExecutorConfig::new(dir.path(), vec![], 1, 1.0);

        let response = ClaudeCli::new(&script)
            .execute("hello", &config, &log, None)
            .await
            .expect("execute");

        assert_eq!(response.result, "ok");
        assert_eq!(response.session_id.as_deref(), Some("s1"));
        let logged = std::fs::read_to_string(&log).unwrap();
        assert!(logged.contains("Exit code: 0\n"));
        assert!(logged.contains("Stderr:\nwarning\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("fake-claude");
        std::fs::write(&script, "#!/bin/sh\necho 'bad flag' >&2\nexit 2\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let config = ExecutorConfig::new(dir.path(), vec![], 1, 1.0);

        let err = ClaudeCli::new(&script)
            .execute("hello", &config, &dir.path().join("job.log"), None)
            .await
            .expect_err("exit 2");

        assert_eq!(err.to_string(), "Claude CLI exited with code 2: bad flag\n");
    }

    #[tokio::test]
    async fn missing_cli_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ExecutorConfig::new(dir.path(), vec![], 1, 1.0);
        let missing = dir.path().join("no-such-claude");

        let err = ClaudeCli::new(&missing)
            .execute("hello", &config, &dir.path().join("job.log"), None)
            .await
            .expect_err("missing");

        assert_eq!(
            err.to_string(),
            format!("Claude CLI not found at '{}'. Is it installed?", missing.display())
        );
    }
}
