//! Directory-backed store.
//!
//! Layout under the base directory:
//!
//! ```text
//! workflows/<name>.yaml          workflow definitions
//! runs/<workflow>/<run_id>.json  run records
//! runs/<workflow>/<run_id>/      per-run job logs
//! agents/<name>.yaml             agent templates
//! ```

use async_trait::async_trait;
use rootcause::Report;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use taskloom_core::RunId;
use taskloom_workflow::store::{StoreError, WorkflowStore};
use taskloom_workflow::template::{AgentTemplate, TemplateError, TemplateStore};
use taskloom_workflow::{Workflow, WorkflowRun};

const YAML_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Stores workflows, runs and agent templates as files.
#[derive(Debug, Clone)]
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `base`. Directories are created on first
    /// write.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn workflows_dir(&self) -> PathBuf {
        self.base.join("workflows")
    }

    fn agents_dir(&self) -> PathBuf {
        self.base.join("agents")
    }

    fn run_directory(&self, workflow: &str) -> PathBuf {
        self.base.join("runs").join(workflow)
    }

    /// Path of a workflow's definition file.
    #[must_use]
    pub fn workflow_path(&self, name: &str) -> PathBuf {
        self.workflows_dir().join(format!("{name}.yaml"))
    }

    /// Path of a run record.
    #[must_use]
    pub fn run_path(&self, workflow: &str, run_id: RunId) -> PathBuf {
        self.run_directory(workflow).join(format!("{run_id}.json"))
    }

    /// Lists the names of all stored workflows, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflows directory cannot be read.
    pub async fn list_workflow_names(&self) -> Result<Vec<String>, Report<StoreError>> {
        let mut names = list_stems(&self.workflows_dir(), &YAML_EXTENSIONS).await?;
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Writes a workflow definition, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow cannot be serialized or written.
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<PathBuf, Report<StoreError>> {
        let path = self.workflow_path(&workflow.name);
        let yaml = serde_yaml::to_string(workflow).map_err(|e| StoreError::Format {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_file(&path, yaml.as_bytes()).await?;
        tracing::debug!(workflow = %workflow.name, path = %path.display(), "saved workflow");
        Ok(path)
    }

    /// Deletes a workflow definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow does not exist or cannot be removed.
    pub async fn delete_workflow(&self, name: &str) -> Result<(), Report<StoreError>> {
        let Some(path) = find_yaml(&self.workflows_dir(), name).await else {
            return Err(StoreError::WorkflowNotFound {
                name: name.to_string(),
            }
            .into());
        };
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| io_error(&path, &e))?;
        Ok(())
    }

    /// Loads one run record. `run_id` may carry the `run_` prefix or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the run does not exist or cannot be parsed.
    pub async fn load_run(
        &self,
        workflow: &str,
        run_id: &str,
    ) -> Result<WorkflowRun, Report<StoreError>> {
        let not_found = || StoreError::RunNotFound {
            run_id: run_id.to_string(),
        };
        let id: RunId = run_id.parse().map_err(|_| not_found())?;
        let path = self.run_path(workflow, id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(parse_run(&path, &content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found().into()),
            Err(e) => Err(io_error(&path, &e).into()),
        }
    }

    /// Run record files of a workflow, newest first.
    async fn run_files(&self, workflow: &str) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.run_directory(workflow);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, &e)),
        };

        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, &e))? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, path));
        }
        files.sort_by(|a, b| b.cmp(a));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }
}

#[async_trait]
impl WorkflowStore for FileStore {
    async fn load_workflow(&self, name: &str) -> Result<Workflow, StoreError> {
        let path = find_yaml(&self.workflows_dir(), name)
            .await
            .ok_or_else(|| StoreError::WorkflowNotFound {
                name: name.to_string(),
            })?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error(&path, &e))?;
        serde_yaml::from_str(&content).map_err(|e| StoreError::Format {
            path,
            reason: e.to_string(),
        })
    }

    async fn save_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let path = self.run_path(&run.workflow_name, run.id);
        let json = serde_json::to_vec_pretty(run).map_err(|e| StoreError::Format {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_file(&path, &json).await
    }

    async fn list_runs(&self, workflow: &str, limit: usize) -> Result<Vec<WorkflowRun>, StoreError> {
        let mut runs = Vec::new();
        for path in self.run_files(workflow).await?.into_iter().take(limit) {
            let loaded = match tokio::fs::read_to_string(&path).await {
                Ok(content) => parse_run(&path, &content),
                Err(e) => Err(io_error(&path, &e)),
            };
            match loaded {
                Ok(run) => runs.push(run),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable run record"),
            }
        }
        Ok(runs)
    }

    fn run_log_directory(&self, workflow: &str, run_id: RunId) -> PathBuf {
        self.run_directory(workflow).join(run_id.to_string())
    }

    async fn prune_runs(&self, workflow: &str, keep: usize) -> Result<usize, StoreError> {
        let files = self.run_files(workflow).await?;
        let mut pruned = 0;
        for path in files.into_iter().skip(keep) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => pruned += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path, &e)),
            }
            let log_dir = path.with_extension("");
            if tokio::fs::metadata(&log_dir).await.is_ok_and(|m| m.is_dir())
                && let Err(e) = tokio::fs::remove_dir_all(&log_dir).await
            {
                tracing::warn!(path = %log_dir.display(), error = %e, "failed to remove run logs");
            }
        }
        Ok(pruned)
    }
}

#[async_trait]
impl TemplateStore for FileStore {
    async fn load_agent(&self, name: &str) -> Result<AgentTemplate, TemplateError> {
        let path = find_yaml(&self.agents_dir(), name)
            .await
            .ok_or_else(|| TemplateError::NotFound {
                name: name.to_string(),
            })?;
        let invalid = |reason: String| TemplateError::Invalid {
            name: name.to_string(),
            reason,
        };
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| invalid(e.to_string()))?;
        serde_yaml::from_str(&content).map_err(|e| invalid(e.to_string()))
    }
}

fn io_error(path: &Path, error: &std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

fn parse_run(path: &Path, content: &str) -> Result<WorkflowRun, StoreError> {
    serde_json::from_str(content).map_err(|e| StoreError::Format {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, &e))?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| io_error(path, &e))
}

/// Finds `<dir>/<name>.yaml` or `<dir>/<name>.yml`.
async fn find_yaml(dir: &Path, name: &str) -> Option<PathBuf> {
    for ext in YAML_EXTENSIONS {
        let path = dir.join(format!("{name}.{ext}"));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
    }
    None
}

/// File stems in `dir` with one of `extensions`. A missing directory is
/// empty.
async fn list_stems(dir: &Path, extensions: &[&str]) -> Result<Vec<String>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(dir, &e)),
    };
    let mut stems = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(dir, &e))? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.contains(&ext));
        if let (true, Some(stem)) = (matches, path.file_stem().and_then(|s| s.to_str())) {
            stems.push(stem.to_string());
        }
    }
    Ok(stems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloom_workflow::{Job, JobStatus, RunStatus};
    use ulid::Ulid;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());
        (dir, store)
    }

    fn run_at(workflow: &str, millis: u64) -> WorkflowRun {
        let mut run = WorkflowRun::new(workflow, ["a"], false);
        run.id = RunId::from_ulid(Ulid::from_parts(millis, 0));
        run
    }

    #[tokio::test]
    async fn workflows_round_trip() {
        let (_dir, store) = store();
        let workflow = Workflow::new("nightly")
            .with_job("a", Job::with_goals(["check"]).gather("z", "ls").gather("a", "pwd"))
            .with_job("b", Job::with_prompt("b").needs(["a"]));

        let path = store.save_workflow(&workflow).await.expect("save");
        assert_eq!(path, store.workflow_path("nightly"));

        let loaded = store.load_workflow("nightly").await.expect("load");
        assert_eq!(loaded, workflow);
        assert_eq!(
            store.list_workflow_names().await.expect("list"),
            vec!["nightly".to_string()]
        );
    }

    #[tokio::test]
    async fn yml_files_are_found_and_listed() {
        let (dir, store) = store();
        let workflows = dir.path().join("workflows");
        std::fs::create_dir_all(&workflows).unwrap();
        std::fs::write(
            workflows.join("beta.yml"),
            "name: beta\njobs:\n  a:\n    prompt: hi\n",
        )
        .unwrap();
        std::fs::write(workflows.join("alpha.yaml"), "name: alpha\njobs: {}\n").unwrap();
        std::fs::write(workflows.join("notes.txt"), "ignored").unwrap();

        assert_eq!(
            store.list_workflow_names().await.expect("list"),
            vec!["alpha".to_string(), "beta".to_string()]
        );
        assert_eq!(store.load_workflow("beta").await.expect("load").name, "beta");
    }

    #[tokio::test]
    async fn missing_workflow_is_reported() {
        let (_dir, store) = store();
        assert_eq!(
            store.load_workflow("ghost").await,
            Err(StoreError::WorkflowNotFound {
                name: "ghost".to_string()
            })
        );
        assert!(store.list_workflow_names().await.expect("list").is_empty());
        assert!(store.delete_workflow("ghost").await.is_err());
    }

    #[tokio::test]
    async fn malformed_workflow_is_a_format_error() {
        let (dir, store) = store();
        let workflows = dir.path().join("workflows");
        std::fs::create_dir_all(&workflows).unwrap();
        std::fs::write(workflows.join("bad.yaml"), "name: [unclosed").unwrap();

        assert!(matches!(
            store.load_workflow("bad").await,
            Err(StoreError::Format { .. })
        ));
    }

    #[tokio::test]
    async fn runs_round_trip() {
        let (_dir, store) = store();
        let mut run = run_at("nightly", 1_000);
        run.start();
        let mut result = taskloom_workflow::JobResult::new("a");
        result.mark_started();
        result.mark_failed("boom");
        run.record(result);
        run.fail("1 job(s) failed");

        store.save_run(&run).await.expect("save");

        let loaded = store
            .load_run("nightly", &run.id.to_string())
            .await
            .expect("load");
        assert_eq!(loaded, run);
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.job_result("a").unwrap().status, JobStatus::Failed);

        let bare = run.id.as_ulid().to_string();
        assert!(store.load_run("nightly", &bare).await.is_ok());
        assert!(store.load_run("nightly", "run_nope").await.is_err());
    }

    #[tokio::test]
    async fn runs_list_newest_first_and_prune_with_logs() {
        let (_dir, store) = store();
        for millis in [1_000, 2_000, 3_000] {
            let run = run_at("nightly", millis);
            store.save_run(&run).await.expect("save");
            let logs = store.run_log_directory("nightly", run.id);
            std::fs::create_dir_all(&logs).unwrap();
            std::fs::write(logs.join("a.log"), "log").unwrap();
        }

        let runs = store.list_runs("nightly", 10).await.expect("list");
        let ids: Vec<RunId> = runs.iter().map(|r| r.id).collect();
        assert_eq!(
            ids,
            vec![
                run_at("nightly", 3_000).id,
                run_at("nightly", 2_000).id,
                run_at("nightly", 1_000).id,
            ]
        );
        assert_eq!(store.list_runs("nightly", 1).await.expect("list").len(), 1);

        let pruned = store.prune_runs("nightly", 2).await.expect("prune");
        assert_eq!(pruned, 1);
        let oldest = run_at("nightly", 1_000).id;
        assert!(!store.run_path("nightly", oldest).exists());
        assert!(!store.run_log_directory("nightly", oldest).exists());
        assert_eq!(store.list_runs("nightly", 10).await.expect("list").len(), 2);

        assert_eq!(store.prune_runs("other", 2).await.expect("prune"), 0);
    }

    #[tokio::test]
    async fn agent_templates_load_from_yaml() {
        let (dir, store) = store();
        let agents = dir.path().join("agents");
        std::fs::create_dir_all(&agents).unwrap();
        std::fs::write(
            agents.join("reviewer.yaml"),
            "name: reviewer\ndescription: Reviews code\nprompt: Review it\nallowed_tools: [Read]\nmax_turns: 4\n",
        )
        .unwrap();
        std::fs::write(agents.join("broken.yaml"), "name: broken\n").unwrap();

        let template = store.load_agent("reviewer").await.expect("load");
        assert_eq!(template.prompt, "Review it");
        assert_eq!(template.max_turns, 4);
        assert_eq!(template.max_budget_usd, 1.0);

        assert_eq!(
            store.load_agent("ghost").await,
            Err(TemplateError::NotFound {
                name: "ghost".to_string()
            })
        );
        assert!(matches!(
            store.load_agent("broken").await,
            Err(TemplateError::Invalid { .. })
        ));
    }
}
