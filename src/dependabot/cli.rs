use super::events::{ScenarioOutput, UpdateOutput};
use super::job::{JobDocument, UpdateJob};
use super::reconciler::{OutputReconciler, ReconciliationResult};
use crate::config::ToolConfig;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// The scenario document the update tool writes: the job it ran plus the
/// ordered list of output events it produced.
#[derive(Debug, Default, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    output: Vec<ScenarioOutput>,
}

/// Drives the update tool for one job: writes the job document, invokes the
/// tool, then feeds each output event through the reconciler in order.
pub struct DependabotRunner {
    binary: PathBuf,
    provider: Option<String>,
    local_repository_path: Option<String>,
    updater_image: Option<String>,
    proxy_image: Option<String>,
}

impl DependabotRunner {
    pub fn from_config(tool: &ToolConfig) -> Self {
        Self {
            binary: tool
                .binary
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("dependabot")),
            provider: tool.provider.clone(),
            local_repository_path: tool.local_repository_path.clone(),
            updater_image: tool.updater_image.clone(),
            proxy_image: tool.proxy_image.clone(),
        }
    }

    /// Run one update job end to end and return the per-event results.
    ///
    /// A tool failure before any output was written is an error; a tool
    /// failure after partial output still reconciles what was produced, so a
    /// crashed run never leaves acknowledged events unapplied.
    pub async fn run(
        &self,
        document: &JobDocument,
        job: &UpdateJob,
        reconciler: &OutputReconciler,
    ) -> Result<Vec<ReconciliationResult>> {
        let workdir = tempfile::tempdir().context("failed to create job working directory")?;
        let job_path = workdir.path().join(format!("{}-job.yaml", job.id));
        let output_path = workdir.path().join(format!("{}-scenario.yaml", job.id));

        let rendered =
            serde_yaml::to_string(document).context("failed to serialize job document")?;
        tokio::fs::write(&job_path, rendered)
            .await
            .with_context(|| format!("failed to write {}", job_path.display()))?;

        println!("🤖 Running update job '{}'", job.id);
        let status = self
            .command(&job_path, &output_path)
            .status()
            .await
            .with_context(|| format!("failed to launch {}", self.binary.display()))?;
        if !status.success() {
            warn!(job = %job.id, code = ?status.code(), "update tool exited with failure");
        }

        let outputs = match tokio::fs::read_to_string(&output_path).await {
            Ok(raw) => {
                let scenario: ScenarioFile =
                    serde_yaml::from_str(&raw).context("failed to parse scenario output")?;
                scenario.output
            }
            Err(_) if !status.success() => {
                bail!(
                    "update tool failed (exit {:?}) and wrote no output",
                    status.code()
                );
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", output_path.display()));
            }
        };
        info!(job = %job.id, events = outputs.len(), "update tool produced output");

        let mut results = Vec::with_capacity(outputs.len());
        for record in &outputs {
            results.push(self.reconcile_one(job, reconciler, record).await);
        }
        Ok(results)
    }

    async fn reconcile_one(
        &self,
        job: &UpdateJob,
        reconciler: &OutputReconciler,
        record: &ScenarioOutput,
    ) -> ReconciliationResult {
        let output = match UpdateOutput::decode(&record.kind, &record.expect.data) {
            Ok(output) => output,
            Err(err) => {
                error!(kind = %record.kind, %err, "malformed output event");
                return ReconciliationResult {
                    kind: record.kind.clone(),
                    data: record.expect.data.clone(),
                    success: false,
                    error: Some(format!("malformed '{}' event: {err}", record.kind)),
                };
            }
        };
        match reconciler.process(job, &output).await {
            Ok(success) => ReconciliationResult {
                kind: record.kind.clone(),
                data: record.expect.data.clone(),
                success,
                error: None,
            },
            Err(err) => {
                error!(kind = %record.kind, %err, "failed to reconcile output event");
                ReconciliationResult {
                    kind: record.kind.clone(),
                    data: record.expect.data.clone(),
                    success: false,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    fn command(&self, job_path: &Path, output_path: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("update")
            .arg("--file")
            .arg(job_path)
            .arg("--output")
            .arg(output_path);
        if let Some(provider) = &self.provider {
            command.arg("--provider").arg(provider);
        }
        if let Some(path) = &self.local_repository_path {
            command.arg("--local").arg(path);
        }
        if let Some(image) = &self.updater_image {
            command.arg("--updater-image").arg(image);
        }
        if let Some(image) = &self.proxy_image {
            command.arg("--proxy-image").arg(image);
        }
        command.stdin(Stdio::null()).kill_on_drop(true);
        debug!(command = ?command.as_std(), "update tool invocation");
        command
    }
}
