use super::branch::branch_name_for_update;
use super::dependency_list::merge_dependency_list;
use super::events::{
    changed_files, close_reason_comment, ClosePullRequestData, CreatePullRequestData,
    DependencyListData, DependencySet, JobErrorData, UpdateOutput, UpdatePullRequestData,
};
use super::index::PullRequestIndex;
use super::job::UpdateJob;
use crate::azure::client::PullRequestApi;
use crate::azure::types::{
    AbandonSpec, ApproveSpec, AutoCompleteOptions, CommitAuthor, MergeStrategy,
    PullRequestProperty, PullRequestSpec, UpdateSpec, PROJECT_PROPERTY_DEPENDENCY_LIST,
    PR_PROPERTY_DEPENDENCIES, PR_PROPERTY_PACKAGE_MANAGER,
};
use crate::config::DepbotConfig;
use anyhow::{bail, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Behaviour switches for one reconciliation run, resolved from configuration
/// once up front so event handling never consults raw config.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub project: String,
    pub repository: String,
    pub author: CommitAuthor,
    pub skip_pull_requests: bool,
    pub comment_pull_requests: bool,
    pub abandon_unwanted_pull_requests: bool,
    pub store_dependency_list: bool,
    pub auto_approve: bool,
    pub set_auto_complete: bool,
    pub merge_strategy: MergeStrategy,
    pub auto_complete_ignore_config_ids: Vec<i64>,
}

impl ReconcilerSettings {
    pub fn from_config(config: &DepbotConfig) -> Self {
        let behavior = &config.behavior;
        let mut author = CommitAuthor::default();
        if let Some(email) = config.author.email.as_deref().filter(|e| !e.is_empty()) {
            author.email = email.to_string();
        }
        if let Some(name) = config.author.name.as_deref().filter(|n| !n.is_empty()) {
            author.name = name.to_string();
        }
        Self {
            project: config.azure.project.clone(),
            repository: config.azure.repository.clone(),
            author,
            skip_pull_requests: behavior.skip_pull_requests,
            comment_pull_requests: behavior.comment_pull_requests,
            abandon_unwanted_pull_requests: behavior.abandon_unwanted_pull_requests,
            store_dependency_list: behavior.store_dependency_list,
            auto_approve: behavior.auto_approve,
            set_auto_complete: behavior.set_auto_complete,
            merge_strategy: MergeStrategy::parse(&behavior.merge_strategy),
            auto_complete_ignore_config_ids: behavior.auto_complete_ignore_config_ids.clone(),
        }
    }
}

/// The outcome of reconciling one output event. The event's wire name and
/// payload are echoed back so a partial run can be reported with full
/// context for each event, not just the ones that failed.
#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    pub kind: String,
    pub data: serde_json::Value,
    pub success: bool,
    pub error: Option<String>,
}

/// Applies one update job's output events to the hosted pull requests.
///
/// Holds a static snapshot of the open pull requests and branch names taken
/// before the run started. The snapshot is deliberately never refreshed while
/// events are processed: the update tool emits at most one mutation per
/// logical dependency set per run, so later events never need to observe
/// earlier mutations from the same run.
pub struct OutputReconciler {
    settings: ReconcilerSettings,
    author_client: Arc<dyn PullRequestApi>,
    approver_client: Option<Arc<dyn PullRequestApi>>,
    index: PullRequestIndex,
    existing_branch_names: Vec<String>,
}

impl OutputReconciler {
    pub fn new(
        settings: ReconcilerSettings,
        author_client: Arc<dyn PullRequestApi>,
        approver_client: Option<Arc<dyn PullRequestApi>>,
        index: PullRequestIndex,
        existing_branch_names: Vec<String>,
    ) -> Self {
        Self {
            settings,
            author_client,
            approver_client,
            index,
            existing_branch_names,
        }
    }

    /// Reconcile a single output event.
    ///
    /// Returns `Ok(true)` when the event was handled (including deliberate
    /// no-ops from disabled features or reached limits), `Ok(false)` when the
    /// platform declined the mutation, and `Err` when the event cannot be
    /// honoured at all, for example an update for a pull request that no
    /// longer exists.
    pub async fn process(&self, job: &UpdateJob, output: &UpdateOutput) -> Result<bool> {
        println!("🔁 Processing '{}'", output.kind());
        match output {
            UpdateOutput::UpdateDependencyList(data) => self.store_dependency_list(job, data).await,
            UpdateOutput::CreatePullRequest(data) => self.create(job, data).await,
            UpdateOutput::UpdatePullRequest(data) => self.update(job, data).await,
            UpdateOutput::ClosePullRequest(data) => self.close(job, data).await,
            UpdateOutput::MarkAsProcessed => Ok(true),
            UpdateOutput::RecordEcosystemVersions => Ok(true),
            UpdateOutput::IncrementMetric => Ok(true),
            UpdateOutput::RecordUpdateJobError(data) => self.job_error(data),
            UpdateOutput::RecordUpdateJobUnknownError(data) => self.job_error(data),
            UpdateOutput::Unknown { kind } => {
                warn!(kind, "unknown output event type, skipping");
                Ok(true)
            }
        }
    }

    async fn store_dependency_list(
        &self,
        job: &UpdateJob,
        data: &DependencyListData,
    ) -> Result<bool> {
        if !self.settings.store_dependency_list {
            return Ok(true);
        }
        let repository = self.settings.repository.clone();
        let package_manager = job.package_manager.clone();
        let dependencies = data.dependencies.clone();
        let dependency_files = data.dependency_files.clone();
        let updated = self
            .author_client
            .update_project_property(
                &self.settings.project,
                PROJECT_PROPERTY_DEPENDENCY_LIST,
                &move |existing| {
                    merge_dependency_list(
                        existing,
                        &repository,
                        &package_manager,
                        &dependencies,
                        &dependency_files,
                        Utc::now(),
                    )
                },
            )
            .await?;
        Ok(updated)
    }

    async fn create(&self, job: &UpdateJob, data: &CreatePullRequestData) -> Result<bool> {
        if self.settings.skip_pull_requests {
            warn!("skipping pull request creation, skip_pull_requests is enabled");
            return Ok(true);
        }
        if job.open_pull_requests_limit > 0
            && self.index.len() >= job.open_pull_requests_limit as usize
        {
            warn!(
                limit = job.open_pull_requests_limit,
                open = self.index.len(),
                "skipping pull request creation, open pull request limit reached"
            );
            return Ok(true);
        }

        let dependency_set = DependencySet::from_create_data(data);
        let dependency_names = dependency_set.dependency_names();
        let changes = changed_files(&data.updated_dependency_files);

        let target_branch = match &job.target_branch {
            Some(branch) => branch.clone(),
            None => {
                self.author_client
                    .get_default_branch(&self.settings.project, &self.settings.repository)
                    .await?
            }
        };
        let directory = self.job_directory(job, &changes);
        let source_branch = branch_name_for_update(
            &job.package_ecosystem,
            &target_branch,
            directory.as_deref(),
            dependency_set.group_name(),
            &dependency_names,
            job.branch_name_separator.as_deref(),
        );
        if let Some(existing) = self.conflicting_branch(&source_branch) {
            bail!(
                "source branch '{source_branch}' conflicts with existing branch '{existing}'; \
                 delete the stale branch and re-run"
            );
        }

        let source_commit = match data.base_commit_sha.as_deref().or(job.source_commit.as_deref())
        {
            Some(commit) => commit.to_string(),
            None => bail!("create_pull_request event carries no base commit"),
        };

        let auto_complete = self.settings.set_auto_complete.then(|| AutoCompleteOptions {
            ignore_policy_config_ids: self.settings.auto_complete_ignore_config_ids.clone(),
            merge_strategy: self.settings.merge_strategy,
        });
        let spec = PullRequestSpec {
            project: self.settings.project.clone(),
            repository: self.settings.repository.clone(),
            source_commit,
            source_branch: source_branch.clone(),
            target_branch,
            author: self.settings.author.clone(),
            title: data.title.clone(),
            description: data.body.clone(),
            commit_message: data.commit_message.clone(),
            auto_complete,
            assignees: job.assignees.clone(),
            reviewers: job.reviewers.clone(),
            labels: job.labels.clone(),
            work_items: job.milestone.into_iter().collect(),
            changes,
            properties: vec![
                PullRequestProperty {
                    name: PR_PROPERTY_PACKAGE_MANAGER.to_string(),
                    value: job.package_manager.clone(),
                },
                PullRequestProperty {
                    name: PR_PROPERTY_DEPENDENCIES.to_string(),
                    value: serde_json::to_string(&dependency_set)?,
                },
            ],
        };

        let id = self.author_client.create_pull_request(&spec).await?;
        info!(pull_request = id, source_branch, "created pull request");

        if self.settings.auto_approve {
            self.approve(id).await?;
        }
        Ok(true)
    }

    async fn update(&self, job: &UpdateJob, data: &UpdatePullRequestData) -> Result<bool> {
        if self.settings.skip_pull_requests {
            warn!("skipping pull request update, skip_pull_requests is enabled");
            return Ok(true);
        }
        let Some(existing) = self.index.find(&job.package_manager, &data.dependency_names) else {
            bail!(
                "could not find pull request to update for dependencies [{}]",
                data.dependency_names.join(", ")
            );
        };

        let commit = match data.base_commit_sha.as_deref().or(job.source_commit.as_deref()) {
            Some(commit) => commit.to_string(),
            None => bail!("update_pull_request event carries no base commit"),
        };
        let spec = UpdateSpec {
            project: self.settings.project.clone(),
            repository: self.settings.repository.clone(),
            pull_request_id: existing.id,
            commit,
            author: self.settings.author.clone(),
            changes: changed_files(&data.updated_dependency_files),
            skip_if_draft: true,
            skip_if_commits_from_authors_other_than: Some(self.settings.author.email.clone()),
            skip_if_not_behind_target_branch: true,
        };
        let updated = self.author_client.update_pull_request(&spec).await?;
        if updated {
            info!(pull_request = existing.id, "updated pull request");
            if self.settings.auto_approve {
                self.approve(existing.id).await?;
            }
        }
        Ok(updated)
    }

    async fn close(&self, job: &UpdateJob, data: &ClosePullRequestData) -> Result<bool> {
        if !self.settings.abandon_unwanted_pull_requests {
            warn!("skipping pull request close, abandon_unwanted_pull_requests is disabled");
            return Ok(true);
        }
        let Some(existing) = self.index.find(&job.package_manager, &data.dependency_names) else {
            bail!(
                "could not find pull request to close for dependencies [{}]",
                data.dependency_names.join(", ")
            );
        };

        let comment = if self.settings.comment_pull_requests {
            data.reason
                .as_deref()
                .and_then(|reason| close_reason_comment(reason, &data.dependency_names))
        } else {
            None
        };
        let spec = AbandonSpec {
            project: self.settings.project.clone(),
            repository: self.settings.repository.clone(),
            pull_request_id: existing.id,
            comment,
            delete_source_branch: true,
        };
        let abandoned = self.author_client.abandon_pull_request(&spec).await?;
        if abandoned {
            info!(pull_request = existing.id, "abandoned pull request");
        }
        Ok(abandoned)
    }

    fn job_error(&self, data: &JobErrorData) -> Result<bool> {
        bail!(
            "update job failed: {} {}",
            data.error_type,
            data.error_details
        );
    }

    async fn approve(&self, pull_request_id: u64) -> Result<()> {
        let Some(approver) = &self.approver_client else {
            warn!("auto_approve is enabled but no approver token is configured");
            return Ok(());
        };
        let spec = ApproveSpec {
            project: self.settings.project.clone(),
            repository: self.settings.repository.clone(),
            pull_request_id,
        };
        if !approver.approve_pull_request(&spec).await? {
            warn!(pull_request = pull_request_id, "could not approve pull request");
        }
        Ok(())
    }

    /// A candidate name conflicts when any existing branch is equal to it, is
    /// nested under it or contains it as a parent. Git refs are a namespace:
    /// `a/b` and `a/b/c` cannot both exist.
    fn conflicting_branch(&self, candidate: &str) -> Option<&str> {
        self.existing_branch_names
            .iter()
            .map(String::as_str)
            .find(|existing| {
                *existing == candidate
                    || existing.starts_with(&format!("{candidate}/"))
                    || candidate.starts_with(&format!("{existing}/"))
            })
    }

    fn job_directory(
        &self,
        job: &UpdateJob,
        changes: &[crate::azure::types::FileChange],
    ) -> Option<String> {
        if job.directory.is_some() {
            return job.directory.clone();
        }
        // Multi-directory jobs pick the directory the changed files live in.
        let first = changes.first()?;
        job.directories
            .iter()
            .find(|dir| {
                let dir = dir.trim_end_matches('/');
                first.path.starts_with(&format!("{dir}/")) || first.path == *dir
            })
            .cloned()
    }
}
