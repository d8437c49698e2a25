use super::ecosystem::ecosystem_to_package_manager;
use crate::config::{DepbotConfig, UpdateConfig};
use serde::Serialize;
use serde_json::{json, Value};

/// One unit of update work: an (ecosystem, directory-or-group) pair handed to
/// the update tool. Immutable for the duration of a run; the reconciler only
/// reads it.
#[derive(Debug, Clone)]
pub struct UpdateJob {
    pub id: String,
    /// Public ecosystem name from the task configuration (npm, gomod, ...)
    pub package_ecosystem: String,
    /// The tool's internal package-manager identifier (npm_and_yarn, go_modules, ...)
    pub package_manager: String,
    pub source_commit: Option<String>,
    pub target_branch: Option<String>,
    pub open_pull_requests_limit: u32,
    pub branch_name_separator: Option<String>,
    pub directory: Option<String>,
    pub directories: Vec<String>,
    pub assignees: Vec<String>,
    pub reviewers: Vec<String>,
    pub labels: Vec<String>,
    pub milestone: Option<i64>,
}

impl UpdateJob {
    pub fn from_config(index: usize, update: &UpdateConfig) -> Self {
        Self {
            id: format!("update-{}-{}", index, update.package_ecosystem),
            package_ecosystem: update.package_ecosystem.clone(),
            package_manager: ecosystem_to_package_manager(&update.package_ecosystem),
            source_commit: None,
            target_branch: update.target_branch.clone(),
            open_pull_requests_limit: update.open_pull_requests_limit,
            branch_name_separator: update.branch_name_separator.clone(),
            directory: update.directory.clone(),
            directories: update.directories.clone(),
            assignees: update.assignees.clone(),
            reviewers: update.reviewers.clone(),
            labels: update.labels.clone(),
            milestone: update.milestone,
        }
    }
}

/// The `{job, credentials}` document fed to the update tool
#[derive(Debug, Clone, Serialize)]
pub struct JobDocument {
    pub job: JobSpec,
    pub credentials: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSpec {
    pub id: String,
    #[serde(rename = "package-manager")]
    pub package_manager: String,
    #[serde(rename = "allowed-updates")]
    pub allowed_updates: Vec<Value>,
    pub source: JobSource,
    #[serde(rename = "experiments", skip_serializing_if = "Option::is_none")]
    pub experiments: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSource {
    pub provider: String,
    /// Repository slug in the provider's addressing scheme:
    /// `{organisation}/{project}/_git/{repository}`
    pub repo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub directories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub hostname: String,
    #[serde(rename = "api-endpoint")]
    pub api_endpoint: String,
}

/// Translates task configuration into the update tool's job and credentials
/// document.
#[derive(Debug, Clone)]
pub struct JobConfigBuilder {
    organization: String,
    hostname: String,
    api_endpoint: String,
    project: String,
    repository: String,
    token: String,
    github_token: Option<String>,
}

impl JobConfigBuilder {
    pub fn new(config: &DepbotConfig, token: &str) -> Self {
        let url = config.organization_url();
        let organization = url
            .path_segments()
            .and_then(|segments| segments.rev().find(|s| !s.is_empty()))
            .unwrap_or_default()
            .to_string();
        Self {
            organization,
            hostname: url.host_str().unwrap_or_default().to_string(),
            api_endpoint: url.to_string(),
            project: config.azure.project.clone(),
            repository: config.azure.repository.clone(),
            token: token.to_string(),
            github_token: config.github_token.clone(),
        }
    }

    pub fn build(&self, job: &UpdateJob) -> JobDocument {
        let mut credentials = vec![json!({
            "type": "git_source",
            "host": self.hostname,
            "username": "x-access-token",
            "password": self.token,
        })];
        if let Some(github_token) = &self.github_token {
            credentials.push(json!({
                "type": "git_source",
                "host": "github.com",
                "username": "x-access-token",
                "password": github_token,
            }));
        }

        JobDocument {
            job: JobSpec {
                id: job.id.clone(),
                package_manager: job.package_manager.clone(),
                allowed_updates: vec![json!({ "update-type": "all" })],
                source: JobSource {
                    provider: "azure".to_string(),
                    repo: format!(
                        "{}/{}/_git/{}",
                        self.organization, self.project, self.repository
                    ),
                    directory: job.directory.clone(),
                    directories: job.directories.clone(),
                    branch: job.target_branch.clone(),
                    commit: job.source_commit.clone(),
                    hostname: self.hostname.clone(),
                    api_endpoint: self.api_endpoint.clone(),
                },
                experiments: None,
            },
            credentials,
        }
    }
}
