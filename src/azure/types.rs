use serde::{Deserialize, Serialize};

// Custom properties used to store update metadata in projects and pull
// requests. These two PR properties are the only durable cross-run identity a
// pull request carries; there is no separate "managed by depbot" flag.
pub const PR_PROPERTY_PACKAGE_MANAGER: &str = "Depbot.PackageManager";
pub const PR_PROPERTY_DEPENDENCIES: &str = "Depbot.Dependencies";
pub const PROJECT_PROPERTY_DEPENDENCY_LIST: &str = "Depbot.DependencyList";

pub const DEFAULT_AUTHOR_EMAIL: &str = "noreply@github.com";
pub const DEFAULT_AUTHOR_NAME: &str = "dependabot[bot]";

/// How a file in a pull request push changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Edit,
    Delete,
}

/// One file change pushed to a pull request source branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub change_type: ChangeType,
    pub path: String,
    pub content: String,
    pub encoding: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestProperty {
    pub name: String,
    pub value: String,
}

/// The opaque metadata snapshot of one existing open pull request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestProperties {
    pub id: u64,
    pub properties: Vec<PullRequestProperty>,
}

impl PullRequestProperties {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub email: String,
    pub name: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self {
            email: DEFAULT_AUTHOR_EMAIL.to_string(),
            name: DEFAULT_AUTHOR_NAME.to_string(),
        }
    }
}

/// Merge strategies which can be used to complete a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    NoFastForward,
    #[default]
    Squash,
    Rebase,
    RebaseMerge,
}

impl MergeStrategy {
    /// Parse a configured strategy name, defaulting to squash for anything unrecognised
    pub fn parse(value: &str) -> Self {
        match value {
            "noFastForward" => MergeStrategy::NoFastForward,
            "rebase" => MergeStrategy::Rebase,
            "rebaseMerge" => MergeStrategy::RebaseMerge,
            _ => MergeStrategy::Squash,
        }
    }

    pub fn as_api_value(&self) -> &'static str {
        match self {
            MergeStrategy::NoFastForward => "noFastForward",
            MergeStrategy::Squash => "squash",
            MergeStrategy::Rebase => "rebase",
            MergeStrategy::RebaseMerge => "rebaseMerge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoCompleteOptions {
    pub ignore_policy_config_ids: Vec<i64>,
    pub merge_strategy: MergeStrategy,
}

/// Everything needed to create one pull request, designed so that repeating
/// the same spec is safe: the push targets a fresh branch at a known commit
/// and the PR creation fails cleanly if the branch already exists.
#[derive(Debug, Clone)]
pub struct PullRequestSpec {
    pub project: String,
    pub repository: String,
    pub source_commit: String,
    pub source_branch: String,
    pub target_branch: String,
    pub author: CommitAuthor,
    pub title: String,
    pub description: String,
    pub commit_message: String,
    pub auto_complete: Option<AutoCompleteOptions>,
    pub assignees: Vec<String>,
    pub reviewers: Vec<String>,
    pub labels: Vec<String>,
    pub work_items: Vec<i64>,
    pub changes: Vec<FileChange>,
    pub properties: Vec<PullRequestProperty>,
}

/// A push of new file changes to an existing pull request. The skip fields
/// are safety guards, not failure conditions: a skipped update reports
/// success without mutating anything.
#[derive(Debug, Clone)]
pub struct UpdateSpec {
    pub project: String,
    pub repository: String,
    pub pull_request_id: u64,
    pub commit: String,
    pub author: CommitAuthor,
    pub changes: Vec<FileChange>,
    pub skip_if_draft: bool,
    pub skip_if_commits_from_authors_other_than: Option<String>,
    pub skip_if_not_behind_target_branch: bool,
}

#[derive(Debug, Clone)]
pub struct AbandonSpec {
    pub project: String,
    pub repository: String,
    pub pull_request_id: u64,
    pub comment: Option<String>,
    pub delete_source_branch: bool,
}

#[derive(Debug, Clone)]
pub struct ApproveSpec {
    pub project: String,
    pub repository: String,
    pub pull_request_id: u64,
}

/// Normalize a repository file path the way the platform expects:
/// backslashes become forward slashes, a leading './' collapses to '/' and a
/// leading slash is ensured.
pub fn normalize_repo_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = if let Some(rest) = path.strip_prefix("./") {
        format!("/{rest}")
    } else {
        path
    };
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

/// The merge commit message contains the PR number and title for tracking,
/// mirroring the platform's own default. Completion options reject messages
/// over ~4000 encoded characters, with the effective limit observed in
/// practice closer to 3500.
pub fn merge_commit_message(id: u64, title: &str, description: &str) -> String {
    let full = format!("Merged PR {id}: {title}\n\n{description}");
    match full.char_indices().nth(3500) {
        Some((idx, _)) => full[..idx].to_string(),
        None => full,
    }
}
