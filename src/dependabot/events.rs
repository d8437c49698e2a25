use crate::azure::types::{ChangeType, FileChange};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One record in the update tool's scenario output: `{type, expect: {data}}`.
/// Records arrive in a strict, tool-determined order and are decoded one at a
/// time before reconciliation; the reconciler never sees untyped payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioOutput {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub expect: Expectation,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Expectation {
    #[serde(default)]
    pub data: Value,
}

/// The closed set of update-job output events. Each variant carries only the
/// fields that event type actually uses; unknown future event kinds decode to
/// `Unknown` and must not break a run.
#[derive(Debug, Clone)]
pub enum UpdateOutput {
    UpdateDependencyList(DependencyListData),
    CreatePullRequest(CreatePullRequestData),
    UpdatePullRequest(UpdatePullRequestData),
    ClosePullRequest(ClosePullRequestData),
    MarkAsProcessed,
    RecordEcosystemVersions,
    IncrementMetric,
    RecordUpdateJobError(JobErrorData),
    RecordUpdateJobUnknownError(JobErrorData),
    Unknown { kind: String },
}

impl UpdateOutput {
    /// Decode one scenario record into its typed event.
    pub fn decode(kind: &str, data: &Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            "update_dependency_list" => {
                UpdateOutput::UpdateDependencyList(DependencyListData::deserialize(data)?)
            }
            "create_pull_request" => {
                UpdateOutput::CreatePullRequest(CreatePullRequestData::deserialize(data)?)
            }
            "update_pull_request" => {
                UpdateOutput::UpdatePullRequest(UpdatePullRequestData::deserialize(data)?)
            }
            "close_pull_request" => {
                UpdateOutput::ClosePullRequest(ClosePullRequestData::deserialize(data)?)
            }
            "mark_as_processed" => UpdateOutput::MarkAsProcessed,
            "record_ecosystem_versions" => UpdateOutput::RecordEcosystemVersions,
            "increment_metric" => UpdateOutput::IncrementMetric,
            "record_update_job_error" => {
                UpdateOutput::RecordUpdateJobError(JobErrorData::deserialize(data)?)
            }
            "record_update_job_unknown_error" => {
                UpdateOutput::RecordUpdateJobUnknownError(JobErrorData::deserialize(data)?)
            }
            other => UpdateOutput::Unknown {
                kind: other.to_string(),
            },
        })
    }

    /// The wire name of this event type, echoed back in results.
    pub fn kind(&self) -> &str {
        match self {
            UpdateOutput::UpdateDependencyList(_) => "update_dependency_list",
            UpdateOutput::CreatePullRequest(_) => "create_pull_request",
            UpdateOutput::UpdatePullRequest(_) => "update_pull_request",
            UpdateOutput::ClosePullRequest(_) => "close_pull_request",
            UpdateOutput::MarkAsProcessed => "mark_as_processed",
            UpdateOutput::RecordEcosystemVersions => "record_ecosystem_versions",
            UpdateOutput::IncrementMetric => "increment_metric",
            UpdateOutput::RecordUpdateJobError(_) => "record_update_job_error",
            UpdateOutput::RecordUpdateJobUnknownError(_) => "record_update_job_unknown_error",
            UpdateOutput::Unknown { kind } => kind,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DependencyListData {
    #[serde(default)]
    pub dependencies: Value,
    #[serde(default, rename = "dependency_files")]
    pub dependency_files: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatePullRequestData {
    #[serde(default, rename = "base-commit-sha")]
    pub base_commit_sha: Option<String>,
    #[serde(default, rename = "pr-title")]
    pub title: String,
    #[serde(default, rename = "pr-body")]
    pub body: String,
    #[serde(default, rename = "commit-message")]
    pub commit_message: String,
    #[serde(default)]
    pub dependencies: Vec<UpdatedDependency>,
    #[serde(default, rename = "dependency-group")]
    pub dependency_group: Option<DependencyGroup>,
    #[serde(default, rename = "updated-dependency-files")]
    pub updated_dependency_files: Vec<UpdatedFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependencyGroup {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatedDependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatedFile {
    #[serde(default, rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_encoding", rename = "content_encoding")]
    pub content_encoding: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub operation: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePullRequestData {
    #[serde(default, rename = "base-commit-sha")]
    pub base_commit_sha: Option<String>,
    #[serde(default, rename = "dependency-names")]
    pub dependency_names: Vec<String>,
    #[serde(default, rename = "updated-dependency-files")]
    pub updated_dependency_files: Vec<UpdatedFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClosePullRequestData {
    #[serde(default, rename = "dependency-names")]
    pub dependency_names: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobErrorData {
    #[serde(default, rename = "error-type")]
    pub error_type: String,
    #[serde(default, rename = "error-details")]
    pub error_details: Value,
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

/// The dependency-identity blob stored as a pull request property: either a
/// flat dependency list or a named group with its member list. This is what
/// re-identifies a logical pull request across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySet {
    Grouped {
        #[serde(rename = "dependency-group-name")]
        group_name: String,
        dependencies: Vec<DependencyRef>,
    },
    Flat(Vec<DependencyRef>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyRef {
    #[serde(rename = "dependency-name")]
    pub name: String,
    #[serde(default, rename = "dependency-version", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

impl DependencySet {
    pub fn from_create_data(data: &CreatePullRequestData) -> Self {
        let dependencies: Vec<DependencyRef> = data
            .dependencies
            .iter()
            .map(|dep| DependencyRef {
                name: dep.name.clone(),
                version: dep.version.clone(),
                directory: dep.directory.clone(),
            })
            .collect();
        match &data.dependency_group {
            Some(group) => DependencySet::Grouped {
                group_name: group.name.clone(),
                dependencies,
            },
            None => DependencySet::Flat(dependencies),
        }
    }

    pub fn group_name(&self) -> Option<&str> {
        match self {
            DependencySet::Grouped { group_name, .. } => Some(group_name),
            DependencySet::Flat(_) => None,
        }
    }

    pub fn dependency_names(&self) -> Vec<&str> {
        let dependencies = match self {
            DependencySet::Grouped { dependencies, .. } => dependencies,
            DependencySet::Flat(dependencies) => dependencies,
        };
        dependencies.iter().map(|d| d.name.as_str()).collect()
    }
}

/// Convert the tool's reported file diffs into pull-request file changes.
/// Non-file entries (symlinks, directories) are dropped; the change type is
/// classified from the reported operation and deleted flag.
pub fn changed_files(files: &[UpdatedFile]) -> Vec<FileChange> {
    files
        .iter()
        .filter(|file| file.kind == "file")
        .map(|file| {
            let change_type = if file.deleted {
                ChangeType::Delete
            } else if file.operation == "update" {
                ChangeType::Edit
            } else {
                ChangeType::Add
            };
            FileChange {
                change_type,
                path: join_path(&file.directory, &file.name),
                content: file.content.clone(),
                encoding: file.content_encoding.clone(),
            }
        })
        .collect()
}

fn join_path(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", directory.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Human text for a close-pull-request reason code. The first dependency is
/// the "lead" dependency in a multi-dependency update. Unknown reason codes
/// yield no comment.
pub fn close_reason_comment(reason: &str, dependency_names: &[String]) -> Option<String> {
    let lead = dependency_names.first().map(String::as_str).unwrap_or("");
    let text = match reason {
        "dependencies_changed" => "Looks like the dependencies have changed".to_string(),
        "dependency_group_empty" => {
            "Looks like the dependencies in this group are now empty".to_string()
        }
        "dependency_removed" => format!("Looks like {lead} is no longer a dependency"),
        "up_to_date" => format!("Looks like {lead} is up-to-date now"),
        "update_no_longer_possible" => format!("Looks like {lead} can no longer be updated"),
        _ => return None,
    };
    Some(format!("{text}, so this is no longer needed."))
}
