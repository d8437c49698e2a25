use super::errors::AdoError;
use super::identity::IdentityResolver;
use super::types::{
    merge_commit_message, normalize_repo_path, AbandonSpec, ApproveSpec, FileChange,
    PullRequestProperties, PullRequestProperty, PullRequestSpec, UpdateSpec,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

const API_VERSION: &str = "7.1";
const API_VERSION_PREVIEW: &str = "7.1-preview.1";
const DELETED_OBJECT_ID: &str = "0000000000000000000000000000000000000000";

/// The pull-request hosting collaborator the reconciler issues mutations
/// through. All calls are idempotent-tolerant: mutation specs are designed so
/// repeating them is safe (pushes target the current branch tip; creations
/// fail cleanly when the branch already exists).
#[async_trait]
pub trait PullRequestApi: Send + Sync {
    async fn create_pull_request(&self, spec: &PullRequestSpec) -> Result<u64, AdoError>;
    async fn update_pull_request(&self, spec: &UpdateSpec) -> Result<bool, AdoError>;
    async fn approve_pull_request(&self, spec: &ApproveSpec) -> Result<bool, AdoError>;
    async fn abandon_pull_request(&self, spec: &AbandonSpec) -> Result<bool, AdoError>;
    async fn get_default_branch(&self, project: &str, repository: &str)
        -> Result<String, AdoError>;
    async fn update_project_property(
        &self,
        project: &str,
        name: &str,
        mutate: &(dyn for<'a> Fn(&'a str) -> String + Send + Sync),
    ) -> Result<bool, AdoError>;
}

/// Azure DevOps REST client for managing dependency-update pull requests
#[derive(Debug, Clone)]
pub struct AdoClient {
    organization_url: Url,
    token: String,
    http: reqwest::Client,
    identity: Arc<IdentityResolver>,
}

impl AdoClient {
    pub fn new(organization_url: Url, token: String, identity: Arc<IdentityResolver>) -> Self {
        Self {
            organization_url,
            token,
            http: reqwest::Client::new(),
            identity,
        }
    }

    fn repo_url(&self, project: &str, repository: &str, suffix: &str) -> String {
        format!(
            "{}{}/_apis/git/repositories/{}{}",
            self.organization_url, project, repository, suffix
        )
    }

    async fn get_json(&self, url: &str) -> Result<Value, AdoError> {
        let response = self
            .http
            .get(url)
            .basic_auth("", Some(&self.token))
            .header("Accept", "application/json")
            .send()
            .await?;
        Self::read_body(url, response).await
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        url: &str,
        body: &Value,
    ) -> Result<Value, AdoError> {
        let response = self
            .http
            .request(method, url)
            .basic_auth("", Some(&self.token))
            .json(body)
            .send()
            .await?;
        Self::read_body(url, response).await
    }

    async fn send_json_patch(&self, url: &str, body: &Value) -> Result<Value, AdoError> {
        let response = self
            .http
            .patch(url)
            .basic_auth("", Some(&self.token))
            .header("Content-Type", "application/json-patch+json")
            .body(body.to_string())
            .send()
            .await?;
        Self::read_body(url, response).await
    }

    async fn read_body(url: &str, response: reqwest::Response) -> Result<Value, AdoError> {
        let status = response.status();
        if status.as_u16() == 401 {
            return Err(AdoError::Unauthorized(url.to_string()));
        }
        let text = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
                .unwrap_or(text);
            return Err(AdoError::Api {
                status: status.as_u16(),
                url: url.to_string(),
                message,
            });
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| AdoError::decode("response body", e))
    }

    /// Fetch the properties of all active pull requests created by the
    /// authenticated user. This is the per-run snapshot the reconciler
    /// re-identifies logical pull requests against.
    pub async fn get_active_pull_request_properties(
        &self,
        project: &str,
        repository: &str,
    ) -> Result<Vec<PullRequestProperties>, AdoError> {
        let creator = self.identity.authenticated_user_id().await?;
        let url = self.repo_url(
            project,
            repository,
            &format!(
                "/pullrequests?searchCriteria.status=active&searchCriteria.creatorId={creator}&api-version={API_VERSION}"
            ),
        );
        let body = self.get_json(&url).await?;
        let ids: Vec<u64> = body
            .get("value")
            .and_then(Value::as_array)
            .map(|prs| {
                prs.iter()
                    .filter_map(|pr| pr.get("pullRequestId").and_then(Value::as_u64))
                    .collect()
            })
            .unwrap_or_default();

        let mut snapshot = Vec::with_capacity(ids.len());
        for id in ids {
            let url = self.repo_url(
                project,
                repository,
                &format!("/pullrequests/{id}/properties?api-version={API_VERSION_PREVIEW}"),
            );
            let body = self.get_json(&url).await?;
            let properties = body
                .get("value")
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .filter_map(|(name, entry)| {
                            entry.get("$value").map(|value| PullRequestProperty {
                                name: name.clone(),
                                value: match value {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                },
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            snapshot.push(PullRequestProperties { id, properties });
        }
        info!(
            count = snapshot.len(),
            "fetched active pull request snapshot"
        );
        Ok(snapshot)
    }

    /// List the names of all branches in the repository, without the
    /// refs/heads/ prefix.
    pub async fn list_branch_names(
        &self,
        project: &str,
        repository: &str,
    ) -> Result<Vec<String>, AdoError> {
        let url = self.repo_url(
            project,
            repository,
            &format!("/refs?filter=heads/&api-version={API_VERSION}"),
        );
        let body = self.get_json(&url).await?;
        Ok(body
            .get("value")
            .and_then(Value::as_array)
            .map(|refs| {
                refs.iter()
                    .filter_map(|r| r.get("name").and_then(Value::as_str))
                    .map(|name| name.trim_start_matches("refs/heads/").to_string())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn push_changes(
        &self,
        project: &str,
        repository: &str,
        ref_name: &str,
        old_object_id: &str,
        comment: &str,
        author: Option<&super::types::CommitAuthor>,
        changes: &[FileChange],
    ) -> Result<(), AdoError> {
        let mut commit = json!({
            "comment": comment,
            "changes": changes.iter().map(change_payload).collect::<Vec<_>>(),
        });
        if let Some(author) = author {
            commit["author"] = json!({ "name": author.name, "email": author.email });
        }
        let body = json!({
            "refUpdates": [{ "name": ref_name, "oldObjectId": old_object_id }],
            "commits": [commit],
        });
        let url = self.repo_url(
            project,
            repository,
            &format!("/pushes?api-version={API_VERSION}"),
        );
        self.send_json(reqwest::Method::POST, &url, &body).await?;
        Ok(())
    }

    async fn get_pull_request(
        &self,
        project: &str,
        repository: &str,
        id: u64,
    ) -> Result<Value, AdoError> {
        let url = self.repo_url(
            project,
            repository,
            &format!("/pullrequests/{id}?api-version={API_VERSION}"),
        );
        self.get_json(&url).await
    }

    async fn resolve_reviewers(&self, spec: &PullRequestSpec) -> Vec<Value> {
        // The platform has no separate assignee concept for pull requests;
        // assignees become required reviewers and plain reviewers optional.
        let mut reviewers = Vec::new();
        for assignee in &spec.assignees {
            match self.identity.resolve(assignee).await {
                Some(id) => reviewers.push(json!({
                    "id": id,
                    "isRequired": true,
                    "isFlagged": true,
                })),
                None => warn!(identity = %assignee, "unable to resolve assignee identity"),
            }
        }
        for reviewer in &spec.reviewers {
            match self.identity.resolve(reviewer).await {
                Some(id) => reviewers.push(json!({ "id": id })),
                None => warn!(identity = %reviewer, "unable to resolve reviewer identity"),
            }
        }
        reviewers
    }
}

fn change_payload(change: &FileChange) -> Value {
    let change_type = match change.change_type {
        super::types::ChangeType::Add => "add",
        super::types::ChangeType::Edit => "edit",
        super::types::ChangeType::Delete => "delete",
    };
    let mut payload = json!({
        "changeType": change_type,
        "item": { "path": normalize_repo_path(&change.path) },
    });
    if change.change_type != super::types::ChangeType::Delete {
        let content = if change.encoding.eq_ignore_ascii_case("base64") {
            change.content.clone()
        } else {
            BASE64.encode(change.content.as_bytes())
        };
        payload["newContent"] = json!({
            "content": content,
            "contentType": "base64encoded",
        });
    }
    payload
}

#[async_trait]
impl PullRequestApi for AdoClient {
    async fn create_pull_request(&self, spec: &PullRequestSpec) -> Result<u64, AdoError> {
        info!(title = %spec.title, "creating pull request");

        // Create the source branch and commit the file changes
        println!(
            "📤 Pushing {} change(s) to branch '{}'",
            spec.changes.len(),
            spec.source_branch
        );
        self.push_changes(
            &spec.project,
            &spec.repository,
            &format!("refs/heads/{}", spec.source_branch),
            &spec.source_commit,
            &spec.commit_message,
            Some(&spec.author),
            &spec.changes,
        )
        .await?;

        let reviewers = self.resolve_reviewers(spec).await;

        let body = json!({
            "sourceRefName": format!("refs/heads/{}", spec.source_branch),
            "targetRefName": format!("refs/heads/{}", spec.target_branch),
            "title": spec.title,
            "description": spec.description,
            "reviewers": reviewers,
            "workItemRefs": spec.work_items.iter().map(|id| json!({ "id": id.to_string() })).collect::<Vec<_>>(),
            "labels": spec.labels.iter().map(|label| json!({ "name": label })).collect::<Vec<_>>(),
            "isDraft": false,
        });
        let url = self.repo_url(
            &spec.project,
            &spec.repository,
            &format!("/pullrequests?supportsIterations=true&api-version={API_VERSION}"),
        );
        let created = self.send_json(reqwest::Method::POST, &url, &body).await?;
        let id = created
            .get("pullRequestId")
            .and_then(Value::as_u64)
            .ok_or_else(|| AdoError::NotFound("pullRequestId in creation response".to_string()))?;

        // Attach the dependency metadata that makes the PR re-discoverable
        if !spec.properties.is_empty() {
            let patch: Vec<Value> = spec
                .properties
                .iter()
                .map(|p| json!({ "op": "add", "path": format!("/{}", p.name), "value": p.value }))
                .collect();
            let url = self.repo_url(
                &spec.project,
                &spec.repository,
                &format!("/pullrequests/{id}/properties?api-version={API_VERSION_PREVIEW}"),
            );
            self.send_json_patch(&url, &Value::Array(patch)).await?;
        }

        if let Some(auto_complete) = &spec.auto_complete {
            let user_id = self.identity.authenticated_user_id().await?;
            let body = json!({
                "autoCompleteSetBy": { "id": user_id },
                "completionOptions": {
                    "autoCompleteIgnoreConfigIds": auto_complete.ignore_policy_config_ids,
                    "deleteSourceBranch": true,
                    "mergeCommitMessage": merge_commit_message(id, &spec.title, &spec.description),
                    "mergeStrategy": auto_complete.merge_strategy.as_api_value(),
                    "transitionWorkItems": false,
                },
            });
            let url = self.repo_url(
                &spec.project,
                &spec.repository,
                &format!("/pullrequests/{id}?api-version={API_VERSION}"),
            );
            self.send_json(reqwest::Method::PATCH, &url, &body).await?;
        }

        println!("📋 Created PR #{id}: {}", spec.title);
        Ok(id)
    }

    async fn update_pull_request(&self, spec: &UpdateSpec) -> Result<bool, AdoError> {
        info!(pull_request = spec.pull_request_id, "updating pull request");
        let pr = self
            .get_pull_request(&spec.project, &spec.repository, spec.pull_request_id)
            .await?;

        if spec.skip_if_draft && pr.get("isDraft").and_then(Value::as_bool).unwrap_or(false) {
            println!(
                "⏭️  Skipping update of PR #{} because it is a draft",
                spec.pull_request_id
            );
            return Ok(true);
        }

        if let Some(expected_author) = &spec.skip_if_commits_from_authors_other_than {
            let url = self.repo_url(
                &spec.project,
                &spec.repository,
                &format!(
                    "/pullrequests/{}/commits?api-version={API_VERSION}",
                    spec.pull_request_id
                ),
            );
            let commits = self.get_json(&url).await?;
            let foreign = commits
                .get("value")
                .and_then(Value::as_array)
                .map(|commits| {
                    commits.iter().any(|c| {
                        c.pointer("/author/email").and_then(Value::as_str)
                            != Some(expected_author.as_str())
                    })
                })
                .unwrap_or(false);
            if foreign {
                println!(
                    "⏭️  Skipping update of PR #{} because it has commits from another author",
                    spec.pull_request_id
                );
                return Ok(true);
            }
        }

        let source_ref = pr
            .get("sourceRefName")
            .and_then(Value::as_str)
            .ok_or_else(|| AdoError::NotFound("sourceRefName on pull request".to_string()))?
            .to_string();
        let target_ref = pr
            .get("targetRefName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if spec.skip_if_not_behind_target_branch {
            let source = source_ref.trim_start_matches("refs/heads/");
            let target = target_ref.trim_start_matches("refs/heads/");
            let url = self.repo_url(
                &spec.project,
                &spec.repository,
                &format!(
                    "/diffs/commits?baseVersion={target}&targetVersion={source}&$top=0&api-version={API_VERSION}"
                ),
            );
            let diff = self.get_json(&url).await?;
            let behind = diff.get("behindCount").and_then(Value::as_u64).unwrap_or(0);
            if behind == 0 {
                println!(
                    "⏭️  Skipping update of PR #{} because it is up to date with '{target}'",
                    spec.pull_request_id
                );
                return Ok(true);
            }
        }

        let old_object_id = pr
            .pointer("/lastMergeSourceCommit/commitId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AdoError::NotFound("lastMergeSourceCommit on pull request".to_string())
            })?;
        let has_conflicts = pr.get("mergeStatus").and_then(Value::as_str) == Some("conflicts");
        let comment = if has_conflicts {
            "Resolve merge conflicts"
        } else {
            "Update dependency files"
        };

        println!(
            "📤 Pushing {} change(s) to branch '{}'",
            spec.changes.len(),
            source_ref.trim_start_matches("refs/heads/")
        );
        self.push_changes(
            &spec.project,
            &spec.repository,
            &source_ref,
            old_object_id,
            comment,
            Some(&spec.author),
            &spec.changes,
        )
        .await?;
        println!("🔄 Updated PR #{}", spec.pull_request_id);
        Ok(true)
    }

    async fn approve_pull_request(&self, spec: &ApproveSpec) -> Result<bool, AdoError> {
        info!(pull_request = spec.pull_request_id, "approving pull request");
        let user_id = self.identity.authenticated_user_id().await?;
        let url = self.repo_url(
            &spec.project,
            &spec.repository,
            &format!(
                "/pullrequests/{}/reviewers/{user_id}?api-version={API_VERSION}",
                spec.pull_request_id
            ),
        );
        // 10 = approved, 5 = approved with suggestions, 0 = no vote,
        // -5 = waiting for author, -10 = rejected
        let body = json!({ "vote": 10, "isReapprove": true });
        self.send_json(reqwest::Method::PUT, &url, &body).await?;
        println!("✅ Approved PR #{}", spec.pull_request_id);
        Ok(true)
    }

    async fn abandon_pull_request(&self, spec: &AbandonSpec) -> Result<bool, AdoError> {
        info!(pull_request = spec.pull_request_id, "abandoning pull request");

        if let Some(comment) = &spec.comment {
            let url = self.repo_url(
                &spec.project,
                &spec.repository,
                &format!(
                    "/pullrequests/{}/threads?api-version={API_VERSION}",
                    spec.pull_request_id
                ),
            );
            let body = json!({
                "status": "closed",
                "comments": [{ "content": comment, "commentType": "system" }],
            });
            self.send_json(reqwest::Method::POST, &url, &body).await?;
        }

        let url = self.repo_url(
            &spec.project,
            &spec.repository,
            &format!(
                "/pullrequests/{}?api-version={API_VERSION}",
                spec.pull_request_id
            ),
        );
        let abandoned = self
            .send_json(
                reqwest::Method::PATCH,
                &url,
                &json!({ "status": "abandoned" }),
            )
            .await?;

        if spec.delete_source_branch {
            let source_ref = abandoned.get("sourceRefName").and_then(Value::as_str);
            let old_object_id = abandoned
                .pointer("/lastMergeSourceCommit/commitId")
                .and_then(Value::as_str);
            if let (Some(source_ref), Some(old_object_id)) = (source_ref, old_object_id) {
                let url = self.repo_url(
                    &spec.project,
                    &spec.repository,
                    &format!("/refs?api-version={API_VERSION}"),
                );
                let body = json!([{
                    "name": source_ref,
                    "oldObjectId": old_object_id,
                    "newObjectId": DELETED_OBJECT_ID,
                }]);
                self.send_json(reqwest::Method::POST, &url, &body).await?;
            } else {
                debug!(
                    pull_request = spec.pull_request_id,
                    "no source branch information returned; skipping branch deletion"
                );
            }
        }

        println!("🗑️  Abandoned PR #{}", spec.pull_request_id);
        Ok(true)
    }

    async fn get_default_branch(
        &self,
        project: &str,
        repository: &str,
    ) -> Result<String, AdoError> {
        let url = self.repo_url(project, repository, &format!("?api-version={API_VERSION}"));
        let repo = self.get_json(&url).await?;
        let branch = repo
            .get("defaultBranch")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AdoError::NotFound(format!("default branch of '{project}/{repository}'"))
            })?;
        Ok(branch.trim_start_matches("refs/heads/").to_string())
    }

    async fn update_project_property(
        &self,
        project: &str,
        name: &str,
        mutate: &(dyn for<'a> Fn(&'a str) -> String + Send + Sync),
    ) -> Result<bool, AdoError> {
        // Read-modify-write of the whole property value; the mutator is
        // responsible for merging so no partial-key patches ever happen.
        let url = format!(
            "{}_apis/projects/{}/properties?keys={}&api-version={API_VERSION_PREVIEW}",
            self.organization_url, project, name
        );
        let existing = match self.get_json(&url).await {
            Ok(body) => body
                .get("value")
                .and_then(Value::as_array)
                .and_then(|props| {
                    props
                        .iter()
                        .find(|p| p.get("name").and_then(Value::as_str) == Some(name))
                })
                .and_then(|p| p.get("value").and_then(Value::as_str))
                .unwrap_or_default()
                .to_string(),
            Err(e) if e.is_not_found() => String::new(),
            Err(e) => return Err(e),
        };

        let updated = mutate(&existing);
        let url = format!(
            "{}_apis/projects/{}/properties?api-version={API_VERSION_PREVIEW}",
            self.organization_url, project
        );
        let patch = json!([{ "op": "add", "path": format!("/{name}"), "value": updated }]);
        self.send_json_patch(&url, &patch).await?;
        Ok(true)
    }
}
