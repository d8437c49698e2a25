//! End-to-end reconciliation behaviour against a recording fake of the
//! pull-request hosting API.

use async_trait::async_trait;
use depbot::azure::types::{
    AbandonSpec, ApproveSpec, CommitAuthor, MergeStrategy, PullRequestProperties,
    PullRequestProperty, PullRequestSpec, UpdateSpec, PR_PROPERTY_DEPENDENCIES,
    PR_PROPERTY_PACKAGE_MANAGER,
};
use depbot::azure::{AdoError, PullRequestApi};
use depbot::dependabot::{
    OutputReconciler, PullRequestIndex, ReconcilerSettings, UpdateJob, UpdateOutput,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Create { source_branch: String },
    Update { pull_request_id: u64 },
    Approve { pull_request_id: u64 },
    Abandon { pull_request_id: u64, comment: Option<String> },
    DefaultBranch,
    ProjectProperty { name: String, value: String },
}

/// Records every mutation the reconciler issues; answers are canned.
#[derive(Default)]
struct RecordingApi {
    calls: Mutex<Vec<Call>>,
    captured_create: Mutex<Option<PullRequestSpec>>,
    captured_update: Mutex<Option<UpdateSpec>>,
}

impl RecordingApi {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PullRequestApi for RecordingApi {
    async fn create_pull_request(&self, spec: &PullRequestSpec) -> Result<u64, AdoError> {
        self.calls.lock().unwrap().push(Call::Create {
            source_branch: spec.source_branch.clone(),
        });
        *self.captured_create.lock().unwrap() = Some(spec.clone());
        Ok(42)
    }

    async fn update_pull_request(&self, spec: &UpdateSpec) -> Result<bool, AdoError> {
        self.calls.lock().unwrap().push(Call::Update {
            pull_request_id: spec.pull_request_id,
        });
        *self.captured_update.lock().unwrap() = Some(spec.clone());
        Ok(true)
    }

    async fn approve_pull_request(&self, spec: &ApproveSpec) -> Result<bool, AdoError> {
        self.calls.lock().unwrap().push(Call::Approve {
            pull_request_id: spec.pull_request_id,
        });
        Ok(true)
    }

    async fn abandon_pull_request(&self, spec: &AbandonSpec) -> Result<bool, AdoError> {
        self.calls.lock().unwrap().push(Call::Abandon {
            pull_request_id: spec.pull_request_id,
            comment: spec.comment.clone(),
        });
        Ok(true)
    }

    async fn get_default_branch(
        &self,
        _project: &str,
        _repository: &str,
    ) -> Result<String, AdoError> {
        self.calls.lock().unwrap().push(Call::DefaultBranch);
        Ok("main".to_string())
    }

    async fn update_project_property(
        &self,
        _project: &str,
        name: &str,
        mutate: &(dyn for<'a> Fn(&'a str) -> String + Send + Sync),
    ) -> Result<bool, AdoError> {
        self.calls.lock().unwrap().push(Call::ProjectProperty {
            name: name.to_string(),
            value: mutate(""),
        });
        Ok(true)
    }
}

fn settings() -> ReconcilerSettings {
    ReconcilerSettings {
        project: "platform".to_string(),
        repository: "billing".to_string(),
        author: CommitAuthor::default(),
        skip_pull_requests: false,
        comment_pull_requests: true,
        abandon_unwanted_pull_requests: true,
        store_dependency_list: true,
        auto_approve: false,
        set_auto_complete: false,
        merge_strategy: MergeStrategy::Squash,
        auto_complete_ignore_config_ids: Vec::new(),
    }
}

fn job() -> UpdateJob {
    UpdateJob {
        id: "update-0-npm".to_string(),
        package_ecosystem: "npm".to_string(),
        package_manager: "npm_and_yarn".to_string(),
        source_commit: None,
        target_branch: Some("main".to_string()),
        open_pull_requests_limit: 5,
        branch_name_separator: None,
        directory: Some("/".to_string()),
        directories: Vec::new(),
        assignees: Vec::new(),
        reviewers: Vec::new(),
        labels: Vec::new(),
        milestone: None,
    }
}

fn open_pr(id: u64, package_manager: &str, dependencies: &str) -> PullRequestProperties {
    PullRequestProperties {
        id,
        properties: vec![
            PullRequestProperty {
                name: PR_PROPERTY_PACKAGE_MANAGER.to_string(),
                value: package_manager.to_string(),
            },
            PullRequestProperty {
                name: PR_PROPERTY_DEPENDENCIES.to_string(),
                value: dependencies.to_string(),
            },
        ],
    }
}

fn reconciler(
    settings: ReconcilerSettings,
    api: Arc<RecordingApi>,
    open: Vec<PullRequestProperties>,
    branches: Vec<String>,
) -> OutputReconciler {
    OutputReconciler::new(settings, api, None, PullRequestIndex::new(open), branches)
}

fn create_event() -> UpdateOutput {
    UpdateOutput::decode(
        "create_pull_request",
        &json!({
            "base-commit-sha": "abc123",
            "pr-title": "Bump left-pad from 1.0.0 to 1.3.0",
            "pr-body": "Bumps left-pad.",
            "commit-message": "Bump left-pad to 1.3.0",
            "dependencies": [{ "name": "left-pad", "version": "1.3.0" }],
            "updated-dependency-files": [{
                "type": "file",
                "name": "package.json",
                "directory": "/",
                "content": "{}",
                "operation": "update"
            }],
        }),
    )
    .unwrap()
}

#[tokio::test]
async fn create_event_creates_pull_request_with_identity_properties() {
    let api = Arc::new(RecordingApi::default());
    let reconciler = reconciler(settings(), api.clone(), vec![], vec!["main".to_string()]);

    let handled = reconciler.process(&job(), &create_event()).await.unwrap();

    assert!(handled);
    let spec = api.captured_create.lock().unwrap().clone().unwrap();
    assert_eq!(spec.source_branch, "dependabot/npm/main/left-pad");
    assert_eq!(spec.source_commit, "abc123");
    assert_eq!(spec.target_branch, "main");
    assert_eq!(
        spec.properties
            .iter()
            .find(|p| p.name == PR_PROPERTY_PACKAGE_MANAGER)
            .map(|p| p.value.as_str()),
        Some("npm_and_yarn")
    );
    let identity = spec
        .properties
        .iter()
        .find(|p| p.name == PR_PROPERTY_DEPENDENCIES)
        .unwrap();
    assert!(identity.value.contains("left-pad"));
}

#[tokio::test]
async fn create_is_a_no_op_when_open_limit_is_reached() {
    let api = Arc::new(RecordingApi::default());
    let mut job = job();
    job.open_pull_requests_limit = 1;
    let open = vec![open_pr(7, "npm_and_yarn", r#"[{"dependency-name":"lodash"}]"#)];
    let reconciler = reconciler(settings(), api.clone(), open, vec![]);

    let handled = reconciler.process(&job, &create_event()).await.unwrap();

    assert!(handled);
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn create_and_update_are_no_ops_when_pull_requests_are_skipped() {
    let api = Arc::new(RecordingApi::default());
    let mut settings = settings();
    settings.skip_pull_requests = true;
    let reconciler = reconciler(settings, api.clone(), vec![], vec![]);

    assert!(reconciler.process(&job(), &create_event()).await.unwrap());
    let update = UpdateOutput::decode(
        "update_pull_request",
        &json!({
            "base-commit-sha": "abc123",
            "dependency-names": ["left-pad"],
            "updated-dependency-files": [],
        }),
    )
    .unwrap();
    assert!(reconciler.process(&job(), &update).await.unwrap());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn create_fails_when_branch_name_collides() {
    for existing in [
        "dependabot/npm/main/left-pad",
        "dependabot/npm/main/left-pad/nested",
        "dependabot/npm/main",
    ] {
        let api = Arc::new(RecordingApi::default());
        let reconciler = reconciler(
            settings(),
            api.clone(),
            vec![],
            vec![existing.to_string()],
        );
        let result = reconciler.process(&job(), &create_event()).await;
        assert!(result.is_err(), "expected collision with '{existing}'");
        assert!(api.calls().is_empty());
    }
}

#[tokio::test]
async fn create_resolves_default_branch_when_no_target_is_configured() {
    let api = Arc::new(RecordingApi::default());
    let mut job = job();
    job.target_branch = None;
    let reconciler = reconciler(settings(), api.clone(), vec![], vec![]);

    reconciler.process(&job, &create_event()).await.unwrap();

    let calls = api.calls();
    assert_eq!(calls[0], Call::DefaultBranch);
    let spec = api.captured_create.lock().unwrap().clone().unwrap();
    assert_eq!(spec.target_branch, "main");
}

#[tokio::test]
async fn update_pushes_to_the_matching_pull_request() {
    let api = Arc::new(RecordingApi::default());
    let open = vec![open_pr(31, "npm_and_yarn", r#"[{"dependency-name":"left-pad"}]"#)];
    let reconciler = reconciler(settings(), api.clone(), open, vec![]);

    let update = UpdateOutput::decode(
        "update_pull_request",
        &json!({
            "base-commit-sha": "def456",
            "dependency-names": ["left-pad"],
            "updated-dependency-files": [{
                "type": "file",
                "name": "package.json",
                "directory": "/",
                "content": "{}",
                "operation": "update"
            }],
        }),
    )
    .unwrap();
    let handled = reconciler.process(&job(), &update).await.unwrap();

    assert!(handled);
    assert_eq!(api.calls(), vec![Call::Update { pull_request_id: 31 }]);
    let spec = api.captured_update.lock().unwrap().clone().unwrap();
    assert_eq!(spec.commit, "def456");
    assert!(spec.skip_if_draft);
    assert!(spec.skip_if_not_behind_target_branch);
}

#[tokio::test]
async fn update_without_a_matching_pull_request_is_a_failure() {
    let api = Arc::new(RecordingApi::default());
    let reconciler = reconciler(settings(), api.clone(), vec![], vec![]);

    let update = UpdateOutput::decode(
        "update_pull_request",
        &json!({ "dependency-names": ["ghost-package"] }),
    )
    .unwrap();
    let result = reconciler.process(&job(), &update).await;

    let err = result.unwrap_err().to_string();
    assert!(err.contains("ghost-package"));
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn close_abandons_the_matching_pull_request_with_a_reason_comment() {
    let api = Arc::new(RecordingApi::default());
    let open = vec![open_pr(55, "npm_and_yarn", r#"[{"dependency-name":"left-pad"}]"#)];
    let reconciler = reconciler(settings(), api.clone(), open, vec![]);

    let close = UpdateOutput::decode(
        "close_pull_request",
        &json!({ "dependency-names": ["left-pad"], "reason": "up_to_date" }),
    )
    .unwrap();
    let handled = reconciler.process(&job(), &close).await.unwrap();

    assert!(handled);
    assert_eq!(
        api.calls(),
        vec![Call::Abandon {
            pull_request_id: 55,
            comment: Some(
                "Looks like left-pad is up-to-date now, so this is no longer needed.".to_string()
            ),
        }]
    );
}

#[tokio::test]
async fn close_is_a_no_op_when_abandoning_is_disabled() {
    let api = Arc::new(RecordingApi::default());
    let mut settings = settings();
    settings.abandon_unwanted_pull_requests = false;
    let open = vec![open_pr(55, "npm_and_yarn", r#"[{"dependency-name":"left-pad"}]"#)];
    let reconciler = reconciler(settings, api.clone(), open, vec![]);

    let close = UpdateOutput::decode(
        "close_pull_request",
        &json!({ "dependency-names": ["left-pad"], "reason": "up_to_date" }),
    )
    .unwrap();
    assert!(reconciler.process(&job(), &close).await.unwrap());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn close_without_a_matching_pull_request_is_a_failure() {
    let api = Arc::new(RecordingApi::default());
    let reconciler = reconciler(settings(), api.clone(), vec![], vec![]);

    let close = UpdateOutput::decode(
        "close_pull_request",
        &json!({ "dependency-names": ["left-pad"] }),
    )
    .unwrap();
    assert!(reconciler.process(&job(), &close).await.is_err());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn dependency_list_is_stored_as_a_merged_project_property() {
    let api = Arc::new(RecordingApi::default());
    let reconciler = reconciler(settings(), api.clone(), vec![], vec![]);

    let event = UpdateOutput::decode(
        "update_dependency_list",
        &json!({
            "dependencies": [{ "name": "left-pad", "version": "1.3.0" }],
            "dependency_files": ["/package.json"],
        }),
    )
    .unwrap();
    assert!(reconciler.process(&job(), &event).await.unwrap());

    let calls = api.calls();
    assert_eq!(calls.len(), 1);
    let Call::ProjectProperty { name, value } = &calls[0] else {
        panic!("expected a project property update, got {calls:?}");
    };
    assert_eq!(name, "Depbot.DependencyList");
    let stored: serde_json::Value = serde_json::from_str(value).unwrap();
    assert_eq!(
        stored["billing"]["npm_and_yarn"]["dependencies"][0]["name"],
        "left-pad"
    );
}

#[tokio::test]
async fn dependency_list_is_not_stored_when_disabled() {
    let api = Arc::new(RecordingApi::default());
    let mut settings = settings();
    settings.store_dependency_list = false;
    let reconciler = reconciler(settings, api.clone(), vec![], vec![]);

    let event = UpdateOutput::decode("update_dependency_list", &json!({})).unwrap();
    assert!(reconciler.process(&job(), &event).await.unwrap());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn auto_approve_uses_the_approver_identity() {
    let author = Arc::new(RecordingApi::default());
    let approver = Arc::new(RecordingApi::default());
    let mut settings = settings();
    settings.auto_approve = true;
    let reconciler = OutputReconciler::new(
        settings,
        author.clone(),
        Some(approver.clone()),
        PullRequestIndex::new(vec![]),
        vec![],
    );

    reconciler.process(&job(), &create_event()).await.unwrap();

    assert_eq!(
        author.calls(),
        vec![Call::Create {
            source_branch: "dependabot/npm/main/left-pad".to_string()
        }]
    );
    assert_eq!(approver.calls(), vec![Call::Approve { pull_request_id: 42 }]);
}

#[tokio::test]
async fn job_error_events_fail_the_run() {
    let api = Arc::new(RecordingApi::default());
    let reconciler = reconciler(settings(), api.clone(), vec![], vec![]);

    let event = UpdateOutput::decode(
        "record_update_job_error",
        &json!({
            "error-type": "job_repo_not_found",
            "error-details": { "message": "repository unreachable" },
        }),
    )
    .unwrap();
    let err = reconciler.process(&job(), &event).await.unwrap_err();
    assert!(err.to_string().contains("job_repo_not_found"));
}

#[tokio::test]
async fn unknown_and_informational_events_succeed_without_calls() {
    let api = Arc::new(RecordingApi::default());
    let reconciler = reconciler(settings(), api.clone(), vec![], vec![]);

    for kind in ["mark_as_processed", "increment_metric", "some_future_event"] {
        let event = UpdateOutput::decode(kind, &json!({})).unwrap();
        assert!(reconciler.process(&job(), &event).await.unwrap(), "{kind}");
    }
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn grouped_create_uses_the_group_name_for_the_branch() {
    let api = Arc::new(RecordingApi::default());
    let reconciler = reconciler(settings(), api.clone(), vec![], vec![]);

    let event = UpdateOutput::decode(
        "create_pull_request",
        &json!({
            "base-commit-sha": "abc123",
            "pr-title": "Bump the build-tools group",
            "pr-body": "",
            "commit-message": "Bump the build-tools group",
            "dependency-group": { "name": "build tools" },
            "dependencies": [
                { "name": "webpack", "version": "5.90.0" },
                { "name": "babel-core", "version": "7.24.0" }
            ],
            "updated-dependency-files": [],
        }),
    )
    .unwrap();
    reconciler.process(&job(), &event).await.unwrap();

    let spec = api.captured_create.lock().unwrap().clone().unwrap();
    assert_eq!(spec.source_branch, "dependabot/npm/main/build-tools");
    let identity = spec
        .properties
        .iter()
        .find(|p| p.name == PR_PROPERTY_DEPENDENCIES)
        .unwrap();
    assert!(identity.value.contains("dependency-group-name"));
}
