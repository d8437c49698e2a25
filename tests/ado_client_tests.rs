//! REST client behaviour against a mocked Azure DevOps server.

use depbot::azure::types::AbandonSpec;
use depbot::azure::{AdoClient, AdoError, IdentityResolver, PullRequestApi};
use serde_json::json;
use std::sync::Arc;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> AdoClient {
    let url = Url::parse(&format!("{}/", server.uri())).unwrap();
    let identity = Arc::new(IdentityResolver::new(url.clone(), "pat".to_string()));
    AdoClient::new(url, "pat".to_string(), identity)
}

#[tokio::test]
async fn default_branch_is_returned_without_ref_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/platform/_apis/git/repositories/billing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "d3adb33f-0000-0000-0000-000000000000",
            "defaultBranch": "refs/heads/develop",
        })))
        .mount(&server)
        .await;

    let branch = client(&server)
        .get_default_branch("platform", "billing")
        .await
        .unwrap();
    assert_eq!(branch, "develop");
}

#[tokio::test]
async fn branch_names_are_listed_without_ref_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/platform/_apis/git/repositories/billing/refs"))
        .and(query_param("filter", "heads/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 2,
            "value": [
                { "name": "refs/heads/main" },
                { "name": "refs/heads/dependabot/npm/main/left-pad" },
            ],
        })))
        .mount(&server)
        .await;

    let branches = client(&server)
        .list_branch_names("platform", "billing")
        .await
        .unwrap();
    assert_eq!(branches, vec!["main", "dependabot/npm/main/left-pad"]);
}

#[tokio::test]
async fn snapshot_collects_properties_of_own_active_pull_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_apis/connectionData"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authenticatedUser": { "id": "11111111-2222-3333-4444-555555555555" },
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/platform/_apis/git/repositories/billing/pullrequests"))
        .and(query_param("searchCriteria.status", "active"))
        .and(query_param(
            "searchCriteria.creatorId",
            "11111111-2222-3333-4444-555555555555",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "pullRequestId": 31 }],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/platform/_apis/git/repositories/billing/pullrequests/31/properties",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": {
                "Depbot.PackageManager": { "$type": "System.String", "$value": "npm_and_yarn" },
                "Depbot.Dependencies": {
                    "$type": "System.String",
                    "$value": "[{\"dependency-name\":\"left-pad\"}]",
                },
            },
        })))
        .mount(&server)
        .await;

    let snapshot = client(&server)
        .get_active_pull_request_properties("platform", "billing")
        .await
        .unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, 31);
    assert_eq!(
        snapshot[0].property("Depbot.PackageManager"),
        Some("npm_and_yarn")
    );
    assert_eq!(
        snapshot[0].property("Depbot.Dependencies"),
        Some(r#"[{"dependency-name":"left-pad"}]"#)
    );
}

#[tokio::test]
async fn project_property_update_round_trips_the_existing_value() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_apis/projects/platform/properties"))
        .and(query_param("keys", "Depbot.DependencyList"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "name": "Depbot.DependencyList", "value": "{\"old\":1}" }],
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/_apis/projects/platform/properties"))
        .and(body_partial_json(json!([{
            "op": "add",
            "path": "/Depbot.DependencyList",
            "value": "{\"old\":1}+merged",
        }])))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let updated = client(&server)
        .update_project_property("platform", "Depbot.DependencyList", &|existing| {
            format!("{existing}+merged")
        })
        .await
        .unwrap();
    assert!(updated);
}

#[tokio::test]
async fn abandon_closes_the_pull_request_and_deletes_its_branch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(
            "/platform/_apis/git/repositories/billing/pullrequests/55/threads",
        ))
        .and(body_partial_json(json!({ "status": "closed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(
            "/platform/_apis/git/repositories/billing/pullrequests/55",
        ))
        .and(body_partial_json(json!({ "status": "abandoned" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pullRequestId": 55,
            "status": "abandoned",
            "sourceRefName": "refs/heads/dependabot/npm/main/left-pad",
            "lastMergeSourceCommit": { "commitId": "abc123" },
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/platform/_apis/git/repositories/billing/refs"))
        .and(body_partial_json(json!([{
            "name": "refs/heads/dependabot/npm/main/left-pad",
            "oldObjectId": "abc123",
            "newObjectId": "0000000000000000000000000000000000000000",
        }])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "success": true }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let abandoned = client(&server)
        .abandon_pull_request(&AbandonSpec {
            project: "platform".to_string(),
            repository: "billing".to_string(),
            pull_request_id: 55,
            comment: Some("Looks like left-pad is up-to-date now.".to_string()),
            delete_source_branch: true,
        })
        .await
        .unwrap();
    assert!(abandoned);
}

#[tokio::test]
async fn unauthorized_responses_surface_as_a_dedicated_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/platform/_apis/git/repositories/billing"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_default_branch("platform", "billing")
        .await
        .unwrap_err();
    assert!(matches!(err, AdoError::Unauthorized(_)));
}

#[tokio::test]
async fn api_errors_carry_the_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/platform/_apis/git/repositories/billing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "TF401019: the repository does not exist",
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_default_branch("platform", "billing")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("TF401019"));
}
