use std::time::Duration;

use azdo_core::wiql::WiqlQuery;
use azdo_core::{
    Backoff, BatchMode, ClientConfig, DevOpsClient, NodeKind, ProjectState, RemoteError,
    RetryPolicy,
};
use reqwest::StatusCode;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3).with_backoff(Backoff::new(
        Duration::from_millis(5),
        Duration::from_millis(20),
        false,
    ))
}

fn make_client(server: &MockServer) -> DevOpsClient {
    let mut config = ClientConfig::new("contoso", "test-pat").with_base_url(&server.uri());
    config.retry = fast_retry();
    config.batch_size = 2;
    config.batch_delay = Duration::ZERO;
    DevOpsClient::with_config(config).unwrap()
}

#[tokio::test]
async fn list_projects_sends_basic_auth_and_api_version() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contoso/_apis/projects"))
        .and(header("authorization", "Basic OnRlc3QtcGF0"))
        .and(query_param("api-version", "7.1"))
        .and(query_param("$top", "100"))
        .and(query_param("$skip", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 2,
            "value": [
                {"id": "p1", "name": "Fabrikam", "state": "wellFormed"},
                {"id": "p2", "name": "Legacy", "state": "deleting"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = make_client(&server);
    let projects = client.list_projects().await.unwrap();

    assert_eq!(projects.len(), 2);
    assert!(projects[0].state.is_well_formed());
    assert_eq!(projects[1].state, ProjectState::Deleting);
}

#[tokio::test]
async fn list_responses_are_cached_until_cleared() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contoso/_apis/teams"))
        .and(query_param("$mine", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "value": [{"id": "t1", "name": "Red", "projectId": "p1"}]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = make_client(&server);
    let first = client.list_teams().await.unwrap();
    let second = client.list_teams().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(client.cached_entries().await, 1);

    assert_eq!(client.clear_cache().await, 1);
    assert_eq!(client.cached_entries().await, 0);
    let third = client.list_teams().await.unwrap();
    assert_eq!(third[0].project_id.as_deref(), Some("p1"));
}

#[tokio::test]
async fn list_users_follows_continuation_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contoso/_apis/graph/users"))
        .and(query_param("continuationToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "value": [{"descriptor": "aad.b", "displayName": "Bob", "subjectKind": "user"}]
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/contoso/_apis/graph/users"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ms-continuationtoken", "page-2")
                .set_body_json(json!({
                    "count": 1,
                    "value": [{"descriptor": "aad.a", "displayName": "Alice", "subjectKind": "user"}]
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = make_client(&server);
    let users = client.list_users().await.unwrap();

    let names: Vec<_> = users.iter().map(|u| u.descriptor.as_str()).collect();
    assert_eq!(names, ["aad.a", "aad.b"]);
}

#[tokio::test]
async fn rate_limited_request_makes_three_attempts_then_fails() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contoso/_apis/projects"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "1")
                .set_body_string("slow down"),
        )
        .expect(3)
        .mount(&server)
        .await;

    let client = make_client(&server);
    let err = client.list_projects().await.unwrap_err();

    match err {
        RemoteError::RetriesExhausted {
            attempts,
            waited,
            status,
            body,
        } => {
            assert_eq!(attempts, 3);
            assert!(waited >= Duration::from_secs(1));
            assert_eq!(status, Some(StatusCode::TOO_MANY_REQUESTS));
            assert_eq!(body, "slow down");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn server_error_is_retried_until_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contoso/_apis/projects"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/contoso/_apis/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "value": [{"id": "p1", "name": "Fabrikam", "state": "wellFormed"}]
        })))
        .mount(&server)
        .await;

    let client = make_client(&server);
    let projects = client.list_projects().await.unwrap();

    assert_eq!(projects.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn permanent_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contoso/p1/t1/_apis/work/teamsettings/iterations"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such team"))
        .expect(1)
        .mount(&server)
        .await;

    let client = make_client(&server);
    let err = client.list_team_iterations("p1", "t1").await.unwrap_err();

    assert!(matches!(
        err,
        RemoteError::Api { status, ref body } if status == StatusCode::NOT_FOUND && body == "no such team"
    ));
    assert!(!err.is_terminal());
}

#[tokio::test]
async fn classification_tree_requests_depth() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contoso/p1/_apis/wit/classificationnodes/Iterations"))
        .and(query_param("$depth", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "identifier": "root",
            "name": "Fabrikam",
            "structureType": "iteration",
            "hasChildren": true,
            "children": [
                {
                    "id": 2,
                    "identifier": "i-1",
                    "name": "Sprint 1",
                    "attributes": {
                        "startDate": "2024-01-01T00:00:00Z",
                        "finishDate": "2024-01-14T00:00:00Z"
                    }
                }
            ]
        })))
        .mount(&server)
        .await;

    let client = make_client(&server);
    let tree = client
        .get_classification_tree("p1", NodeKind::Iterations, 4)
        .await
        .unwrap();

    assert_eq!(tree.name.as_deref(), Some("Fabrikam"));
    let child = &tree.children[0];
    assert_eq!(
        child
            .attributes
            .as_ref()
            .and_then(|a| a.start_date.as_deref()),
        Some("2024-01-01T00:00:00Z")
    );
}

#[tokio::test]
async fn wiql_query_posts_text_and_returns_ids() {
    let server = MockServer::start().await;
    let wiql = WiqlQuery::new("Fabrikam").build();

    Mock::given(method("POST"))
        .and(path("/contoso/p1/_apis/wit/wiql"))
        .and(query_param("timePrecision", "true"))
        .and(query_param("$top", "500"))
        .and(body_partial_json(json!({ "query": wiql })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "queryType": "flat",
            "workItems": [{"id": 3, "url": "x"}, {"id": 1, "url": "y"}]
        })))
        .mount(&server)
        .await;

    let client = make_client(&server);
    let ids = client.query_work_item_ids("p1", &wiql, 500).await.unwrap();

    assert_eq!(ids, vec![3, 1]);
}

#[tokio::test]
async fn work_item_batches_are_chunked() {
    let server = MockServer::start().await;

    for chunk in [vec![1, 2], vec![3, 4], vec![5]] {
        let value: Vec<_> = chunk
            .iter()
            .map(|id| json!({"id": id, "fields": {"System.Title": format!("Item {id}")}}))
            .collect();
        Mock::given(method("POST"))
            .and(path("/contoso/p1/_apis/wit/workitemsbatch"))
            .and(body_partial_json(json!({ "ids": chunk })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"count": value.len(), "value": value})),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let client = make_client(&server);
    let items = client
        .get_work_items_batch(&[1, 2, 3, 4, 5], "p1", BatchMode::All)
        .await
        .unwrap();

    let ids: Vec<_> = items.iter().map(|item| item.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn first_batch_only_makes_a_single_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/contoso/p1/_apis/wit/workitemsbatch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 2,
            "value": [{"id": 1, "fields": {}}, null]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = make_client(&server);
    let mut batches = client.work_item_batches(&[1, 2, 3, 4, 5], "p1", BatchMode::FirstBatchOnly);
    assert_eq!(batches.remaining(), 1);

    let first = batches.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 1);
    assert!(batches.next().await.is_none());
}
