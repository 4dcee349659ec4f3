/// End-to-end tool calls through the dispatcher against mocked services
mod common;

use atlassian_mcp_server::error::ErrorKind;
use atlassian_mcp_server::tools::catalog::{
    CONFLUENCE_SEARCH, CONFLUENCE_UPDATE_PAGE, JIRA_ADD_COMMENT, JIRA_GET_ISSUE,
    JIRA_RANK_ISSUES, JIRA_SEARCH, JIRA_TRANSITION_ISSUE, JIRA_UPDATE_ISSUE,
};
use common::{page_json, pat_config, server};
use http::HeaderMap;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_invalid_arguments_never_reach_the_network() {
    let mock = MockServer::start().await;
    let server = server(pat_config(&mock.uri()));

    let err = server
        .call_with_headers(JIRA_GET_ISSUE, json!({"issue_key": "not a key"}), &HeaderMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    assert_eq!(err.error_data()["parameter"], "issue_key");

    let err = server
        .call_with_headers(
            JIRA_RANK_ISSUES,
            json!({"issues": ["PROJ-1"], "rank_before": "PROJ-2", "rank_after": "PROJ-3"}),
            &HeaderMap::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);

    assert!(mock.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_confluence_search_wraps_plain_text() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wiki/rest/api/content/search"))
        .and(query_param("cql", "siteSearch ~ \"deploy guide\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [page_json("7", "Deploy guide", 2)]
        })))
        .expect(1)
        .mount(&mock)
        .await;
    let server = server(pat_config(&mock.uri()));

    let output = server
        .call_with_headers(
            CONFLUENCE_SEARCH,
            json!({"query": "deploy guide", "limit": 5}),
            &HeaderMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.0["count"], 1);
    assert_eq!(output.0["results"][0]["title"], "Deploy guide");
    assert_eq!(output.0["results"][0]["space_key"], "DEV");
}

#[tokio::test]
async fn test_confluence_update_writes_next_version() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wiki/rest/api/content/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json("42", "Notes", 6)))
        .mount(&mock)
        .await;
    Mock::given(method("PUT"))
        .and(path("/wiki/rest/api/content/42"))
        .and(body_partial_json(json!({
            "title": "Notes",
            "version": {"number": 7, "message": "typo"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json("42", "Notes", 7)))
        .expect(1)
        .mount(&mock)
        .await;
    let server = server(pat_config(&mock.uri()));

    let output = server
        .call_with_headers(
            CONFLUENCE_UPDATE_PAGE,
            json!({"page_id": "42", "content": "<p>fixed</p>", "version_comment": "typo"}),
            &HeaderMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.0["success"], true);
    assert_eq!(output.0["page"]["version"], 7);
}

#[tokio::test]
async fn test_downstream_not_found_is_api_error() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wiki/rest/api/content/search"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such space"))
        .mount(&mock)
        .await;
    let server = server(pat_config(&mock.uri()));

    let err = server
        .call_with_headers(
            CONFLUENCE_SEARCH,
            json!({"query": "space = NOPE"}),
            &HeaderMap::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DownstreamApiError);
    assert_eq!(err.error_data()["status"], 404);
    assert_eq!(err.error_data()["retryable"], false);
}

#[tokio::test]
async fn test_transition_by_name_resolves_id() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/rest/api/[^/]+/issue/PROJ-9/transitions$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transitions": [
                {"id": "11", "name": "Start Progress", "to": {"name": "In Progress"}},
                {"id": "31", "name": "Close", "to": {"name": "Done"}}
            ]
        })))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/rest/api/[^/]+/issue/PROJ-9/transitions$"))
        .and(body_partial_json(json!({"transition": {"id": "31"}})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock)
        .await;
    let server = server(pat_config(&mock.uri()));

    let output = server
        .call_with_headers(
            JIRA_TRANSITION_ISSUE,
            json!({"issue_key": "PROJ-9", "transition_name": "done"}),
            &HeaderMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.0["transition_id"], "31");

    let err = server
        .call_with_headers(
            JIRA_TRANSITION_ISSUE,
            json!({"issue_key": "PROJ-9", "transition_name": "Reopen"}),
            &HeaderMap::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    assert!(err.to_string().contains("Start Progress"));
}

#[tokio::test]
async fn test_rank_reports_partial_success() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/rest/agile/[^/]+/issue/rank$"))
        .and(body_partial_json(json!({
            "issues": ["PROJ-3", "PROJ-4"],
            "rankBeforeIssue": "PROJ-1"
        })))
        .respond_with(ResponseTemplate::new(207).set_body_json(json!({
            "successfulIssues": ["PROJ-3"],
            "failedIssues": [{"issueKey": "PROJ-4", "errors": ["not on board"]}]
        })))
        .expect(1)
        .mount(&mock)
        .await;
    let server = server(pat_config(&mock.uri()));

    let output = server
        .call_with_headers(
            JIRA_RANK_ISSUES,
            json!({"issues": ["PROJ-3", "PROJ-4"], "rank_before": "PROJ-1"}),
            &HeaderMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.0["success"], false);
    assert_eq!(output.0["partial_success"], true);
    assert_eq!(
        output.0["message"],
        "Partially successful: 1 issues ranked, 1 issues failed"
    );
    assert_eq!(output.0["rank_position"], "before PROJ-1");
}

#[tokio::test]
async fn test_rank_no_content_is_full_success() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/agile/1.0/issue/rank"))
        .and(header("authorization", "Bearer server-pat"))
        .and(body_partial_json(json!({"rankAfterIssue": "PROJ-8"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock)
        .await;
    let server = server(pat_config(&mock.uri()));

    let output = server
        .call_with_headers(
            JIRA_RANK_ISSUES,
            json!({"issues": ["PROJ-5"], "rank_after": "PROJ-8"}),
            &HeaderMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.0["success"], true);
    assert_eq!(output.0["message"], "Successfully ranked issues: PROJ-5");
    assert_eq!(output.0["rank_position"], "after PROJ-8");
}

#[tokio::test]
async fn test_rank_ok_body_is_returned_unchanged() {
    let mock = MockServer::start().await;
    let body = json!({"successfulIssues": ["PROJ-5"], "failedIssues": []});
    Mock::given(method("POST"))
        .and(path("/rest/agile/1.0/issue/rank"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
        .expect(1)
        .mount(&mock)
        .await;
    let server = server(pat_config(&mock.uri()));

    let output = server
        .call_with_headers(
            JIRA_RANK_ISSUES,
            json!({"issues": ["PROJ-5"], "rank_before": "PROJ-1"}),
            &HeaderMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.0, body);
}

#[tokio::test]
async fn test_rank_multi_status_without_failures_is_not_success() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/agile/1.0/issue/rank"))
        .respond_with(ResponseTemplate::new(207).set_body_json(json!({
            "successfulIssues": ["PROJ-5"]
        })))
        .mount(&mock)
        .await;
    let server = server(pat_config(&mock.uri()));

    let output = server
        .call_with_headers(
            JIRA_RANK_ISSUES,
            json!({"issues": ["PROJ-5"], "rank_before": "PROJ-1"}),
            &HeaderMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.0["success"], false);
    assert_eq!(output.0["partial_success"], true);
}

#[tokio::test]
async fn test_jira_search_returns_page() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/rest/api/[^/]+/search$"))
        .and(query_param("jql", "project = PROJ"))
        .and(query_param("maxResults", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 3,
            "maxResults": 10,
            "startAt": 0,
            "issues": [
                {
                    "self": format!("{}/rest/api/2/issue/10001", mock.uri()),
                    "key": "PROJ-1",
                    "id": "10001",
                    "fields": {"summary": "First", "labels": ["ops"]}
                },
                {
                    "self": format!("{}/rest/api/2/issue/10002", mock.uri()),
                    "key": "PROJ-2",
                    "id": "10002",
                    "fields": {"summary": "Second"}
                }
            ]
        })))
        .expect(1)
        .mount(&mock)
        .await;
    let server = server(pat_config(&mock.uri()));

    let output = server
        .call_with_headers(
            JIRA_SEARCH,
            json!({"jql": "project = PROJ", "max_results": 10}),
            &HeaderMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.0["total"], 3);
    assert_eq!(output.0["is_last"], false);
    assert_eq!(output.0["issues"][0]["key"], "PROJ-1");
    assert_eq!(output.0["issues"][0]["summary"], "First");
    assert_eq!(output.0["issues"][0]["labels"], json!(["ops"]));
    assert_eq!(output.0["issues"][1]["key"], "PROJ-2");
}

#[tokio::test]
async fn test_add_comment_returns_comment_text() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/rest/api/[^/]+/issue/PROJ-4/comment$"))
        .and(body_partial_json(json!({"body": "Deployed to staging"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "500",
            "self": format!("{}/rest/api/2/issue/PROJ-4/comment/500", mock.uri()),
            "author": {
                "self": format!("{}/rest/api/2/user?username=jdoe", mock.uri()),
                "name": "jdoe",
                "displayName": "Jane Doe",
                "active": true
            },
            "body": "Deployed to staging"
        })))
        .expect(1)
        .mount(&mock)
        .await;
    let server = server(pat_config(&mock.uri()));

    let output = server
        .call_with_headers(
            JIRA_ADD_COMMENT,
            json!({"issue_key": "PROJ-4", "body": "Deployed to staging"}),
            &HeaderMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.0["success"], true);
    assert_eq!(output.0["comment"]["id"], "500");
    assert_eq!(output.0["comment"]["author"], "Jane Doe");
    assert_eq!(output.0["comment"]["body"], "Deployed to staging");
}

#[tokio::test]
async fn test_update_issue_puts_fields() {
    let mock = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/rest/api/[^/]+/issue/PROJ-6$"))
        .and(body_partial_json(json!({"fields": {"summary": "Renamed"}})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock)
        .await;
    let server = server(pat_config(&mock.uri()));

    let output = server
        .call_with_headers(
            JIRA_UPDATE_ISSUE,
            json!({"issue_key": "PROJ-6", "summary": "Renamed"}),
            &HeaderMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.0["success"], true);
    assert_eq!(output.0["updated_fields"], json!(["summary"]));
}
