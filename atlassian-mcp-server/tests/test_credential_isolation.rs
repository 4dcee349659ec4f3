/// Per-request credentials: precedence over server credentials and isolation
/// between concurrent calls
mod common;

use atlassian_mcp_server::error::ErrorKind;
use atlassian_mcp_server::tools::catalog::{CONFLUENCE_GET_PAGE, JIRA_GET_TRANSITIONS};
use common::{bare_config, page_json, pat_config, server};
use futures::future::join_all;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue};
use serde_json::json;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn auth_headers(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
    headers
}

async fn mount_page_for(mock: &MockServer, token: &str, title: &str) {
    Mock::given(method("GET"))
        .and(path("/wiki/rest/api/content/100"))
        .and(header("authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json("100", title, 1)))
        .mount(mock)
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_keep_their_own_credentials() {
    let mock = MockServer::start().await;
    for i in 0..8 {
        mount_page_for(&mock, &format!("caller-{}", i), &format!("seen by caller-{}", i)).await;
    }
    let server = server(bare_config(&mock.uri()));

    let calls = (0..8).map(|i| {
        let server = server.clone();
        async move {
            let output = server
                .call_with_headers(
                    CONFLUENCE_GET_PAGE,
                    json!({"page_id": "100"}),
                    &auth_headers(&format!("Bearer caller-{}", i)),
                )
                .await
                .unwrap();
            (i, output.0["title"].as_str().unwrap_or_default().to_string())
        }
    });

    for (i, title) in join_all(calls).await {
        assert_eq!(title, format!("seen by caller-{}", i));
    }
}

#[tokio::test]
async fn test_request_credential_overrides_server_pat() {
    let mock = MockServer::start().await;
    mount_page_for(&mock, "server-pat", "server view").await;
    mount_page_for(&mock, "caller-pat", "caller view").await;
    let server = server(pat_config(&mock.uri()));

    let output = server
        .call_with_headers(
            CONFLUENCE_GET_PAGE,
            json!({"page_id": "100"}),
            &auth_headers("Token caller-pat"),
        )
        .await
        .unwrap();
    assert_eq!(output.0["title"], "caller view");

    // The override does not stick to the server
    let output = server
        .call_with_headers(CONFLUENCE_GET_PAGE, json!({"page_id": "100"}), &HeaderMap::new())
        .await
        .unwrap();
    assert_eq!(output.0["title"], "server view");
}

#[tokio::test]
async fn test_jira_call_uses_request_pat() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/rest/api/[^/]+/issue/PROJ-1/transitions$"))
        .and(header("authorization", "Bearer caller-pat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transitions": [
                {"id": "31", "name": "Done", "to": {"name": "Done"}}
            ]
        })))
        .expect(1)
        .mount(&mock)
        .await;
    let server = server(pat_config(&mock.uri()));

    let output = server
        .call_with_headers(
            JIRA_GET_TRANSITIONS,
            json!({"issue_key": "PROJ-1"}),
            &auth_headers("Token caller-pat"),
        )
        .await
        .unwrap();

    assert_eq!(output.0["transitions"][0]["id"], "31");
    assert_eq!(output.0["transitions"][0]["to_status"], "Done");
}

#[tokio::test]
async fn test_no_credentials_anywhere() {
    let mock = MockServer::start().await;
    let server = server(bare_config(&mock.uri()));

    let err = server
        .call_with_headers(CONFLUENCE_GET_PAGE, json!({"page_id": "100"}), &HeaderMap::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoCredentialsAvailable);
    assert!(mock.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_malformed_authorization_header_is_rejected() {
    let server = server(pat_config("https://example.atlassian.net"));

    let err = server
        .call_with_headers(
            CONFLUENCE_GET_PAGE,
            json!({"page_id": "100"}),
            &auth_headers("Basic dXNlcjpwYXNz"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(!err.to_string().contains("dXNlcjpwYXNz"));
}
