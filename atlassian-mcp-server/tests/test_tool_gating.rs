/// Tool availability: read-only mode, enable and disable lists, unconfigured services
mod common;

use atlassian_mcp_server::error::ErrorKind;
use atlassian_mcp_server::tools::catalog::{
    CONFLUENCE_GET_PAGE, JIRA_CREATE_ISSUE, JIRA_GET_ISSUE, JIRA_SEARCH, TOOL_CATALOG,
};
use common::{pat_config, server, McpTestClient};
use http::HeaderMap;
use serde_json::json;
use wiremock::MockServer;

#[tokio::test]
async fn test_read_only_lists_but_blocks_writes() {
    let mock = MockServer::start().await;
    let mut config = pat_config(&mock.uri());
    config.read_only = true;
    let server = server(config);

    let listed = server.list_available_tools().await.unwrap();
    assert!(listed.read_only);
    assert_eq!(listed.tools.len(), TOOL_CATALOG.len());

    let create = listed
        .tools
        .iter()
        .find(|t| t.descriptor.name == JIRA_CREATE_ISSUE)
        .expect("write tools stay listed");
    assert!(!create.callable);

    let err = server
        .call_with_headers(JIRA_CREATE_ISSUE, json!({}), &HeaderMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ToolUnavailable);
    assert!(err.to_string().contains("read-only"));

    // Nothing reached the downstream service
    assert!(mock.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_enabled_list_wins_over_disabled_list() {
    let mut config = pat_config("https://example.atlassian.net");
    config.enabled_tools = Some([JIRA_SEARCH.to_string()].into_iter().collect());
    config.disabled_tools = [JIRA_SEARCH.to_string(), JIRA_GET_ISSUE.to_string()]
        .into_iter()
        .collect();
    let server = server(config);

    let names: Vec<&str> = server
        .list_available_tools()
        .await
        .unwrap()
        .tools
        .iter()
        .map(|t| t.descriptor.name)
        .collect();
    assert_eq!(names, vec![JIRA_SEARCH]);

    let err = server
        .call_with_headers(JIRA_GET_ISSUE, json!({"issue_key": "A-1"}), &HeaderMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ToolUnavailable);
}

#[tokio::test]
async fn test_disabled_tools_are_hidden() {
    let mut config = pat_config("https://example.atlassian.net");
    config.disabled_tools = [CONFLUENCE_GET_PAGE.to_string()].into_iter().collect();
    let server = server(config);

    let listed = server.list_available_tools().await.unwrap();
    assert!(listed
        .tools
        .iter()
        .all(|t| t.descriptor.name != CONFLUENCE_GET_PAGE));
    assert_eq!(listed.tools.len(), TOOL_CATALOG.len() - 1);
}

#[tokio::test]
async fn test_unconfigured_service_tools_are_hidden() {
    let mut config = pat_config("https://example.atlassian.net");
    config.confluence = None;
    let server = server(config);

    let status = server.get_server_status().await.unwrap();
    assert!(status.confluence_url.is_none());

    let listed = server.list_available_tools().await.unwrap();
    assert!(listed
        .tools
        .iter()
        .all(|t| !t.descriptor.name.starts_with("confluence_")));
    assert_eq!(status.visible_tools, listed.tools.len());
}

#[tokio::test]
async fn test_unknown_tool_is_unavailable() {
    let server = server(pat_config("https://example.atlassian.net"));
    let err = server
        .call_with_headers("jira_delete_everything", json!({}), &HeaderMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ToolUnavailable);
}

#[test]
fn test_stdio_server_in_read_only_mode() {
    let mut client = McpTestClient::spawn(&[
        ("JIRA_URL", "https://jira.invalid"),
        ("JIRA_PERSONAL_TOKEN", "server-pat"),
        ("READ_ONLY_MODE", "true"),
    ])
    .expect("Failed to spawn server");

    let response = client
        .call_tool("list_available_tools", json!({}))
        .expect("Failed to list tools");
    let listed = McpTestClient::extract_tool_result(&response).expect("Failed to extract result");
    assert_eq!(listed["read_only"], true);
    let tools = listed["tools"].as_array().unwrap();
    assert!(tools.iter().all(|t| t["service"] == "jira"));

    let response = client
        .call_tool(
            JIRA_CREATE_ISSUE,
            json!({"project_key": "PROJ", "summary": "x", "issue_type": "Task"}),
        )
        .expect("Failed to call tool");
    let failed =
        response.get("error").is_some() || response["result"]["isError"] == serde_json::Value::Bool(true);
    assert!(failed, "write call should fail in read-only mode: {}", response);
}

#[test]
fn test_stdio_tools_list_hides_unconfigured_service() {
    let mut client = McpTestClient::spawn(&[
        ("JIRA_URL", "https://jira.invalid"),
        ("JIRA_PERSONAL_TOKEN", "server-pat"),
        ("DISABLED_TOOLS", "jira_link_issues"),
    ])
    .expect("Failed to spawn server");

    let names = client.list_tools().expect("Failed to list tools");

    assert!(names.iter().any(|n| n == JIRA_SEARCH));
    assert!(names.iter().any(|n| n == "list_available_tools"));
    assert!(names.iter().any(|n| n == "get_server_status"));
    assert!(!names.iter().any(|n| n.starts_with("confluence_")));
    assert!(!names.iter().any(|n| n == "jira_link_issues"));
}
