/// Common utilities for Atlassian MCP Server integration tests
use atlassian_mcp_server::config::{OAuthClientConfig, ServerAuthConfig, ServiceConfig};
use atlassian_mcp_server::AtlassianMcpServer;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Config with Jira and Confluence on `base` and no server credentials
#[allow(dead_code)]
pub fn bare_config(base: &str) -> ServerAuthConfig {
    ServerAuthConfig {
        jira: Some(ServiceConfig::new(Url::parse(base).unwrap())),
        confluence: Some(ServiceConfig::new(
            Url::parse(&format!("{}/wiki", base)).unwrap(),
        )),
        max_retries: 0,
        request_timeout_seconds: 5,
        ..Default::default()
    }
}

/// Config whose services authenticate with server-side personal tokens
#[allow(dead_code)]
pub fn pat_config(base: &str) -> ServerAuthConfig {
    let mut config = bare_config(base);
    for service in [config.jira.as_mut(), config.confluence.as_mut()]
        .into_iter()
        .flatten()
    {
        service.personal_token = Some(SecretString::from("server-pat".to_string()));
    }
    config
}

/// Config with an OAuth client whose token endpoint and gateway are `base`
#[allow(dead_code)]
pub fn oauth_config(base: &str, cloud_id: Option<&str>) -> ServerAuthConfig {
    let mut oauth = OAuthClientConfig::new("client-1", SecretString::from("secret".to_string()));
    oauth.cloud_id = cloud_id.map(str::to_string);
    oauth.token_url = format!("{}/oauth/token", base);
    oauth.api_gateway = base.to_string();

    let mut config = bare_config("https://example.atlassian.net");
    config.oauth = Some(oauth);
    config
}

#[allow(dead_code)]
pub fn server(config: ServerAuthConfig) -> AtlassianMcpServer {
    AtlassianMcpServer::with_config(config).expect("server should build")
}

/// Minimal Confluence page body
#[allow(dead_code)]
pub fn page_json(id: &str, title: &str, version: u64) -> Value {
    json!({
        "id": id,
        "type": "page",
        "title": title,
        "space": { "key": "DEV" },
        "version": { "number": version },
        "_links": { "webui": format!("/spaces/DEV/pages/{}", id) }
    })
}

/// MCP Test Client for sending JSON-RPC requests to the server binary
#[allow(dead_code)]
pub struct McpTestClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

#[allow(dead_code)]
impl McpTestClient {
    /// Spawn the server with the given environment
    pub fn spawn(envs: &[(&str, &str)]) -> Result<Self, Box<dyn std::error::Error>> {
        let mut command = Command::new(env!("CARGO_BIN_EXE_atlassian-mcp-server"));
        for var in [
            "JIRA_URL",
            "CONFLUENCE_URL",
            "JIRA_PERSONAL_TOKEN",
            "CONFLUENCE_PERSONAL_TOKEN",
            "JIRA_USERNAME",
            "JIRA_API_TOKEN",
            "ATLASSIAN_OAUTH_CLIENT_ID",
            "ATLASSIAN_OAUTH_CLIENT_SECRET",
            "ENABLED_TOOLS",
            "DISABLED_TOOLS",
            "READ_ONLY_MODE",
        ] {
            command.env_remove(var);
        }
        command.envs(envs.iter().copied());

        let mut child = command
            .env("RUST_LOG", "error")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().ok_or("Failed to open stdin")?;
        let stdout = BufReader::new(child.stdout.take().ok_or("Failed to open stdout")?);

        let mut client = Self {
            child,
            stdin,
            stdout,
        };
        client.initialize()?;
        Ok(client)
    }

    /// Spawn the server with credentials from `.env`
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv::from_filename(".env").ok();

        let names = [
            "JIRA_URL",
            "JIRA_USERNAME",
            "JIRA_API_TOKEN",
            "JIRA_PERSONAL_TOKEN",
            "CONFLUENCE_URL",
            "CONFLUENCE_USERNAME",
            "CONFLUENCE_API_TOKEN",
            "CONFLUENCE_PERSONAL_TOKEN",
        ];
        let values: Vec<(&str, String)> = names
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (*name, v)))
            .collect();
        if !values.iter().any(|(name, _)| *name == "JIRA_URL") {
            return Err("JIRA_URL is not set".into());
        }

        let envs: Vec<(&str, &str)> = values.iter().map(|(n, v)| (*n, v.as_str())).collect();
        Self::spawn(&envs)
    }

    fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": "rust-test-client",
                    "version": "1.0.0"
                }
            }
        });

        self.send_request(&request)?;
        let response = self.read_response()?;

        if response.get("error").is_some() {
            return Err(format!("Initialization failed: {:?}", response["error"]).into());
        }

        Ok(())
    }

    /// Call an MCP tool
    pub fn call_tool(
        &mut self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        let request_id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);

        let request = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": "tools/call",
            "params": {
                "name": tool_name,
                "arguments": arguments
            }
        });

        self.send_request(&request)?;
        self.read_response()
    }

    /// Names advertised by `tools/list`
    pub fn list_tools(&mut self) -> Result<Vec<String>, Box<dyn std::error::Error>> {
        let request_id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);
        let request = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": "tools/list",
            "params": {}
        });

        self.send_request(&request)?;
        let response = self.read_response()?;
        if let Some(error) = response.get("error") {
            return Err(format!("tools/list failed: {:?}", error).into());
        }

        let tools = response["result"]["tools"]
            .as_array()
            .ok_or("No tools in result")?;
        Ok(tools
            .iter()
            .filter_map(|tool| tool["name"].as_str().map(str::to_string))
            .collect())
    }

    fn send_request(&mut self, request: &Value) -> Result<(), Box<dyn std::error::Error>> {
        writeln!(self.stdin, "{}", serde_json::to_string(request)?)?;
        self.stdin.flush()?;
        Ok(())
    }

    fn read_response(&mut self) -> Result<Value, Box<dyn std::error::Error>> {
        let mut line = String::new();
        self.stdout.read_line(&mut line)?;

        if line.is_empty() {
            return Err("Server closed connection".into());
        }

        Ok(serde_json::from_str(&line)?)
    }

    /// Extract the JSON tool result from a `tools/call` response
    pub fn extract_tool_result(response: &Value) -> Result<Value, String> {
        if let Some(error) = response.get("error") {
            return Err(format!("Tool call failed: {:?}", error));
        }

        let content = response
            .get("result")
            .and_then(|r| r.get("content"))
            .and_then(Value::as_array)
            .ok_or("No content in result")?;

        let text = content
            .iter()
            .find(|item| item.get("type") == Some(&Value::String("text".to_string())))
            .and_then(|item| item.get("text"))
            .and_then(Value::as_str)
            .ok_or("No text content found")?;

        serde_json::from_str(text)
            .map_err(|e| format!("Failed to parse tool result JSON: {}. Text was: {}", e, text))
    }
}

impl Drop for McpTestClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Project used by the live tests
#[allow(dead_code)]
pub fn test_project_key() -> String {
    std::env::var("TEST_PROJECT_KEY").unwrap_or_else(|_| "SCRUM".to_string())
}

#[allow(dead_code)]
pub fn test_issue_key() -> String {
    std::env::var("TEST_ISSUE_KEY").unwrap_or_else(|_| format!("{}-1", test_project_key()))
}
