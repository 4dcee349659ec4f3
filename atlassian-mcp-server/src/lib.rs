//! Atlassian MCP Server Library
//!
//! A Model Context Protocol server exposing Jira and Confluence tools.
//!
//! ## Features
//!
//! - **Per-request credentials**: callers may bring their own bearer token or
//!   personal access token; server credentials are the fallback
//! - **OAuth 2.0**: access tokens are refreshed once per account no matter how
//!   many calls are waiting on them
//! - **Multi-cloud routing**: OAuth calls are sent through the Atlassian API
//!   gateway for the selected cloud id
//! - **Tool gating**: read-only mode plus enable and disable lists
//! - **Error Handling**: MCP-compliant error codes with structured data

use crate::auth::headers::RequestAuthHeaders;
use crate::auth::oauth::{AccountStatus, OAuthSessionManager};
use crate::auth::token_client::AtlassianTokenClient;
use crate::auth::token_store::FileTokenStore;
use crate::config::ServerAuthConfig;
use crate::context::RequestContextBuilder;
use crate::dispatcher::{Dispatcher, ToolInvocation};
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use crate::tools::catalog::{self, Service, TOOL_CATALOG};
use crate::tools::gate::{self, ToolAvailability};
use crate::tools::{
    AddCommentParams, AddLabelParams, ConfluenceSearchParams, CreateIssueParams,
    CreatePageParams, GetIssueParams, GetPageParams, GetTransitionsParams, GetUserProfileParams,
    LinkIssuesParams, PageIdParams, RankIssuesParams, SearchParams, TransitionIssueParams,
    UpdateIssueParams, UpdatePageParams,
};

use pulseengine_mcp_macros::{mcp_server, mcp_tools};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

// Re-export modules for external use
pub mod auth;
pub mod backend;
pub mod config;
pub mod confluence_client;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod jira_client;
pub mod masking;
pub mod routing;
pub mod tools;

/// Server status information
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AtlassianServerStatus {
    pub server_name: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub jira_url: Option<String>,
    pub confluence_url: Option<String>,
    pub read_only: bool,
    pub visible_tools: usize,
    pub callable_tools: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthAccountSummary>,
}

/// OAuth account state as reported by `get_server_status`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OAuthAccountSummary {
    pub account: String,
    pub authorized: bool,
    pub expires_at: Option<String>,
    pub cloud_ids: Vec<String>,
    pub revoked_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
}

impl From<AccountStatus> for OAuthAccountSummary {
    fn from(status: AccountStatus) -> Self {
        Self {
            account: status.account,
            authorized: status.authorized,
            expires_at: status.expires_at.map(|t| t.to_rfc3339()),
            cloud_ids: status.cloud_ids,
            revoked_reason: status.revoked_reason,
            persist_error: status.persist_error,
        }
    }
}

/// Tools listed by `list_available_tools`
#[derive(Debug, Serialize, Clone)]
pub struct AvailableTools {
    pub read_only: bool,
    pub tools: Vec<ToolAvailability>,
}

/// JSON result of a dispatched tool call
#[derive(Debug, Serialize, Clone)]
#[serde(transparent)]
pub struct ToolOutput(pub Value);

// Workaround for pulseengine-mcp-macros bug #62
// The macro uses format!("{:?}") instead of serde_json serialization
// Implement Display to return JSON format
impl std::fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for AtlassianServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(
                f,
                "{{\"error\": \"Failed to serialize AtlassianServerStatus\"}}"
            ),
        }
    }
}

impl std::fmt::Display for AvailableTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{{\"error\": \"Failed to serialize AvailableTools\"}}"),
        }
    }
}

/// Atlassian MCP Server
///
/// Every tool call goes through the [`Dispatcher`]: availability gate,
/// credential resolution, routing, then the tool body.
#[mcp_server(
    name = "Atlassian MCP Server",
    version = "0.1.0",
    description = "Jira and Confluence tools with per-request authentication and multi-cloud routing",
    auth = "disabled"
)]
#[derive(Clone)]
pub struct AtlassianMcpServer {
    /// Server start time for uptime calculation
    start_time: Instant,

    config: Arc<ServerAuthConfig>,

    dispatcher: Arc<Dispatcher>,

    /// Present when OAuth is configured
    sessions: Option<Arc<OAuthSessionManager>>,
}

impl Default for AtlassianMcpServer {
    fn default() -> Self {
        // In practice, the server should be created using `new()` or `with_config()`
        panic!("AtlassianMcpServer cannot be created with default(). Use AtlassianMcpServer::new() instead.")
    }
}

impl AtlassianMcpServer {
    /// Create a server from the environment and optional config file
    #[instrument]
    pub async fn new() -> AtlassianMcpResult<Self> {
        info!("Initializing Atlassian MCP Server");

        let config = ServerAuthConfig::load()
            .map_err(|e| AtlassianMcpError::config(format!("{:#}", e)))?;
        info!("Configuration loaded successfully");

        let sessions = match &config.oauth {
            Some(oauth) => {
                let endpoint = AtlassianTokenClient::new(
                    oauth,
                    Duration::from_secs(config.request_timeout_seconds),
                )?;
                let store = FileTokenStore::new(oauth.token_dir.clone());
                info!(
                    "OAuth enabled for client {} (token dir {})",
                    oauth.account(),
                    store.dir().display()
                );
                Some(Arc::new(OAuthSessionManager::new(
                    Arc::new(endpoint),
                    Arc::new(store),
                )))
            }
            None => None,
        };

        let server = Self::with_sessions(config, sessions)?;
        server.warm_oauth_session().await;

        info!("Atlassian MCP Server initialized successfully");
        Ok(server)
    }

    /// Create server with custom configuration and no OAuth session manager
    #[instrument(skip(config))]
    pub fn with_config(config: ServerAuthConfig) -> AtlassianMcpResult<Self> {
        Self::with_sessions(config, None)
    }

    /// Create server with custom configuration and session manager
    pub fn with_sessions(
        config: ServerAuthConfig,
        sessions: Option<Arc<OAuthSessionManager>>,
    ) -> AtlassianMcpResult<Self> {
        let config = Arc::new(config);
        let snapshot = gate::snapshot(&config, TOOL_CATALOG);
        let builder = RequestContextBuilder::new(Arc::clone(&config), sessions.clone())?;

        let mut dispatcher = Dispatcher::new(snapshot, builder);
        tools::register_all(&mut dispatcher);

        let visible = dispatcher.list_tools();
        info!(
            "{} of {} tools visible, {} callable",
            visible.len(),
            TOOL_CATALOG.len(),
            dispatcher.snapshot().callable_count()
        );
        if visible.is_empty() {
            warn!("No tools are available; configure JIRA_URL or CONFLUENCE_URL");
        }

        Ok(Self {
            start_time: Instant::now(),
            config,
            dispatcher: Arc::new(dispatcher),
            sessions,
        })
    }

    /// The dispatcher that runs every tool call
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// MCP tool definitions for `tools/list`
    ///
    /// Catalog tools appear only while the gate shows them; the meta tools
    /// are always listed.
    pub fn advertised_tools(&self) -> Vec<pulseengine_mcp_protocol::Tool> {
        let snapshot = self.dispatcher.snapshot();
        <Self as pulseengine_mcp_server::McpToolsProvider>::get_available_tools(self)
            .into_iter()
            .filter(|tool| match snapshot.status(&tool.name) {
                Some(status) => status.is_visible(),
                None => true,
            })
            .collect()
    }

    /// Get server uptime in seconds
    fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Load persisted OAuth state so the first call does not pay for it
    async fn warm_oauth_session(&self) {
        let (Some(sessions), Some(oauth)) = (&self.sessions, &self.config.oauth) else {
            return;
        };
        match sessions.account_status(oauth.account()).await {
            Ok(status) if status.authorized => {
                info!("OAuth tokens loaded for {}", status.account)
            }
            Ok(status) => warn!(
                "No OAuth tokens stored for {}; calls will fail until the account is authorized",
                status.account
            ),
            Err(e) => warn!("Failed to load OAuth tokens: {}", e),
        }
    }
}

/// All public methods in this impl block become MCP tools automatically
/// The #[mcp_tools] macro discovers these methods and exposes them via MCP
#[mcp_tools]
impl AtlassianMcpServer {
    /// Get the profile of the user the call is authenticated as
    #[instrument(skip(self))]
    pub async fn jira_get_user_profile(
        &self,
        params: GetUserProfileParams,
    ) -> anyhow::Result<ToolOutput> {
        self.call(catalog::JIRA_GET_USER_PROFILE, &params).await
    }

    /// Get a Jira issue by key
    ///
    /// # Examples
    /// - `{"issue_key": "PROJ-123"}`
    /// - `{"issue_key": "PROJ-123", "include_comments": true}`
    #[instrument(skip(self))]
    pub async fn jira_get_issue(&self, params: GetIssueParams) -> anyhow::Result<ToolOutput> {
        self.call(catalog::JIRA_GET_ISSUE, &params).await
    }

    /// Search Jira issues with JQL
    ///
    /// # Examples
    /// - `{"jql": "assignee = currentUser() AND resolution = Unresolved"}`
    /// - `{"jql": "project = PROJ ORDER BY created DESC", "max_results": 10}`
    #[instrument(skip(self))]
    pub async fn jira_search(&self, params: SearchParams) -> anyhow::Result<ToolOutput> {
        self.call(catalog::JIRA_SEARCH, &params).await
    }

    /// List the workflow transitions available for an issue
    #[instrument(skip(self))]
    pub async fn jira_get_transitions(
        &self,
        params: GetTransitionsParams,
    ) -> anyhow::Result<ToolOutput> {
        self.call(catalog::JIRA_GET_TRANSITIONS, &params).await
    }

    /// Create a Jira issue
    ///
    /// # Examples
    /// - `{"project_key": "PROJ", "summary": "Fix login", "issue_type": "Bug"}`
    #[instrument(skip(self))]
    pub async fn jira_create_issue(
        &self,
        params: CreateIssueParams,
    ) -> anyhow::Result<ToolOutput> {
        self.call(catalog::JIRA_CREATE_ISSUE, &params).await
    }

    /// Update fields of a Jira issue
    #[instrument(skip(self))]
    pub async fn jira_update_issue(
        &self,
        params: UpdateIssueParams,
    ) -> anyhow::Result<ToolOutput> {
        self.call(catalog::JIRA_UPDATE_ISSUE, &params).await
    }

    /// Add a comment to a Jira issue
    #[instrument(skip(self))]
    pub async fn jira_add_comment(&self, params: AddCommentParams) -> anyhow::Result<ToolOutput> {
        self.call(catalog::JIRA_ADD_COMMENT, &params).await
    }

    /// Move an issue through its workflow
    ///
    /// # Examples
    /// - `{"issue_key": "PROJ-123", "transition_name": "Done"}`
    /// - `{"issue_key": "PROJ-123", "transition_id": "31", "comment": "Fixed in 1.2"}`
    #[instrument(skip(self))]
    pub async fn jira_transition_issue(
        &self,
        params: TransitionIssueParams,
    ) -> anyhow::Result<ToolOutput> {
        self.call(catalog::JIRA_TRANSITION_ISSUE, &params).await
    }

    /// Link two Jira issues
    ///
    /// # Examples
    /// - `{"link_type": "Blocks", "inward_issue_key": "PROJ-2", "outward_issue_key": "PROJ-1"}`
    #[instrument(skip(self))]
    pub async fn jira_link_issues(&self, params: LinkIssuesParams) -> anyhow::Result<ToolOutput> {
        self.call(catalog::JIRA_LINK_ISSUES, &params).await
    }

    /// Rank issues before or after another issue on an agile board
    ///
    /// # Examples
    /// - `{"issues": ["PROJ-3", "PROJ-4"], "rank_before": "PROJ-1"}`
    #[instrument(skip(self))]
    pub async fn jira_rank_issues(&self, params: RankIssuesParams) -> anyhow::Result<ToolOutput> {
        self.call(catalog::JIRA_RANK_ISSUES, &params).await
    }

    /// Search Confluence content with CQL or plain text
    ///
    /// # Examples
    /// - `{"query": "space = DEV AND type = page AND title ~ \"release\""}`
    /// - `{"query": "onboarding", "limit": 5}`
    #[instrument(skip(self))]
    pub async fn confluence_search(
        &self,
        params: ConfluenceSearchParams,
    ) -> anyhow::Result<ToolOutput> {
        self.call(catalog::CONFLUENCE_SEARCH, &params).await
    }

    /// Get a Confluence page by id
    #[instrument(skip(self))]
    pub async fn confluence_get_page(&self, params: GetPageParams) -> anyhow::Result<ToolOutput> {
        self.call(catalog::CONFLUENCE_GET_PAGE, &params).await
    }

    /// Get the comments on a Confluence page
    #[instrument(skip(self))]
    pub async fn confluence_get_comments(
        &self,
        params: PageIdParams,
    ) -> anyhow::Result<ToolOutput> {
        self.call(catalog::CONFLUENCE_GET_COMMENTS, &params).await
    }

    /// Get the labels on a Confluence page
    #[instrument(skip(self))]
    pub async fn confluence_get_labels(&self, params: PageIdParams) -> anyhow::Result<ToolOutput> {
        self.call(catalog::CONFLUENCE_GET_LABELS, &params).await
    }

    /// Create a Confluence page
    #[instrument(skip(self))]
    pub async fn confluence_create_page(
        &self,
        params: CreatePageParams,
    ) -> anyhow::Result<ToolOutput> {
        self.call(catalog::CONFLUENCE_CREATE_PAGE, &params).await
    }

    /// Replace the content of a Confluence page
    #[instrument(skip(self))]
    pub async fn confluence_update_page(
        &self,
        params: UpdatePageParams,
    ) -> anyhow::Result<ToolOutput> {
        self.call(catalog::CONFLUENCE_UPDATE_PAGE, &params).await
    }

    /// Add a label to a Confluence page
    #[instrument(skip(self))]
    pub async fn confluence_add_label(&self, params: AddLabelParams) -> anyhow::Result<ToolOutput> {
        self.call(catalog::CONFLUENCE_ADD_LABEL, &params).await
    }

    /// List the tools this server currently offers
    ///
    /// Tools blocked by read-only mode are listed with `callable: false`.
    #[instrument(skip(self))]
    pub async fn list_available_tools(&self) -> anyhow::Result<AvailableTools> {
        Ok(AvailableTools {
            read_only: self.config.read_only,
            tools: self.dispatcher.list_tools(),
        })
    }

    /// Get server status, configured services and OAuth account state
    #[instrument(skip(self))]
    pub async fn get_server_status(&self) -> anyhow::Result<AtlassianServerStatus> {
        info!("Getting server status");

        let oauth = match (&self.sessions, &self.config.oauth) {
            (Some(sessions), Some(oauth)) => {
                match sessions.account_status(oauth.account()).await {
                    Ok(status) => Some(status.into()),
                    Err(e) => {
                        warn!("Failed to read OAuth account status: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(AtlassianServerStatus {
            server_name: "Atlassian MCP Server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.get_uptime_seconds(),
            jira_url: self
                .config
                .service(Service::Jira)
                .map(|s| s.url.to_string()),
            confluence_url: self
                .config
                .service(Service::Confluence)
                .map(|s| s.url.to_string()),
            read_only: self.config.read_only,
            visible_tools: self.dispatcher.list_tools().len(),
            callable_tools: self.dispatcher.snapshot().callable_count(),
            oauth,
        })
    }
}

// Implementation methods that are NOT MCP tools
impl AtlassianMcpServer {
    /// Run a tool call without request headers (stdio transport)
    async fn call<P: Serialize>(&self, tool: &str, params: &P) -> anyhow::Result<ToolOutput> {
        let arguments = serde_json::to_value(params)?;
        self.dispatch(ToolInvocation::new(tool, arguments))
            .await
            .map_err(|e| {
                error!("{} failed: {}", tool, e);
                anyhow::anyhow!(e)
            })
    }

    /// Run a tool call carrying the headers of an HTTP request
    pub async fn call_with_headers(
        &self,
        tool: &str,
        arguments: Value,
        headers: &http::HeaderMap,
    ) -> AtlassianMcpResult<ToolOutput> {
        let headers = RequestAuthHeaders::from_header_map(headers)?;
        self.dispatch(ToolInvocation::new(tool, arguments).with_headers(headers))
            .await
    }

    async fn dispatch(&self, invocation: ToolInvocation) -> AtlassianMcpResult<ToolOutput> {
        self.dispatcher.dispatch(invocation).await.map(ToolOutput)
    }
}
