//! MCP backend that advertises only the tools the availability gate shows
//!
//! The `#[mcp_tools]` expansion lists every tool method unconditionally.
//! [`GatedBackend`] wraps the server and filters `tools/list` through the
//! dispatcher; every other request is forwarded unchanged.

use crate::config::ServerAuthConfig;
use crate::AtlassianMcpServer;
use async_trait::async_trait;
use pulseengine_mcp_protocol::{
    CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult,
    ListPromptsResult, ListResourcesResult, ListToolsResult, PaginatedRequestParam,
    ReadResourceRequestParam, ReadResourceResult, ServerInfo,
};
use pulseengine_mcp_server::{
    AuthConfig, CommonMcpError, McpBackend, McpServer, ServerConfig, ServerError,
};
use tracing::debug;

#[derive(Clone)]
pub struct GatedBackend {
    inner: AtlassianMcpServer,
}

impl GatedBackend {
    pub fn new(inner: AtlassianMcpServer) -> Self {
        Self { inner }
    }

    /// Serve over stdio with authentication disabled
    pub async fn serve_stdio(self) -> Result<McpServer<Self>, ServerError> {
        let mut config = ServerConfig {
            server_info: self.get_server_info(),
            ..Default::default()
        };

        let mut auth_config = AuthConfig::memory();
        auth_config.enabled = false;
        config.auth_config = auth_config;

        McpServer::new(self, config).await
    }
}

#[async_trait]
impl McpBackend for GatedBackend {
    type Error = CommonMcpError;
    type Config = ServerAuthConfig;

    async fn initialize(config: Self::Config) -> Result<Self, Self::Error> {
        AtlassianMcpServer::with_config(config)
            .map(Self::new)
            .map_err(|e| CommonMcpError::Setup(e.to_string()))
    }

    fn get_server_info(&self) -> ServerInfo {
        self.inner.get_server_info()
    }

    async fn health_check(&self) -> Result<(), Self::Error> {
        self.inner.health_check().await
    }

    async fn list_tools(
        &self,
        _request: PaginatedRequestParam,
    ) -> Result<ListToolsResult, Self::Error> {
        let tools = self.inner.advertised_tools();
        debug!("Advertising {} tools", tools.len());
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, Self::Error> {
        self.inner.call_tool(request).await
    }

    async fn list_resources(
        &self,
        request: PaginatedRequestParam,
    ) -> Result<ListResourcesResult, Self::Error> {
        self.inner.list_resources(request).await
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
    ) -> Result<ReadResourceResult, Self::Error> {
        self.inner.read_resource(request).await
    }

    async fn list_prompts(
        &self,
        request: PaginatedRequestParam,
    ) -> Result<ListPromptsResult, Self::Error> {
        self.inner.list_prompts(request).await
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
    ) -> Result<GetPromptResult, Self::Error> {
        self.inner.get_prompt(request).await
    }
}
